//! Coalesces identical in-flight resolutions.

// crates.io
use tokio::sync::OnceCell;
// self
use crate::{_prelude::*, auth::Session};

type Outcome = Result<Option<Session>, Arc<Error>>;

/// Runs at most one resolution per key at a time; concurrent callers share its outcome.
///
/// A failure seen by several callers surfaces as [`Error::Shared`]; a sole caller gets the
/// original error back.
#[derive(Default)]
pub struct TaskSingler {
	inflight: Mutex<HashMap<String, Arc<OnceCell<Outcome>>>>,
}
impl TaskSingler {
	/// Joins the resolution running under `key`, or starts one with `task`.
	pub async fn run<F, Fut>(&self, key: String, task: F) -> Result<Option<Session>>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Option<Session>>>,
	{
		let cell = self.inflight.lock().entry(key.clone()).or_default().clone();
		let outcome = cell.get_or_init(|| async move { task().await.map_err(Arc::new) }).await.clone();

		{
			let mut inflight = self.inflight.lock();

			if inflight.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
				inflight.remove(&key);
			}
		}

		drop(cell);

		outcome.map_err(|e| Arc::try_unwrap(e).unwrap_or_else(Error::Shared))
	}

	/// Number of keys with a resolution in flight.
	pub fn inflight(&self) -> usize {
		self.inflight.lock().len()
	}
}
impl Debug for TaskSingler {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TaskSingler").field("inflight", &self.inflight()).finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	#[tokio::test]
	async fn concurrent_callers_share_one_run() {
		let singler = TaskSingler::default();
		let runs = AtomicUsize::new(0);
		let task = || async {
			runs.fetch_add(1, Ordering::SeqCst);
			tokio::task::yield_now().await;

			Err(Error::Cancelled)
		};
		let (a, b) = tokio::join!(singler.run("k".into(), task), singler.run("k".into(), task));

		assert_eq!(runs.load(Ordering::SeqCst), 1);
		assert!(a.expect_err("First caller should fail.").is_user_refusal());
		assert!(b.expect_err("Second caller should fail.").is_user_refusal());
		assert_eq!(singler.inflight(), 0);
	}

	#[tokio::test]
	async fn sole_callers_get_the_original_error() {
		let singler = TaskSingler::default();
		let err = singler
			.run("k".into(), || async { Err(Error::Disposed) })
			.await
			.expect_err("Resolution should fail.");

		assert!(matches!(err, Error::Disposed));
	}
}
