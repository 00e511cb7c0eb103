//! Transport primitives for discovery, registration, and token requests.
//!
//! The broker depends on HTTP only through [`OAuthHttpClient`]. Every outbound call (metadata
//! discovery, dynamic client registration, and the `oauth2` token exchanges) is issued through
//! the [`AsyncHttpClient`] handle the implementation returns, so a custom stack plugs in once and
//! serves all of them.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransientError, TransportError},
};

/// Abstraction over HTTP transports capable of executing OAuth requests.
///
/// Implementations must be `Send + Sync + 'static` so they can be shared by every dynamic
/// provider behind an `Arc`. The handles they return must own whatever state the request needs,
/// and the request future must be `Send`, so boxed provider futures inherit that guarantee.
pub trait OAuthHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle used for a single logical operation.
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds a handle for the next request.
	fn handle(&self) -> Self::Handle;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Token and registration endpoints must answer directly, so configure any custom client to
/// disable redirect following before wrapping it.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl OAuthHttpClient for ReqwestHttpClient {
	type Handle = ReqwestHandle;
	type TransportError = ReqwestError;

	fn handle(&self) -> Self::Handle {
		ReqwestHandle(self.0.clone())
	}
}

/// [`AsyncHttpClient`] adapter returned by [`ReqwestHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestHandle(ReqwestClient);
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for ReqwestHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = self.0.clone();

		Box::pin(async move {
			let response =
				client.execute(request.try_into().map_err(Box::new)?).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

/// Dispatches `request` through a fresh handle and maps transport failures.
pub(crate) async fn execute<C>(
	client: &C,
	endpoint: &str,
	request: HttpRequest,
) -> Result<HttpResponse>
where
	C: ?Sized + OAuthHttpClient,
{
	let handle = client.handle();

	handle.call(request).await.map_err(|e| map_http_client_error(endpoint, e))
}

/// Converts an [`HttpClientError`] into a broker [`Error`].
pub(crate) fn map_http_client_error<E>(endpoint: &str, err: HttpClientError<E>) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	match err {
		HttpClientError::Reqwest(inner) => TransportError::network(endpoint, *inner).into(),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::TokenEndpoint {
			message: format!("HTTP client error occurred while calling {endpoint}: {message}"),
			status: None,
		}
		.into(),
		_ => TransientError::TokenEndpoint {
			message: format!("HTTP client error occurred while calling {endpoint}"),
			status: None,
		}
		.into(),
	}
}

/// Canonical reason phrase for a status code, or an empty string.
pub(crate) fn status_text(response: &HttpResponse) -> &'static str {
	response.status().canonical_reason().unwrap_or_default()
}
