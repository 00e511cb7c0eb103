#![cfg(feature = "test")]

// self
use auth_provider_broker::{
	_preludet::*,
	auth::{ConsumerId, ProviderId},
	broker::AuthBroker,
	config::BrokerConfig,
	consumer::ConsumerKind,
	query::{CLEAR_ALL_CONFIRMATION, EntityCount},
	session::{SessionOptions, SessionRequest},
};

fn broker_with(providers: impl IntoIterator<Item = StaticProvider>) -> AuthBroker {
	let broker = test_broker(Arc::new(ScriptedInteraction::new()));

	for provider in providers {
		broker.registry().register_provider(Arc::new(provider)).expect("Registration should succeed.");
	}

	broker
}

fn github() -> StaticProvider {
	StaticProvider::new("github", "GitHub")
		.with_info(|info| info.with_multiple_accounts())
		.with_session("alice", &["read"])
		.with_session("bob", &["read"])
}

fn record_usage(broker: &AuthBroker, kind: ConsumerKind, label: &str, consumer: &str, at: i64) {
	broker
		.policy()
		.kind(kind)
		.usage
		.add_usage_at("github", label, &["read".into()], consumer, consumer, at)
		.expect("Usage write should succeed.");
}

#[tokio::test]
async fn clearing_all_data_requires_the_confirmation_phrase() {
	let broker = broker_with([github()]);
	let query = broker.query();
	let alice = query.account("github", "alice");

	alice.extension("pub.ext").set_access_allowed(true, Some("Ext")).expect("Access write should succeed.");
	alice.mcp_server("mcp").add_usage(&["read".into()], "MCP").expect("Usage write should succeed.");

	assert!(matches!(
		query.clear_all_data("yes please", false).await,
		Err(Error::ConfirmationRequired)
	));
	assert_eq!(alice.extension("pub.ext").is_access_allowed(), Some(true));

	query
		.clear_all_data(CLEAR_ALL_CONFIRMATION, false)
		.await
		.expect("Confirmed clear should succeed.");

	assert_eq!(alice.extension("pub.ext").is_access_allowed(), None);
	assert!(alice.mcp_server("mcp").get_usage().is_empty());
	assert!(!alice.entities().has_any_usage());
}

#[tokio::test]
async fn usage_stats_list_accounts_most_recent_first() {
	let broker = broker_with([github()]);

	record_usage(&broker, ConsumerKind::Extension, "alice", "pub.one", 1_000);
	record_usage(&broker, ConsumerKind::McpServer, "alice", "mcp", 2_000);
	record_usage(&broker, ConsumerKind::Extension, "bob", "pub.two", 5_000);

	let provider = broker.query().provider("github");
	let stats = provider.get_usage_stats().await;

	assert_eq!(stats.total_accounts, 2);
	assert_eq!(stats.total_sessions, 3);
	assert_eq!(
		stats.recent_activity.iter().map(|a| (a.account_label.as_str(), a.last_used)).collect::<Vec<_>>(),
		vec![("bob", 5_000), ("alice", 2_000)]
	);

	let entities = provider.get_active_entities().await;

	assert_eq!(entities.extensions, vec!["pub.one".to_owned(), "pub.two".to_owned()]);
	assert_eq!(entities.mcp_servers, vec!["mcp".to_owned()]);
	assert_eq!(
		provider.extension("pub.one").get_last_used_account().await.as_deref(),
		Some("alice")
	);
	assert_eq!(provider.extension("PUB.TWO").get_used_accounts().await, vec!["bob".to_owned()]);
}

#[tokio::test]
async fn providers_with_access_hide_internal_ids_unless_asked() {
	let broker = broker_with([
		github(),
		StaticProvider::new("__internal", "Internal").with_session("alice", &["read"]),
	]);
	let query = broker.query();

	for provider in ["github", "__internal"] {
		query
			.account(provider, "alice")
			.extension("pub.ext")
			.set_access_allowed(true, None)
			.expect("Access write should succeed.");
		query
			.provider(provider)
			.extension("pub.ext")
			.set_account_preference("alice")
			.expect("Preference write should succeed.");
	}

	let consumer = query.extension("Pub.Ext");
	let visible = consumer.get_providers_with_access(false).await;
	let all = consumer.get_providers_with_access(true).await;

	assert_eq!(visible.iter().map(ProviderId::as_str).collect::<Vec<_>>(), vec!["github"]);
	assert_eq!(all.iter().map(ProviderId::as_str).collect::<Vec<_>>(), vec!["__internal", "github"]);
	assert_eq!(consumer.get_all_account_preferences(false).len(), 1);
	assert_eq!(consumer.get_all_account_preferences(true).len(), 2);
	assert_eq!(query.get_provider_ids(false).len(), 1);
}

#[tokio::test]
async fn removing_one_consumers_usage_keeps_everyone_elses() {
	let broker = broker_with([github()]);

	record_usage(&broker, ConsumerKind::Extension, "alice", "pub.one", 1_000);
	record_usage(&broker, ConsumerKind::Extension, "alice", "pub.two", 2_000);

	let alice = broker.query().account("github", "alice");

	alice.extension("pub.one").remove_usage().expect("Usage removal should succeed.");

	assert!(alice.extension("pub.one").get_usage().is_empty());

	let remaining = alice.extension("pub.two").get_usage();

	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].last_used, 2_000);
}

#[tokio::test]
async fn entity_views_cover_both_kinds() {
	let broker = broker_with([github()]);
	let alice = broker.query().account("github", "alice");

	alice.extensions().allow_access(&["pub.one", "pub.two"]).expect("Access write should succeed.");
	alice.extensions().remove_access(&["pub.two"]).expect("Access write should succeed.");
	record_usage(&broker, ConsumerKind::McpServer, "alice", "mcp", 1_000);

	assert_eq!(
		alice.entities().get_entity_count(),
		EntityCount { extensions: 1, mcp_servers: 1, total: 2 }
	);

	let mut visited = Vec::new();

	alice.entities().for_each(|id, kind| visited.push((id.to_owned(), kind)));

	assert_eq!(
		visited,
		vec![
			("pub.one".to_owned(), ConsumerKind::Extension),
			("pub.two".to_owned(), ConsumerKind::Extension),
			("mcp".to_owned(), ConsumerKind::McpServer),
		]
	);

	alice.entities().remove_all_access().expect("Access removal should succeed.");

	assert!(alice.extensions().get_allowed().is_empty());
	assert_eq!(alice.extension("pub.one").is_access_allowed(), Some(false));
}

#[tokio::test]
async fn trusted_consumers_get_sessions_without_prompts() {
	let config = BrokerConfig::from_json_str(
		r#"{ "trusted_extension_auth_access": { "github": ["Pub.Trusted"] } }"#,
	)
	.expect("Config should parse.");
	let interaction = Arc::new(ScriptedInteraction::new());
	let broker = test_broker_with_config(config, interaction.clone());

	broker
		.registry()
		.register_provider(Arc::new(StaticProvider::new("github", "GitHub").with_session("alice", &["read"])))
		.expect("Registration should succeed.");

	let session = broker
		.extensions()
		.get_session(
			&ProviderId::new("github").expect("Provider id should be valid."),
			SessionRequest::scopes(["read"]),
			&ConsumerId::new("pub.trusted").expect("Consumer id should be valid."),
			"Trusted",
			SessionOptions::default(),
		)
		.await
		.expect("Resolution should succeed.");

	assert_eq!(session.map(|s| s.account.label), Some("alice".into()));
	assert!(interaction.shown().is_empty());

	let alice = broker.query().account("github", "alice");

	assert!(alice.extension("pub.trusted").is_trusted());
	assert!(!alice.extension("pub.other").is_trusted());
	assert!(alice.extensions().get_allowed().iter().any(|c| c.id == "pub.trusted" && c.trusted == Some(true)));
}

#[tokio::test]
async fn preference_writes_are_broadcast() {
	let broker = broker_with([github()]);
	let mut changes = broker.query().subscribe_preference_changes();

	broker
		.query()
		.account("github", "bob")
		.extension("pub.ext")
		.set_as_preferred()
		.expect("Preference write should succeed.");

	let change = changes.try_recv().expect("A preference change should be published.");

	assert_eq!(change.provider_id, "github");
	assert!(change.consumer_ids.contains(&"pub.ext".to_owned()));
	assert!(broker.query().account("github", "bob").extension("pub.ext").is_preferred());
}
