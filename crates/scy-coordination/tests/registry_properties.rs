//! Registry, discovery and module-level behavior against the deterministic
//! store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use scy_coordination::CoordinationConfig;
use scy_coordination::CoordinationModule;
use scy_coordination::RegisterCenter;
use scy_store::CoordinationStore;
use scy_store::CreateMode;
use scy_store::DeterministicCoordinationStore;
use scy_store::DeterministicSession;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("scy_coordination=debug,scy_store=info").try_init();
}

fn addresses(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_registration_visible_before_any_periodic_cycle() {
    init_tracing();
    let store = DeterministicCoordinationStore::new();
    let center = RegisterCenter::new(store.session(), "prod");

    assert!(center.register(["svcA"], "10.0.0.1:9000").await);
    assert_eq!(center.discover("svcA").await, addresses(&["10.0.0.1:9000"]));
}

#[tokio::test]
async fn test_own_registration_visible_after_earlier_empty_lookup() {
    let store = DeterministicCoordinationStore::new();
    let module = CoordinationModule::new(store.session(), CoordinationConfig::new("prod")).unwrap();
    let center = module.register_center();

    assert!(center.discover("svcA").await.is_empty());
    assert!(center.register(["svcA"], "10.0.0.1:9000").await);
    assert_eq!(center.discover("svcA").await, addresses(&["10.0.0.1:9000"]));
}

#[tokio::test]
async fn test_disabled_address_never_discovered() {
    let store = DeterministicCoordinationStore::new();
    let session = store.session();
    session
        .create("/scy-rpc/prod/svcA/10.0.0.2:9000", r#"{"enable":false}"#, CreateMode::Persistent)
        .await
        .unwrap();

    let center = RegisterCenter::new(session.clone(), "prod");
    center.register(["svcA"], "10.0.0.1:9000").await;

    assert_eq!(center.discover("svcA").await, addresses(&["10.0.0.1:9000"]));
    center.discovery().refresh("svcA").await.unwrap();
    assert!(session.exists("/scy-rpc/prod/svcA/10.0.0.2:9000").await.unwrap());
    assert_eq!(center.discover("svcA").await, addresses(&["10.0.0.1:9000"]));
}

#[tokio::test]
async fn test_successive_refreshes_replace_never_union() {
    let store = DeterministicCoordinationStore::new();
    let writer = store.session();
    let center = RegisterCenter::new(store.session(), "prod");

    for address in ["h:1", "h:2"] {
        writer
            .create(&format!("/scy-rpc/prod/svc/{address}"), r#"{"enable":true}"#, CreateMode::Persistent)
            .await
            .unwrap();
    }
    let first = center.discovery().refresh("svc").await.unwrap();
    assert_eq!(first, addresses(&["h:1", "h:2"]));

    writer.delete("/scy-rpc/prod/svc/h:1").await.unwrap();
    writer.delete("/scy-rpc/prod/svc/h:2").await.unwrap();
    writer.create("/scy-rpc/prod/svc/h:3", r#"{"enable":true}"#, CreateMode::Persistent).await.unwrap();

    let second = center.discovery().refresh("svc").await.unwrap();
    assert_eq!(second, addresses(&["h:3"]));
    assert!(first.is_disjoint(&second));
}

#[tokio::test]
async fn test_removed_registration_is_not_resurrected() {
    let store = DeterministicCoordinationStore::new();
    let center = RegisterCenter::new(store.session(), "prod");

    center.register(["svcA"], "10.0.0.1:9000").await;
    assert!(center.remove(["svcA"], "10.0.0.1:9000").await);

    center.registry().reconcile().await.unwrap();
    center.discovery().refresh("svcA").await.unwrap();
    assert!(center.discover("svcA").await.is_empty());
}

#[tokio::test]
async fn test_reconciliation_restores_registration_after_session_expiry() {
    let store = DeterministicCoordinationStore::new();
    let session = store.session();
    let center = RegisterCenter::new(session.clone(), "prod");

    center.register(["svcA", "svcB"], "10.0.0.1:9000").await;
    assert_eq!(session.expire(), 2);
    center.discovery().refresh("svcA").await.unwrap();
    assert!(center.discover("svcA").await.is_empty());

    assert_eq!(center.registry().reconcile().await.unwrap(), 2);
    center.discovery().refresh("svcA").await.unwrap();
    assert_eq!(center.discover("svcA").await, addresses(&["10.0.0.1:9000"]));
}

#[tokio::test]
async fn test_store_faults_degrade_to_safe_defaults() {
    let store = DeterministicCoordinationStore::new();
    let center = RegisterCenter::new(store.session(), "prod");
    center.register(["svcA"], "h:1").await;
    center.discover("svcA").await;

    store.set_unavailable(true);
    assert!(!center.register(["svcB"], "h:1").await);
    assert!(center.discover("svcB").await.is_empty());
    // Previously cached keys keep serving their last view.
    assert_eq!(center.discover("svcA").await, addresses(&["h:1"]));
    assert!(center.discovery().refresh("svcA").await.is_err());
    assert_eq!(center.discover("svcA").await, addresses(&["h:1"]));
}

async fn started_module(session: Arc<DeterministicSession>, env: &str) -> CoordinationModule<DeterministicSession> {
    let mut config = CoordinationConfig::new(env);
    config.registry.reconcile_interval_secs = 1;
    config.registry.discovery_refresh_interval_secs = 1;
    let module = CoordinationModule::new(session, config).unwrap();
    module.start().await.unwrap();
    module
}

#[tokio::test]
async fn test_watch_refreshes_view_without_polling() {
    init_tracing();
    let store = DeterministicCoordinationStore::new();
    let consumer = started_module(store.session(), "prod").await;
    let provider = RegisterCenter::new(store.session(), "prod");

    assert!(consumer.register_center().discover("svcA").await.is_empty());
    provider.register(["svcA"], "10.0.0.1:9000").await;

    let center = consumer.register_center();
    assert!(eventually(|| async move { center.discover("svcA").await == addresses(&["10.0.0.1:9000"]) }).await);

    provider.remove(["svcA"], "10.0.0.1:9000").await;
    assert!(eventually(|| async move { center.discover("svcA").await.is_empty() }).await);

    consumer.shutdown().await;
}

#[tokio::test]
async fn test_periodic_refresh_catches_missed_deletes() {
    let store = DeterministicCoordinationStore::new();
    let consumer = started_module(store.session(), "prod").await;
    let provider = store.session();
    provider
        .create("/scy-rpc/prod/svcA/h:1", r#"{"enable":true}"#, CreateMode::Ephemeral)
        .await
        .unwrap();

    let center = consumer.register_center();
    assert!(eventually(|| async move { center.discover("svcA").await == addresses(&["h:1"]) }).await);

    store.set_drop_delete_notifications(true);
    provider.expire();
    assert!(eventually(|| async move { center.discover("svcA").await.is_empty() }).await);

    consumer.shutdown().await;
}

#[tokio::test]
async fn test_module_reconciler_restores_own_registration() {
    let store = DeterministicCoordinationStore::new();
    let session = store.session();
    let module = started_module(session.clone(), "prod").await;

    module.register_center().register(["svcA"], "h:1").await;
    module.topics().register("orders", "billing").await;
    session.expire();

    let topics = module.topics();
    let session = &session;
    assert!(eventually(|| async move { session.exists("/scy-rpc/prod/svcA/h:1").await.unwrap_or(false) }).await);
    assert!(eventually(|| async move { topics.discover("orders").await == vec!["billing".to_string()] }).await);

    module.shutdown().await;
    assert_eq!(store.watch_count(), 0);
}

#[tokio::test]
async fn test_dynamic_configuration_through_module() {
    let store = DeterministicCoordinationStore::new();
    let session = store.session();
    let mut config = CoordinationConfig::new("prod");
    config.registry.reconcile_interval_secs = 1;
    let module = CoordinationModule::new(session.clone(), config).unwrap();

    let applied = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let sink = applied.clone();
    module
        .config_center()
        .register("request_timeout_ms", "500", move |value| {
            value.parse::<u64>()?;
            sink.lock().push(value.to_string());
            Ok(())
        })
        .unwrap();

    module.start().await.unwrap();
    assert_eq!(*applied.lock(), vec!["500".to_string()]);

    let path = "/application/config/dynamic_configuration/request_timeout_ms";
    session.create_or_update(path, "not-a-number", CreateMode::Persistent).await.unwrap();
    session.create_or_update(path, "750", CreateMode::Persistent).await.unwrap();

    let center = module.config_center();
    assert!(eventually(|| async move { center.get("request_timeout_ms").as_deref() == Some("750") }).await);
    assert!(!applied.lock().contains(&"not-a-number".to_string()));

    module.shutdown().await;
}
