use shellcache_proto::{Destination, Request, RequestKey, Response};
use shellcache_server::offline_cache::memory::MemoryCacheStorage;
use shellcache_server::offline_cache::sqlite::SqliteCacheStorage;
use shellcache_server::offline_cache::{
    handle_activate, handle_install, CacheConfig, CacheManager, LifecycleState, PrecacheManifest,
};
use shellcache_server::{
    CacheError, CacheStorage, FetchOutcome, Network, NotificationOutbox, PushConfig, ShellState,
};
use std::sync::Arc;
use tokio::sync::Notify;

mod common;
use common::{FakeNetwork, InstrumentedStorage};

fn shell_network() -> FakeNetwork {
    let network = FakeNetwork::new();
    network
        .serve("/", Response::basic(200, "<html>shell</html>"))
        .serve("/app.js", Response::basic(200, "app()"))
        .serve("/offline.html", Response::basic(200, "<h1>Offline</h1>"));
    network
}

fn manifest(paths: &[&str]) -> PrecacheManifest {
    PrecacheManifest::new(paths.iter().copied()).unwrap()
}

#[tokio::test]
async fn install_stores_every_manifest_entry() {
    let storage = MemoryCacheStorage::new();
    let network = shell_network();

    let report = handle_install("v1", &manifest(&["/", "/app.js"]), &storage, &network)
        .await
        .unwrap();

    assert_eq!(report.entries, 2);
    assert_eq!(storage.entry_count("v1").await.unwrap(), 2);
    assert_eq!(
        storage.lookup("v1", &RequestKey::get("/app.js")).await.unwrap(),
        Some(Response::basic(200, "app()"))
    );
}

#[tokio::test]
async fn install_fails_as_a_whole_when_one_entry_fails() {
    let storage = InstrumentedStorage::new();
    let network = shell_network();
    network.fail("/app.js");

    let err = handle_install("v1", &manifest(&["/", "/app.js"]), &storage, &network)
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Precache { url, .. } if url == "/app.js"));
    assert_eq!(storage.writes(), 0, "nothing is written for a failed install");
    assert!(storage.generations().await.unwrap().is_empty());
}

#[tokio::test]
async fn install_rejects_error_status() {
    let storage = MemoryCacheStorage::new();
    let network = shell_network();

    // "/manifest.json" is not served, so the fake answers 404
    let err = handle_install("v1", &manifest(&["/", "/manifest.json"]), &storage, &network)
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Precache { reason, .. } if reason.contains("404")));
    assert_eq!(storage.entry_count("v1").await.unwrap(), 0);
}

#[tokio::test]
async fn failed_install_stays_retryable() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
    let network = shell_network();
    network.fail("/app.js");

    let manager = CacheManager::new(
        CacheConfig::new("v1", manifest(&["/", "/app.js"])),
        storage.clone(),
    );

    assert!(manager.install(&network).await.is_err());
    assert_eq!(manager.state(), LifecycleState::Installing);
    assert!(manager.last_error().unwrap().contains("/app.js"));
    assert_eq!(storage.entry_count("v1").await.unwrap(), 0);

    network.recover("/app.js");
    let report = manager.install(&network).await.unwrap();

    assert_eq!(report.entries, 2);
    assert_eq!(manager.state(), LifecycleState::Waiting);
    assert!(manager.last_error().is_none());
}

#[tokio::test]
async fn activation_evicts_every_other_generation() {
    let storage = MemoryCacheStorage::new();
    storage.open("v0").await.unwrap();
    storage.open("v1").await.unwrap();
    storage.put("v0", RequestKey::get("/"), Response::basic(200, "v0")).await.unwrap();
    storage.put("v1", RequestKey::get("/"), Response::basic(200, "v1")).await.unwrap();
    storage
        .put_all(
            "v2",
            vec![
                (RequestKey::get("/"), Response::basic(200, "v2")),
                (RequestKey::get("/app.js"), Response::basic(200, "app()")),
            ],
        )
        .await
        .unwrap();

    let report = handle_activate("v2", &storage).await.unwrap();

    assert_eq!(report.kept, "v2");
    assert_eq!(report.deleted, vec!["v0".to_string(), "v1".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(storage.generations().await.unwrap(), vec!["v2".to_string()]);
    assert_eq!(storage.entry_count("v2").await.unwrap(), 2);
}

#[tokio::test]
async fn activation_continues_past_a_failed_delete() {
    let storage = InstrumentedStorage::new();
    storage.open("v0").await.unwrap();
    storage.open("v1").await.unwrap();
    storage.open("v2").await.unwrap();
    storage.refuse_delete("v0");

    let report = handle_activate("v2", &storage).await.unwrap();

    assert_eq!(report.deleted, vec!["v1".to_string()]);
    assert_eq!(report.failed, vec!["v0".to_string()]);
    assert_eq!(
        storage.generations().await.unwrap(),
        vec!["v0".to_string(), "v2".to_string()]
    );
}

#[tokio::test]
async fn new_generation_replaces_old_one() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
    let network = shell_network();

    let v1 = CacheManager::new(CacheConfig::new("v1", manifest(&["/"])), storage.clone());
    v1.install(&network).await.unwrap();
    v1.activate().await.unwrap();

    let v2 = CacheManager::new(CacheConfig::new("v2", manifest(&["/", "/app.js"])), storage.clone());
    v2.install(&network).await.unwrap();

    // Both generations exist until v2 activates; v1 is still serving
    assert_eq!(
        storage.generations().await.unwrap(),
        vec!["v1".to_string(), "v2".to_string()]
    );
    let outcome = v1
        .fetch(&Request::get("/", Destination::Document), &network)
        .await
        .unwrap();
    assert!(matches!(outcome, FetchOutcome::Cached(_)));

    v2.activate().await.unwrap();

    assert_eq!(storage.generations().await.unwrap(), vec!["v2".to_string()]);
    let outcome = v2
        .fetch(&Request::get("/app.js", Destination::Script), &network)
        .await
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Cached(Response::basic(200, "app()")));
}

#[tokio::test]
async fn sqlite_backend_runs_the_full_lifecycle() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let storage: Arc<dyn CacheStorage> =
        Arc::new(SqliteCacheStorage::new(temp_dir.path().join("shellcache.db")).unwrap());
    let network = shell_network();

    storage.open("v1").await.unwrap();
    storage.put("v1", RequestKey::get("/"), Response::basic(200, "stale")).await.unwrap();

    let manager = CacheManager::new(
        CacheConfig::new("v2", manifest(&["/", "/app.js", "/offline.html"])),
        storage.clone(),
    );
    manager.install(&network).await.unwrap();
    let report = manager.activate().await.unwrap();

    assert_eq!(report.deleted, vec!["v1".to_string()]);
    assert_eq!(storage.entry_count("v2").await.unwrap(), 3);

    network.set_offline(true);
    let outcome = manager
        .fetch(&Request::get("/customers", Destination::Document), &network)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::OfflineFallback(Response::basic(200, "<h1>Offline</h1>"))
    );
}

fn shell_state(network: &FakeNetwork) -> ShellState {
    ShellState::new(
        Arc::new(MemoryCacheStorage::new()),
        Box::new(network.clone()),
        PushConfig::default(),
        Arc::new(NotificationOutbox::new()),
    )
}

#[tokio::test]
async fn failed_deploy_keeps_previous_generation_serving() {
    let network = shell_network();
    let state = shell_state(&network);

    state.deploy(CacheConfig::new("v1", manifest(&["/"]))).await.unwrap();

    network.fail("/app.js");
    let err = state
        .deploy(CacheConfig::new("v2", manifest(&["/", "/app.js"])))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Precache { .. }));

    let status = state.status().await.unwrap();
    assert_eq!(status.active_generation.as_deref(), Some("v1"));
    assert_eq!(status.state, Some(LifecycleState::Active));
    assert_eq!(status.generations, vec!["v1".to_string()]);

    let outcome = state
        .intercept(&Request::get("/", Destination::Document))
        .await
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Cached(Response::basic(200, "<html>shell</html>")));
}

#[tokio::test]
async fn deploy_without_skip_waiting_needs_explicit_activation() {
    let network = shell_network();
    let state = shell_state(&network);
    state.deploy(CacheConfig::new("v1", manifest(&["/"]))).await.unwrap();

    let mut config = CacheConfig::new("v2", manifest(&["/", "/app.js"]));
    config.skip_waiting = false;
    let report = state.deploy(config).await.unwrap();

    assert_eq!(report.state, LifecycleState::Waiting);
    assert!(report.activation.is_none());
    assert_eq!(state.active_manager().unwrap().generation(), "v1");

    let activation = state.activate_waiting().await.unwrap().unwrap();
    assert_eq!(activation.deleted, vec!["v1".to_string()]);
    assert_eq!(state.active_manager().unwrap().generation(), "v2");

    assert!(state.activate_waiting().await.unwrap().is_none());
}

#[tokio::test]
async fn requests_pass_through_before_any_deploy() {
    let network = shell_network();
    let state = shell_state(&network);

    let outcome = state
        .intercept(&Request::get("/", Destination::Document))
        .await
        .unwrap();

    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert_eq!(network.calls(), 0);
}

fn wait_config(generation: &str, paths: &[&str]) -> CacheConfig {
    let mut config = CacheConfig::new(generation, manifest(paths));
    config.skip_waiting = false;
    config
}

#[tokio::test]
async fn immediate_deploy_discards_an_older_waiting_generation() {
    let network = shell_network();
    let state = shell_state(&network);

    state.deploy(CacheConfig::new("v1", manifest(&["/"]))).await.unwrap();
    state.deploy(wait_config("v2", &["/"])).await.unwrap();
    let v2 = state.waiting_manager().unwrap();

    state
        .deploy(CacheConfig::new("v3", manifest(&["/", "/offline.html"])))
        .await
        .unwrap();

    assert_eq!(v2.state(), LifecycleState::Redundant);
    assert!(state.waiting_manager().is_none());
    assert!(state.activate_waiting().await.unwrap().is_none());

    let status = state.status().await.unwrap();
    assert_eq!(status.active_generation.as_deref(), Some("v3"));
    assert_eq!(status.generations, vec!["v3".to_string()]);
    assert_eq!(status.entries, 2);

    network.set_offline(true);
    let outcome = state
        .intercept(&Request::get("/fleet", Destination::Document))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::OfflineFallback(Response::basic(200, "<h1>Offline</h1>"))
    );
}

#[tokio::test]
async fn waiting_generation_that_lost_its_storage_is_not_activated() {
    let network = shell_network();
    let state = shell_state(&network);

    state.deploy(CacheConfig::new("v1", manifest(&["/"]))).await.unwrap();
    state.deploy(wait_config("v2", &["/"])).await.unwrap();
    state.storage.delete("v2").await.unwrap();

    let err = state.activate_waiting().await.unwrap_err();

    assert!(matches!(err, CacheError::UnknownGeneration(g) if g == "v2"));
    let status = state.status().await.unwrap();
    assert_eq!(status.active_generation.as_deref(), Some("v1"));
    assert_eq!(status.generations, vec!["v1".to_string()]);
}

#[tokio::test]
async fn replaced_manager_is_retired() {
    let network = shell_network();
    let state = shell_state(&network);

    state.deploy(CacheConfig::new("v1", manifest(&["/"]))).await.unwrap();
    let v1 = state.active_manager().unwrap();
    state.deploy(CacheConfig::new("v2", manifest(&["/"]))).await.unwrap();

    assert_eq!(v1.state(), LifecycleState::Redundant);
    let outcome = v1
        .fetch(&Request::get("/", Destination::Document), &network)
        .await
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Passthrough);
}

/// Holds fetches of one URL until released
#[derive(Clone)]
struct GatedNetwork {
    inner: FakeNetwork,
    gated_url: &'static str,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait::async_trait]
impl Network for GatedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
        if request.url == self.gated_url {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch(request).await
    }
}

#[tokio::test]
async fn in_flight_miss_does_not_resurrect_evicted_generation() {
    let network = shell_network();
    network.serve("/data", Response::basic(200, "rows"));
    let gated = GatedNetwork {
        inner: network.clone(),
        gated_url: "/data",
        entered: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    };

    let state = Arc::new(ShellState::new(
        Arc::new(MemoryCacheStorage::new()),
        Box::new(gated.clone()),
        PushConfig::default(),
        Arc::new(NotificationOutbox::new()),
    ));
    state.deploy(CacheConfig::new("v1", manifest(&["/"]))).await.unwrap();

    let in_flight = {
        let state = state.clone();
        tokio::spawn(async move { state.intercept(&Request::get("/data", Destination::Empty)).await })
    };
    gated.entered.notified().await;

    let report = state.deploy(CacheConfig::new("v2", manifest(&["/"]))).await.unwrap();
    assert_eq!(report.activation.unwrap().deleted, vec!["v1".to_string()]);

    gated.release.notify_one();
    let outcome = in_flight.await.unwrap().unwrap();

    assert_eq!(outcome, FetchOutcome::Network(Response::basic(200, "rows")));
    assert_eq!(state.storage.generations().await.unwrap(), vec!["v2".to_string()]);
    assert_eq!(state.storage.entry_count("v1").await.unwrap(), 0);
}
