pub mod config;
pub mod offline_cache;
pub mod push;
pub mod server;

// Re-export commonly used types
pub use offline_cache::{CacheError, CacheStorage, FetchOutcome, Network};
pub use push::{NotificationOutbox, PushConfig};

use offline_cache::{ActivationReport, CacheConfig, CacheManager, InstallReport, LifecycleState};
use serde::Serialize;
use shellcache_proto::Request;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

pub type AppState = std::sync::Arc<ShellState>;

/// Outcome of rolling out a new generation
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub install: InstallReport,
    /// `None` when the new manager was left waiting
    pub activation: Option<ActivationReport>,
    pub state: LifecycleState,
}

/// Snapshot of the cache for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ShellStatus {
    pub active_generation: Option<String>,
    pub state: Option<LifecycleState>,
    pub storage_type: String,
    pub generations: Vec<String>,
    pub entries: usize,
}

/// Everything the host adapter shares between requests
pub struct ShellState {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Box<dyn Network>,
    pub push: PushConfig,
    pub outbox: Arc<NotificationOutbox>,
    // The manager currently serving requests
    active: RwLock<Option<Arc<CacheManager>>>,
    // A manager that installed but was told to wait
    waiting: RwLock<Option<Arc<CacheManager>>>,
    rollout: tokio::sync::Mutex<()>,
}

impl ShellState {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Box<dyn Network>,
        push: PushConfig,
        outbox: Arc<NotificationOutbox>,
    ) -> Self {
        Self {
            storage,
            network,
            push,
            outbox,
            active: RwLock::new(None),
            waiting: RwLock::new(None),
            rollout: tokio::sync::Mutex::new(()),
        }
    }

    pub fn active_manager(&self) -> Option<Arc<CacheManager>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn waiting_manager(&self) -> Option<Arc<CacheManager>> {
        self.waiting
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Swap in a new active manager and retire the one it replaces
    fn set_active(&self, manager: Arc<CacheManager>) {
        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(manager);
        if let Some(previous) = previous {
            previous.retire();
        }
    }

    fn take_waiting(&self) -> Option<Arc<CacheManager>> {
        self.waiting
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_waiting(&self, manager: Arc<CacheManager>) {
        let previous = self
            .waiting
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(manager);
        if let Some(previous) = previous {
            info!("Generation {} superseded while waiting", previous.generation());
            previous.retire();
        }
    }

    /// Install a new generation and, unless told to wait, activate it
    ///
    /// The previous manager keeps serving until the new one is active, so a
    /// failed install leaves traffic on the old generation. Rollouts are
    /// serialized: only one deploy or activation runs at a time.
    pub async fn deploy(&self, config: CacheConfig) -> Result<DeployReport, CacheError> {
        let _rollout = self.rollout.lock().await;

        let skip_waiting = config.skip_waiting;
        let manager = Arc::new(CacheManager::new(config, self.storage.clone()));

        let install = manager.install(self.network.as_ref()).await?;

        if !skip_waiting {
            info!("Generation {} installed, waiting for activation", manager.generation());
            self.set_waiting(manager.clone());
            return Ok(DeployReport {
                install,
                activation: None,
                state: manager.state(),
            });
        }

        let activation = manager.activate().await?;
        // Activation evicted any waiting generation's storage
        if let Some(stale) = self.take_waiting() {
            info!("Discarding waiting generation {}", stale.generation());
            stale.retire();
        }
        self.set_active(manager.clone());
        Ok(DeployReport {
            install,
            activation: Some(activation),
            state: manager.state(),
        })
    }

    /// Activate the generation left waiting by an earlier deploy
    ///
    /// A waiting manager whose generation is no longer stored is retired
    /// instead of activated.
    pub async fn activate_waiting(&self) -> Result<Option<ActivationReport>, CacheError> {
        let _rollout = self.rollout.lock().await;

        // Stays in the waiting slot if activation fails and can be retried
        let Some(manager) = self.waiting_manager() else {
            return Ok(None);
        };

        let generations = self.storage.generations().await?;
        if !generations.iter().any(|g| g == manager.generation()) {
            warn!(
                "Waiting generation {} is no longer stored, refusing to activate",
                manager.generation()
            );
            self.take_waiting();
            manager.retire();
            return Err(CacheError::UnknownGeneration(manager.generation().to_string()));
        }

        let report = manager.activate().await?;
        self.take_waiting();
        self.set_active(manager);
        Ok(Some(report))
    }

    /// Route a request through the active manager, if there is one
    pub async fn intercept(&self, request: &Request) -> Result<FetchOutcome, CacheError> {
        match self.active_manager() {
            Some(manager) => manager.fetch(request, self.network.as_ref()).await,
            None => Ok(FetchOutcome::Passthrough),
        }
    }

    pub async fn status(&self) -> Result<ShellStatus, CacheError> {
        let manager = self.active_manager();
        let entries = match &manager {
            Some(m) => self.storage.entry_count(m.generation()).await?,
            None => 0,
        };

        Ok(ShellStatus {
            active_generation: manager.as_ref().map(|m| m.generation().to_string()),
            state: manager.as_ref().map(|m| m.state()),
            storage_type: self.storage.storage_type().to_string(),
            generations: self.storage.generations().await?,
            entries,
        })
    }
}

impl std::fmt::Debug for ShellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellState")
            .field("storage", &self.storage.storage_type())
            .field("network", &"<dyn Network>")
            .field("push", &self.push)
            .field("active", &self.active_manager())
            .finish()
    }
}
