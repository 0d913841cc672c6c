//! Install / activate lifecycle of a cache generation

use crate::offline_cache::intercept::{handle_fetch, FetchOutcome};
use crate::offline_cache::{CacheConfig, CacheError, CacheStorage, Network, PrecacheManifest};
use futures::future::try_join_all;
use serde::Serialize;
use shellcache_proto::{Destination, Request, RequestKey};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Lifecycle of one cache manager instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Waiting,
    Activating,
    Active,
    /// Superseded by a newer manager; every request passes through
    Redundant,
}

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub generation: String,
    pub entries: usize,
}

/// Result of an activation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub kept: String,
    pub deleted: Vec<String>,
    /// Stale generations that could not be deleted (left in place)
    pub failed: Vec<String>,
}

/// Fetch every manifest entry and store them as one unit
///
/// All fetches run concurrently. A transport error or a non-2xx status on
/// any entry fails the attempt before anything is written, so a generation
/// is never left holding a partial precache.
pub async fn handle_install(
    generation: &str,
    manifest: &PrecacheManifest,
    storage: &dyn CacheStorage,
    network: &dyn Network,
) -> Result<InstallReport, CacheError> {
    info!("Installing generation {} ({} precache entries)", generation, manifest.len());

    let fetches = manifest.entries().iter().map(|path| async move {
        let request = Request::get(path.as_str(), Destination::from_path(path));
        let response = network
            .fetch(&request)
            .await
            .map_err(|e| CacheError::Precache {
                url: path.clone(),
                reason: e.to_string(),
            })?;

        if !response.is_ok() {
            return Err(CacheError::Precache {
                url: path.clone(),
                reason: format!("HTTP status {}", response.status),
            });
        }

        debug!("Precached {} ({} bytes)", path, response.body.len());
        Ok::<_, CacheError>((RequestKey::get(path.as_str()), response))
    });

    let entries = try_join_all(fetches).await?;
    let count = entries.len();

    storage.open(generation).await?;
    storage.put_all(generation, entries).await?;

    info!("✅ Installed generation {} with {} entries", generation, count);
    Ok(InstallReport {
        generation: generation.to_string(),
        entries: count,
    })
}

/// Delete every generation other than `current_generation`
///
/// Deletion failures are logged and reported but do not fail activation;
/// a stale generation left behind only costs storage.
pub async fn handle_activate(
    current_generation: &str,
    storage: &dyn CacheStorage,
) -> Result<ActivationReport, CacheError> {
    let mut report = ActivationReport {
        kept: current_generation.to_string(),
        ..Default::default()
    };

    for generation in storage.generations().await? {
        if generation == current_generation {
            continue;
        }

        match storage.delete(&generation).await {
            Ok(_) => {
                info!("🗑️  Deleted stale generation: {}", generation);
                report.deleted.push(generation);
            }
            Err(e) => {
                warn!("Failed to delete stale generation {}: {}", generation, e);
                report.failed.push(generation);
            }
        }
    }

    Ok(report)
}

struct Inner {
    state: LifecycleState,
    install_running: bool,
    last_error: Option<String>,
}

/// One cache manager instance, bound to a single generation
///
/// The instance starts in `Installing`. A failed install leaves it there
/// so the caller can retry; requests are only intercepted while `Active`.
/// A retired manager is `Redundant` and accepts no further transitions.
pub struct CacheManager {
    config: CacheConfig,
    storage: Arc<dyn CacheStorage>,
    inner: Mutex<Inner>,
}

impl CacheManager {
    pub fn new(config: CacheConfig, storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            config,
            storage,
            inner: Mutex::new(Inner {
                state: LifecycleState::Installing,
                install_running: false,
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> &str {
        self.config.generation()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &dyn CacheStorage {
        self.storage.as_ref()
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Message of the most recent failed install or activation
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Precache the manifest; `Installing` -> `Waiting` on success
    pub async fn install(&self, network: &dyn Network) -> Result<InstallReport, CacheError> {
        {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Installing {
                return Err(CacheError::InvalidTransition {
                    from: inner.state,
                    action: "install",
                });
            }
            if inner.install_running {
                return Err(CacheError::InvalidTransition {
                    from: inner.state,
                    action: "start a second install",
                });
            }
            inner.install_running = true;
        }

        let result = handle_install(
            self.generation(),
            &self.config.manifest,
            self.storage.as_ref(),
            network,
        )
        .await;

        let mut inner = self.lock();
        inner.install_running = false;
        match &result {
            Ok(_) => {
                inner.state = LifecycleState::Waiting;
                inner.last_error = None;
            }
            Err(e) => {
                error!("Install of generation {} failed: {}", self.generation(), e);
                inner.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Evict stale generations; `Waiting` -> `Activating` -> `Active`
    pub async fn activate(&self) -> Result<ActivationReport, CacheError> {
        {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Waiting {
                return Err(CacheError::InvalidTransition {
                    from: inner.state,
                    action: "activate",
                });
            }
            inner.state = LifecycleState::Activating;
        }
        info!("Activating generation {}", self.generation());

        let result = handle_activate(self.generation(), self.storage.as_ref()).await;

        let mut inner = self.lock();
        match &result {
            Ok(report) => {
                inner.state = LifecycleState::Active;
                inner.last_error = None;
                info!(
                    "✅ Generation {} active ({} stale deleted)",
                    self.generation(),
                    report.deleted.len()
                );
            }
            Err(e) => {
                error!("Activation of generation {} failed: {}", self.generation(), e);
                inner.state = LifecycleState::Waiting;
                inner.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Take this manager out of service once a newer one replaces it
    pub fn retire(&self) {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Redundant {
            debug!("Generation {} is now redundant", self.generation());
            inner.state = LifecycleState::Redundant;
        }
    }

    /// Intercept a request; everything passes through unless `Active`
    pub async fn fetch(
        &self,
        request: &Request,
        network: &dyn Network,
    ) -> Result<FetchOutcome, CacheError> {
        if self.state() != LifecycleState::Active {
            return Ok(FetchOutcome::Passthrough);
        }
        handle_fetch(request, &self.config.policy, self.storage.as_ref(), network).await
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("generation", &self.generation())
            .field("state", &self.state())
            .field("storage", &self.storage.storage_type())
            .finish()
    }
}
