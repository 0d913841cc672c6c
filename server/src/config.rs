//! Runtime configuration
//!
//! Process-level settings come from `SHELLCACHE_*` environment variables;
//! the cache generation, precache manifest and push settings come from an
//! optional JSON file named by `SHELLCACHE_CONFIG`.

use crate::offline_cache::{
    CacheConfig, CacheError, ExclusionSet, InterceptPolicy, PrecacheManifest,
    DEFAULT_OFFLINE_FALLBACK,
};
use crate::push::PushConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_BIND: &str = "127.0.0.1:8724";
pub const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:3000";
pub const DEFAULT_STORAGE_DIR: &str = "./shellcache-storage";

/// Generation identifier used when the config file names none
pub fn default_generation() -> String {
    format!("shell-v{}", env!("CARGO_PKG_VERSION"))
}

fn default_offline_fallback() -> String {
    DEFAULT_OFFLINE_FALLBACK.to_string()
}

fn default_skip_waiting() -> bool {
    true
}

/// Process settings taken from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub storage_dir: PathBuf,
    pub bind: String,
    pub upstream: String,
    pub shell_config: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            storage_dir: lookup("SHELLCACHE_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            bind: lookup("SHELLCACHE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            upstream: lookup("SHELLCACHE_UPSTREAM").unwrap_or_else(|| DEFAULT_UPSTREAM.to_string()),
            shell_config: lookup("SHELLCACHE_CONFIG").map(PathBuf::from),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("shellcache.db")
    }
}

/// Contents of the JSON shell config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_generation")]
    pub generation: String,
    #[serde(default)]
    pub precache: PrecacheManifest,
    #[serde(default = "default_offline_fallback")]
    pub offline_fallback: String,
    #[serde(default)]
    pub exclusions: ExclusionSet,
    #[serde(default = "default_skip_waiting")]
    pub skip_waiting: bool,
    #[serde(default)]
    pub push: PushConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            generation: default_generation(),
            precache: PrecacheManifest::default(),
            offline_fallback: default_offline_fallback(),
            exclusions: ExclusionSet::default(),
            skip_waiting: default_skip_waiting(),
            push: PushConfig::default(),
        }
    }
}

impl ShellConfig {
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        let config: ShellConfig =
            serde_json::from_str(json).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        info!(
            "Loaded shell config from {} (generation {}, {} precache entries)",
            path.display(),
            config.generation,
            config.precache.len()
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), CacheError> {
        if self.generation.trim().is_empty() {
            return Err(CacheError::Config("generation must not be empty".to_string()));
        }
        if !self.offline_fallback.starts_with('/') {
            return Err(CacheError::Config(format!(
                "offline_fallback {:?} is not a root-relative path",
                self.offline_fallback
            )));
        }
        if !self.precache.contains(&self.offline_fallback) {
            warn!(
                "Offline fallback {} is not precached; it is only served if cached at runtime",
                self.offline_fallback
            );
        }
        Ok(())
    }

    /// Cache manager configuration for this shell
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            manifest: self.precache.clone(),
            policy: InterceptPolicy {
                generation: self.generation.clone(),
                exclusions: self.exclusions.clone(),
                offline_fallback: self.offline_fallback.clone(),
            },
            skip_waiting: self.skip_waiting,
        }
    }
}
