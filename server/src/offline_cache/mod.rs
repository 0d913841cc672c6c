//! Offline cache manager for the application shell
//!
//! This module decides, per outgoing resource request, whether to answer
//! from the current cache generation or from the network, keeps the
//! generation populated from eligible network responses, and evicts stale
//! generations on activation. Storage and network are injected through the
//! [`CacheStorage`] and [`Network`] traits so the policy can run against
//! fakes in tests.

pub mod fetcher;
pub mod intercept;
pub mod lifecycle;
pub mod manifest;
pub mod memory;
pub mod sqlite;

pub use intercept::{handle_fetch, FetchOutcome};
pub use lifecycle::{
    handle_activate, handle_install, ActivationReport, CacheManager, InstallReport,
    LifecycleState,
};
pub use manifest::PrecacheManifest;

use serde::{Deserialize, Serialize};
use shellcache_proto::{Request, RequestKey, Response};
use thiserror::Error;

/// Default path of the document served for failed navigations
pub const DEFAULT_OFFLINE_FALLBACK: &str = "/offline.html";

/// Error type for offline cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Precache failed for {url}: {reason}")]
    Precache { url: String, reason: String },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Cannot {action} while {from:?}")]
    InvalidTransition {
        from: LifecycleState,
        action: &'static str,
    },

    #[error("Generation {0} does not exist")]
    UnknownGeneration(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

/// Trait for the store holding cache generations
///
/// A generation is a named container of request -> response snapshots.
/// Writes only ever add entries or drop a whole generation, so backends
/// need per-key atomicity and an atomic multi-entry insert for precaching,
/// nothing more.
#[async_trait::async_trait]
pub trait CacheStorage: Send + Sync {
    /// List the identifiers of every stored generation
    async fn generations(&self) -> Result<Vec<String>, CacheError>;

    /// Create the generation container if it does not exist
    async fn open(&self, generation: &str) -> Result<(), CacheError>;

    /// Delete a generation and all of its entries
    ///
    /// Returns `false` if the generation did not exist.
    async fn delete(&self, generation: &str) -> Result<bool, CacheError>;

    /// Look up a single entry; a missing generation is a miss
    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError>;

    /// Store one entry, replacing any previous snapshot for the key
    ///
    /// Only writes into a generation that already exists; a generation that
    /// was never opened or has been deleted is `UnknownGeneration`.
    async fn put(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError>;

    /// Store a set of entries atomically: all of them or none
    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError>;

    /// Number of entries in a generation (0 if it does not exist)
    async fn entry_count(&self, generation: &str) -> Result<usize, CacheError>;

    /// Get the storage type identifier (e.g., "memory", "sqlite")
    fn storage_type(&self) -> &str;
}

/// Trait for issuing requests to the network
///
/// Connectivity failures are reported as [`CacheError::Network`]; any
/// response that arrives, whatever its status, is `Ok`.
#[async_trait::async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError>;
}

/// Hostname substrings whose requests are never intercepted
///
/// Matching is a plain substring test against the whole URL, so an
/// unrelated host that happens to contain one of the patterns is excluded
/// as well. Behind the HTTP adapter, same-origin requests carry only a
/// path; hosts are visible for absolute-form (forward proxy) targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionSet {
    patterns: Vec<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| url.contains(p.as_str()))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for ExclusionSet {
    /// Identity provider, Google APIs and static CDN
    fn default() -> Self {
        Self::new(["firebase", "googleapis", "gstatic"])
    }
}

/// Parameters of request interception for one generation
#[derive(Debug, Clone)]
pub struct InterceptPolicy {
    pub generation: String,
    pub exclusions: ExclusionSet,
    pub offline_fallback: String,
}

impl InterceptPolicy {
    pub fn new(generation: impl Into<String>) -> Self {
        Self {
            generation: generation.into(),
            exclusions: ExclusionSet::default(),
            offline_fallback: DEFAULT_OFFLINE_FALLBACK.to_string(),
        }
    }
}

/// Everything a cache manager instance is constructed with
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub manifest: PrecacheManifest,
    pub policy: InterceptPolicy,
    /// Activate immediately after a successful install
    pub skip_waiting: bool,
}

impl CacheConfig {
    pub fn new(generation: impl Into<String>, manifest: PrecacheManifest) -> Self {
        Self {
            manifest,
            policy: InterceptPolicy::new(generation),
            skip_waiting: true,
        }
    }

    pub fn generation(&self) -> &str {
        &self.policy.generation
    }
}
