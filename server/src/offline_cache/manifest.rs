//! Precache manifest: the resources a generation must hold before it serves

use crate::offline_cache::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Paths precached by the application shell when no manifest is configured
const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/static/js/bundle.js",
    "/static/css/main.css",
    "/manifest.json",
    "/favicon.ico",
    "/images/logo-compact.svg",
    "/images/logo-detailed.svg",
];

/// Ordered, duplicate-free list of root-relative resource paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct PrecacheManifest {
    entries: Vec<String>,
}

impl PrecacheManifest {
    /// Build a manifest, rejecting empty, non root-relative, or duplicate paths
    pub fn new<I, S>(entries: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for entry in entries {
            let path: String = entry.into();
            if !path.starts_with('/') {
                return Err(CacheError::InvalidManifest(format!(
                    "entry {:?} is not a root-relative path",
                    path
                )));
            }
            if !seen.insert(path.clone()) {
                return Err(CacheError::InvalidManifest(format!(
                    "duplicate entry {:?}",
                    path
                )));
            }
            paths.push(path);
        }

        Ok(Self { entries: paths })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e == path)
    }
}

impl Default for PrecacheManifest {
    fn default() -> Self {
        Self {
            entries: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for PrecacheManifest {
    type Error = CacheError;

    fn try_from(entries: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<PrecacheManifest> for Vec<String> {
    fn from(manifest: PrecacheManifest) -> Self {
        manifest.entries
    }
}
