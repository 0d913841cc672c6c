//! In-process implementation of the CacheStorage trait

use crate::offline_cache::{CacheError, CacheStorage};
use shellcache_proto::{RequestKey, Response};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

type Generations = BTreeMap<String, HashMap<RequestKey, Response>>;

/// Map-backed generation store; contents are lost when the process exits
#[derive(Default)]
pub struct MemoryCacheStorage {
    generations: Mutex<Generations>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Generations> {
        self.generations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn generations(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn open(&self, generation: &str) -> Result<(), CacheError> {
        self.lock().entry(generation.to_string()).or_default();
        Ok(())
    }

    async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        Ok(self.lock().remove(generation).is_some())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        Ok(self
            .lock()
            .get(generation)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        let mut generations = self.lock();
        let entries = generations
            .get_mut(generation)
            .ok_or_else(|| CacheError::UnknownGeneration(generation.to_string()))?;
        entries.insert(key, response);
        Ok(())
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        // Single lock acquisition: readers see all entries or none
        let mut generations = self.lock();
        let target = generations.entry(generation.to_string()).or_default();
        target.extend(entries);
        Ok(())
    }

    async fn entry_count(&self, generation: &str) -> Result<usize, CacheError> {
        Ok(self.lock().get(generation).map_or(0, HashMap::len))
    }

    fn storage_type(&self) -> &str {
        "memory"
    }
}
