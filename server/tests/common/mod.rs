#![allow(dead_code)]

use shellcache_proto::{Request, RequestKey, Response};
use shellcache_server::offline_cache::memory::MemoryCacheStorage;
use shellcache_server::{CacheError, CacheStorage, Network};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct NetworkInner {
    responses: Mutex<HashMap<String, Response>>,
    unreachable: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

/// Scripted network: serves registered responses, 404 for anything else
#[derive(Clone, Default)]
pub struct FakeNetwork {
    inner: Arc<NetworkInner>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, response: Response) -> &Self {
        self.inner
            .responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    /// Make a single URL fail at the transport level
    pub fn fail(&self, url: &str) -> &Self {
        self.inner.unreachable.lock().unwrap().insert(url.to_string());
        self
    }

    pub fn recover(&self, url: &str) {
        self.inner.unreachable.lock().unwrap().remove(url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait::async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
        self.inner.calls.lock().unwrap().push(request.url.clone());

        if self.inner.offline.load(Ordering::SeqCst)
            || self.inner.unreachable.lock().unwrap().contains(&request.url)
        {
            return Err(CacheError::Network {
                url: request.url.clone(),
                message: "connection refused".to_string(),
            });
        }

        Ok(self
            .inner
            .responses
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Response::basic(404, "not found")))
    }
}

/// Memory storage that counts accesses and can be told to fail
#[derive(Default)]
pub struct InstrumentedStorage {
    inner: MemoryCacheStorage,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    undeletable: Mutex<HashSet<String>>,
}

impl InstrumentedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn refuse_delete(&self, generation: &str) {
        self.undeletable.lock().unwrap().insert(generation.to_string());
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn write_error() -> CacheError {
        CacheError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "quota exceeded",
        ))
    }
}

#[async_trait::async_trait]
impl CacheStorage for InstrumentedStorage {
    async fn generations(&self) -> Result<Vec<String>, CacheError> {
        self.inner.generations().await
    }

    async fn open(&self, generation: &str) -> Result<(), CacheError> {
        self.inner.open(generation).await
    }

    async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        if self.undeletable.lock().unwrap().contains(generation) {
            return Err(Self::write_error());
        }
        self.inner.delete(generation).await
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Database("disk I/O error".to_string()));
        }
        self.inner.lookup(generation, key).await
    }

    async fn put(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::write_error());
        }
        self.inner.put(generation, key, response).await
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::write_error());
        }
        self.inner.put_all(generation, entries).await
    }

    async fn entry_count(&self, generation: &str) -> Result<usize, CacheError> {
        self.inner.entry_count(generation).await
    }

    fn storage_type(&self) -> &str {
        "instrumented"
    }
}
