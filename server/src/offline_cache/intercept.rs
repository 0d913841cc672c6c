//! Per-request cache/network arbitration

use crate::offline_cache::{CacheError, CacheStorage, InterceptPolicy, Network};
use shellcache_proto::{Method, Request, RequestKey, Response};
use tracing::{debug, warn};

/// What happened to an intercepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the host forwards the request untouched
    Passthrough,
    /// Served from the current generation without touching the network
    Cached(Response),
    /// Fetched from the network (and stored if it was eligible)
    Network(Response),
    /// Network failed for a navigation; the offline document was served
    OfflineFallback(Response),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Cached(r) | FetchOutcome::Network(r) | FetchOutcome::OfflineFallback(r) => {
                Some(r)
            }
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Cached(r) | FetchOutcome::Network(r) | FetchOutcome::OfflineFallback(r) => {
                Some(r)
            }
        }
    }

    /// Short label for logs and the `x-shellcache` response header
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Passthrough => "bypass",
            FetchOutcome::Cached(_) => "hit",
            FetchOutcome::Network(_) => "miss",
            FetchOutcome::OfflineFallback(_) => "offline",
        }
    }
}

/// Handle one outgoing request
///
/// - non-GET and excluded URLs pass through without any cache access
/// - a hit in the current generation is returned as-is, no revalidation
/// - a miss goes to the network; a same-origin 200 is stored on the way back
/// - a failed navigation is answered with the cached offline document
///
/// Cache write failures are logged and dropped. A network failure for any
/// other destination, or for a navigation with no cached fallback, is
/// returned as the error.
pub async fn handle_fetch(
    request: &Request,
    policy: &InterceptPolicy,
    storage: &dyn CacheStorage,
    network: &dyn Network,
) -> Result<FetchOutcome, CacheError> {
    if request.method != Method::Get {
        return Ok(FetchOutcome::Passthrough);
    }

    if policy.exclusions.matches(&request.url) {
        debug!("Excluded from cache: {}", request.url);
        return Ok(FetchOutcome::Passthrough);
    }

    let key = request.key();
    match storage.lookup(&policy.generation, &key).await {
        Ok(Some(cached)) => {
            debug!("📦 Cache hit: {}", key);
            return Ok(FetchOutcome::Cached(cached));
        }
        Ok(None) => {}
        Err(e) => {
            warn!("Cache lookup failed for {}, treating as miss: {}", key, e);
        }
    }

    debug!("🌐 Network request for: {}", key);
    match network.fetch(request).await {
        Ok(response) => {
            if response.is_cacheable() {
                if let Err(e) = storage
                    .put(&policy.generation, key.clone(), response.clone())
                    .await
                {
                    warn!("Failed to cache {}: {}", key, e);
                }
            } else {
                debug!(
                    "Not caching {} (status={}, type={})",
                    key,
                    response.status,
                    response.response_type.as_str()
                );
            }
            Ok(FetchOutcome::Network(response))
        }
        Err(network_error) => {
            if !request.destination.is_navigation() {
                return Err(network_error);
            }

            let fallback_key = RequestKey::get(policy.offline_fallback.as_str());
            match storage.lookup(&policy.generation, &fallback_key).await {
                Ok(Some(fallback)) => {
                    debug!("📴 Serving offline fallback for {}", key);
                    Ok(FetchOutcome::OfflineFallback(fallback))
                }
                Ok(None) => {
                    warn!(
                        "Offline fallback {} is not cached in {}",
                        policy.offline_fallback, policy.generation
                    );
                    Err(network_error)
                }
                Err(e) => {
                    warn!("Offline fallback lookup failed: {}", e);
                    Err(network_error)
                }
            }
        }
    }
}
