//! reqwest-backed Network implementation

use crate::offline_cache::{CacheError, Network};
use reqwest::Client;
use shellcache_proto::{Request, Response, ResponseType};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Hop-by-hop headers that are never forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn is_forwardable(name: &str) -> bool {
    !HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Fetches requests from the application shell's upstream origin
///
/// Root-relative URLs are resolved against `upstream`. A response whose
/// final URL (after redirects) is on the upstream origin is `Basic`;
/// anything else is reduced to an opaque response.
pub struct HttpNetwork {
    client: Client,
    upstream: Url,
}

impl HttpNetwork {
    pub fn new(upstream: &str, user_agent: Option<&str>) -> Result<Self, CacheError> {
        let upstream = Url::parse(upstream)
            .map_err(|e| CacheError::InvalidUrl(format!("{}: {}", upstream, e)))?;

        // Create HTTP client with timeout
        let mut client_builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(ua) = user_agent {
            client_builder = client_builder.user_agent(ua);
        }

        let client = client_builder
            .build()
            .map_err(|e| CacheError::Storage(Box::new(e)))?;

        Ok(Self { client, upstream })
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Resolve a request URL against the upstream origin
    pub fn resolve(&self, url: &str) -> Result<Url, CacheError> {
        self.upstream
            .join(url)
            .map_err(|e| CacheError::InvalidUrl(format!("{}: {}", url, e)))
    }
}

#[async_trait::async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
        let target = self.resolve(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| CacheError::InvalidUrl(format!("bad method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, target.clone());
        for (name, value) in request.headers.iter().filter(|(n, _)| is_forwardable(n)) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| CacheError::Network {
            url: target.to_string(),
            message: e.to_string(),
        })?;

        if response.url().origin() != self.upstream.origin() {
            debug!("Cross-origin response for {}, treating as opaque", target);
            return Ok(Response::opaque());
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| is_forwardable(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::Network {
                url: target.to_string(),
                message: e.to_string(),
            })?
            .to_vec();

        debug!("Fetched {} bytes from {} (status {})", body.len(), target, status);

        Ok(Response {
            status,
            response_type: ResponseType::Basic,
            headers,
            body,
        })
    }
}
