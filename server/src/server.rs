use crate::offline_cache::{CacheConfig, CacheError, PrecacheManifest};
use crate::push::{handle_notification_click, handle_push};
use crate::AppState;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Request as HttpRequest, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use shellcache_proto::{Destination, Method, Request, Response as Snapshot};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Largest request body forwarded to the network
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

const SHELLCACHE_HEADER: &str = "x-shellcache";

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/__shell/deploy", post(handle_deploy))
        .route("/__shell/activate", post(handle_activate_waiting))
        .route("/__shell/status", get(handle_status))
        .route("/__shell/push", post(handle_push_message))
        .route("/__shell/notification-click", post(handle_click))
        .route("/__shell/notifications", get(handle_list_notifications))
        .fallback(handle_intercept)
        .layer(CorsLayer::permissive()) // Allow CORS for all origins during development
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DeployBody {
    generation: String,
    precache: Option<PrecacheManifest>,
}

#[derive(Debug, Deserialize)]
struct ClickBody {
    id: Uuid,
    action: Option<String>,
}

fn error_response(status: StatusCode, e: &CacheError) -> Response {
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn handle_deploy(State(state): State<AppState>, Json(body): Json<DeployBody>) -> Response {
    info!("📡 Deploy requested for generation {}", body.generation);

    // Keep the running policy (exclusions, fallback) and swap in the new generation
    let mut config = match state.active_manager() {
        Some(manager) => manager.config().clone(),
        None => CacheConfig::new(body.generation.clone(), PrecacheManifest::default()),
    };
    config.policy.generation = body.generation;
    if let Some(precache) = body.precache {
        config.manifest = precache;
    }

    match state.deploy(config).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e @ CacheError::Precache { .. }) => {
            error!("❌ Deploy failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, &e)
        }
        Err(e) => {
            error!("❌ Deploy failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

async fn handle_activate_waiting(State(state): State<AppState>) -> Response {
    match state.activate_waiting().await {
        Ok(Some(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(None) => (StatusCode::CONFLICT, "No generation is waiting").into_response(),
        Err(e @ CacheError::UnknownGeneration(_)) => error_response(StatusCode::CONFLICT, &e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn handle_status(State(state): State<AppState>) -> Response {
    match state.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn handle_push_message(State(state): State<AppState>, body: String) -> Response {
    // HTTP cannot tell an empty payload from none; treat both as none
    let payload = Some(body.as_str()).filter(|b| !b.is_empty());
    match handle_push(payload, &state.push, state.outbox.as_ref()).await {
        Ok(notification) => (StatusCode::OK, Json(notification)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn handle_click(State(state): State<AppState>, Json(body): Json<ClickBody>) -> Response {
    match handle_notification_click(
        body.id,
        body.action.as_deref(),
        &state.push,
        state.outbox.as_ref(),
    )
    .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn handle_list_notifications(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.outbox.drain())).into_response()
}

/// URL the cache sees for a request target
///
/// Origin-form targets are reduced to path and query. Absolute-form targets
/// (the client is using us as a forward proxy) keep their host so host
/// exclusions can match.
fn request_url(uri: &Uri) -> String {
    if uri.authority().is_some() {
        return uri.to_string();
    }
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Work out what the request is for from the fetch metadata headers
fn destination_from_headers(headers: &HeaderMap) -> Destination {
    if let Some(dest) = headers.get("sec-fetch-dest").and_then(|v| v.to_str().ok()) {
        return Destination::from_fetch_dest(dest);
    }
    match headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok()) {
        Some(mode) if mode.eq_ignore_ascii_case("navigate") => Destination::Document,
        _ => Destination::Empty,
    }
}

fn into_http_response(snapshot: Snapshot, label: &'static str) -> Response {
    // Opaque responses carry status 0, which HTTP cannot express
    let status = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in &snapshot.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!("Dropping unrepresentable header {}", name),
            }
        }
        headers.insert(SHELLCACHE_HEADER, HeaderValue::from_static(label));
    }

    response
        .body(Body::from(snapshot.body))
        .unwrap_or_else(|e| {
            error!("Failed to build response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

async fn handle_intercept(State(state): State<AppState>, request: HttpRequest) -> Response {
    let (parts, body) = request.into_parts();
    let body: Bytes = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let request = Request {
        method: Method::parse(parts.method.as_str()),
        url: request_url(&parts.uri),
        destination: destination_from_headers(&parts.headers),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: body.to_vec(),
    };

    let result = match state.intercept(&request).await {
        Ok(outcome) => {
            let label = outcome.label();
            match outcome.into_response() {
                Some(snapshot) => Ok((snapshot, label)),
                None => state.network.fetch(&request).await.map(|r| (r, label)),
            }
        }
        Err(e) => Err(e),
    };

    match result {
        Ok((snapshot, label)) => {
            debug!("{} {} -> {} ({})", request.method, request.url, snapshot.status, label);
            into_http_response(snapshot, label)
        }
        Err(e) => {
            warn!("Fetch failed for {} {}: {}", request.method, request.url, e);
            (
                StatusCode::BAD_GATEWAY,
                [(header::CACHE_CONTROL, "no-store")],
                e.to_string(),
            )
                .into_response()
        }
    }
}
