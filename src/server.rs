use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::logging::SharedLogger;
use crate::proxy::{self, relay_error_response};
use crate::scheduler::KeyScheduler;
use crate::translate::claude_types::ErrorResponse;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: RwLock<RelayConfig>,
    /// Where the config was loaded from; reload re-reads this path.
    pub config_path: Option<PathBuf>,
    pub scheduler: KeyScheduler,
    pub logger: SharedLogger,
    client: reqwest::Client,
    insecure_client: reqwest::Client,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        config_path: Option<PathBuf>,
        logger: SharedLogger,
    ) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()?;
        // One shared client with certificate checks off, for channels that
        // opt in via insecure_skip_verify.
        let insecure_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            config_path,
            scheduler: KeyScheduler::new(),
            logger,
            client,
            insecure_client,
            started_at: Instant::now(),
        }))
    }

    pub fn http_client(&self, insecure: bool) -> &reqwest::Client {
        if insecure {
            &self.insecure_client
        } else {
            &self.client
        }
    }

    fn access_key(&self) -> String {
        self.config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .proxy_access_key
            .clone()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_path = {
        let config = state
            .config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        config.health_check_path.clone()
    };

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route(&health_path, get(handle_health))
        .route("/admin/config/reload", post(handle_config_reload))
        .route("/admin/logs", get(handle_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(|_: Box<dyn std::any::Any + Send>| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
                .into_response()
        }))
        .with_state(state)
}

/// Pull the caller's credential from `x-api-key` or a bearer token.
fn caller_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    caller_key(headers) == Some(state.access_key().as_str())
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&state, &headers) {
        let err = ErrorResponse::authentication("invalid or missing proxy access key");
        return (StatusCode::UNAUTHORIZED, Json(err)).into_response();
    }

    proxy::relay_messages(&state, &headers, body).await
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state
        .config
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    let current = config
        .current_channel()
        .map(|c| c.name.clone())
        .unwrap_or_default();

    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "uptime": state.started_at.elapsed().as_secs(),
        "upstreamCount": config.upstreams.len(),
        "currentUpstream": current,
        "loadBalance": config.load_balance,
    }))
}

async fn handle_config_reload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return relay_error_response(&RelayError::auth("invalid or missing proxy access key"));
    }

    let Some(ref path) = state.config_path else {
        return proxy::error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({"error": "no config file to reload from", "code": "CONFIG_ERROR"}),
        );
    };

    let reloaded = RelayConfig::load(path).and_then(|c| c.validate().map(|()| c));
    match reloaded {
        Ok(new_config) => {
            {
                let mut config = state
                    .config
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                *config = new_config;
            }
            // A reload is the declared reset point for key-failure memory.
            state.scheduler.clear_failed();
            state.logger.info("admin", "config reloaded");
            proxy::error_json(StatusCode::OK, serde_json::json!({"status": "reloaded"}))
        }
        Err(e) => {
            state
                .logger
                .error("admin", format!("config reload failed: {e}"));
            proxy::error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": e.to_string(), "code": "CONFIG_ERROR"}),
            )
        }
    }
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    100
}

async fn handle_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Response {
    if !authorized(&state, &headers) {
        return relay_error_response(&RelayError::auth("invalid or missing proxy access key"));
    }

    Json(state.logger.recent(query.limit.min(1000))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_key_accepts_both_header_forms() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "k1".parse().unwrap());
        assert_eq!(caller_key(&headers), Some("k1"));

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer k2".parse().unwrap(),
        );
        assert_eq!(caller_key(&headers), Some("k2"));

        let headers = HeaderMap::new();
        assert_eq!(caller_key(&headers), None);
    }
}
