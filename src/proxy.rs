//! Request routing and the key-failover loop.
//!
//! One inbound request is tried against the active channel's keys in
//! scheduler order. Each upstream reply is classified: success ends the loop,
//! a fatal outcome is forwarded to the caller unchanged, and a failover
//! outcome consumes the key and moves on. Keys that failed for quota reasons
//! are deprioritized only after a later key succeeds, so a channel-wide
//! outage cannot permanently reorder the key list. Once a response body has
//! started streaming to the caller no further retries happen.

use std::collections::HashSet;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;

use crate::classify::{classify, FailoverReason, HtmlKind, Outcome};
use crate::config::{ServiceType, UpstreamChannel};
use crate::error::RelayError;
use crate::pump::pump_sse;
use crate::server::AppState;
use crate::translate;
use crate::translate::claude_types::{ErrorResponse, MessagesRequest};

pub async fn relay_messages(
    state: &AppState,
    inbound_headers: &HeaderMap,
    raw_body: Bytes,
) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&raw_body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error("router", format!("failed to parse request: {e}"));
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, axum::Json(err)).into_response();
        }
    };

    let channel = {
        let config = state
            .config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match config.current_channel() {
            Some(c) => c.clone(),
            None => return relay_error_response(&RelayError::NoUpstream),
        }
    };

    if channel.service_type == ServiceType::Unknown {
        return relay_error_response(&RelayError::UnsupportedService {
            channel: channel.name,
        });
    }
    if channel.api_keys.is_empty() {
        return relay_error_response(&RelayError::NoKeys {
            channel: channel.name,
        });
    }

    let is_streaming = req.stream.unwrap_or(false);
    state.logger.info(
        "router",
        format!(
            "request model={} streaming={} channel={} ({})",
            req.model,
            is_streaming,
            channel.name,
            channel.service_type.as_str()
        ),
    );

    drive_failover(state, &channel, &req, &raw_body, inbound_headers).await
}

/// The per-request failover loop.
async fn drive_failover(
    state: &AppState,
    channel: &UpstreamChannel,
    req: &MessagesRequest,
    raw_body: &Bytes,
    inbound_headers: &HeaderMap,
) -> Response {
    let client = state.http_client(channel.insecure_skip_verify);
    let max_attempts = channel.api_keys.len();

    let mut excluded: HashSet<String> = HashSet::new();
    let mut deprioritize_candidates: Vec<String> = Vec::new();
    let mut last_failover: Option<FailoverReason> = None;
    let mut captured: Option<reqwest::Response> = None;

    for attempt in 0..max_attempts {
        let key = match state.scheduler.next_key(channel, &excluded) {
            Ok(k) => k,
            Err(e) => {
                state
                    .logger
                    .warn("router", format!("attempt {attempt}: {e}"));
                break;
            }
        };

        let builder = match translate::build_upstream_request(
            client,
            channel,
            &key,
            req,
            raw_body,
            inbound_headers,
        ) {
            Ok(b) => b,
            Err(e) => return relay_error_response(&e),
        };

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                // Transport failure is a failover like any other.
                state.logger.warn(
                    "router",
                    format!("attempt {attempt} transport error: {e}"),
                );
                excluded.insert(key.clone());
                state.scheduler.mark_key_failed(&key);
                continue;
            }
        };

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            captured = Some(response);
            break;
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.unwrap_or_default();
        match classify(status, &body) {
            Outcome::Failover(reason) => {
                state.logger.warn(
                    "router",
                    format!(
                        "attempt {attempt} failover: status={} quota={}",
                        reason.status, reason.quota_related
                    ),
                );
                if reason.quota_related {
                    deprioritize_candidates.push(key.clone());
                }
                last_failover = Some(reason);
                excluded.insert(key.clone());
                state.scheduler.mark_key_failed(&key);
            }
            Outcome::Passthrough => {
                state.logger.warn(
                    "router",
                    format!("attempt {attempt} fatal upstream status {status}, forwarding"),
                );
                return forward_body(status, &body, content_type.as_deref());
            }
            Outcome::Success => unreachable!("2xx handled before classification"),
        }
    }

    let Some(response) = captured else {
        return exhausted_response(state, channel, last_failover);
    };

    // Quota-failed keys move to the back only now that a key worked.
    for key in &deprioritize_candidates {
        state
            .scheduler
            .deprioritize_key(&state.config, &channel.name, key);
    }

    translate_success(state, channel, req, response).await
}

/// Pipe a successful upstream response to the caller, translated.
async fn translate_success(
    state: &AppState,
    channel: &UpstreamChannel,
    req: &MessagesRequest,
    response: reqwest::Response,
) -> Response {
    let status = response.status().as_u16();
    let upstream_is_sse = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    if channel.service_type == ServiceType::Claude {
        return claude_passthrough(state, status, upstream_is_sse, response);
    }

    if req.stream.unwrap_or(false) {
        let decoder = match translate::decoder_for(channel.service_type, &req.model) {
            Some(d) => d,
            None => {
                return relay_error_response(&RelayError::translation(
                    "no stream decoder for service type",
                ))
            }
        };

        let frames = pump_sse(response.bytes_stream(), decoder, state.logger.clone());
        let body = Body::from_stream(frames.map(|r| r.map(|frame| frame.to_wire())));
        return sse_response(body);
    }

    // Non-streaming: buffer, translate, reply as JSON.
    let body = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            let err = RelayError::upstream(format!("failed to read upstream body: {e}"));
            state.logger.error("router", err.to_string());
            return relay_error_response(&err);
        }
    };

    match translate::translate_success_body(channel.service_type, &body, &req.model) {
        Ok(translated) => {
            state.logger.info(
                "router",
                format!(
                    "completed: in={} out={} tokens",
                    translated.usage.input_tokens, translated.usage.output_tokens
                ),
            );
            axum::Json(translated).into_response()
        }
        Err(e) => {
            state
                .logger
                .error("router", format!("response translation failed: {e}"));
            relay_error_response(&e)
        }
    }
}

fn claude_passthrough(
    state: &AppState,
    status: u16,
    upstream_is_sse: bool,
    response: reqwest::Response,
) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if upstream_is_sse {
        let body = Body::from_stream(translate::claude::passthrough_stream(
            response.bytes_stream(),
            state.logger.clone(),
        ));
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    } else {
        let body = Body::from_stream(response.bytes_stream());
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Every key produced a failover. Surface the last upstream error verbatim,
/// except HTML bodies, which are replaced by a structured JSON the caller can
/// act on.
fn exhausted_response(
    state: &AppState,
    channel: &UpstreamChannel,
    last_failover: Option<FailoverReason>,
) -> Response {
    let Some(reason) = last_failover else {
        state
            .logger
            .error("router", "no upstream attempt produced a response");
        return error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "all upstream keys unavailable"}),
        );
    };

    let status = StatusCode::from_u16(reason.status).unwrap_or(StatusCode::BAD_GATEWAY);
    state.logger.error(
        "router",
        format!(
            "all keys of '{}' exhausted, surfacing upstream status {}",
            channel.name, reason.status
        ),
    );

    match reason.html {
        Some(HtmlKind::CloudflareChallenge) => error_json(
            status,
            json!({
                "error": "上游触发了 Cloudflare 防护，请求被拦截",
                "code": "UPSTREAM_CLOUDFLARE_CHALLENGE",
                "upstream": {"name": channel.name, "base_url": channel.base_url},
                "reason": "Cloudflare challenge page detected in upstream response",
                "hint": "The upstream is behind a browser check. Switch channels or contact the upstream operator.",
            }),
        ),
        Some(HtmlKind::Generic) => error_json(
            status,
            json!({
                "error": "上游返回了 HTML 错误页",
                "code": "UPSTREAM_HTML_ERROR",
                "upstream": {"name": channel.name, "base_url": channel.base_url},
            }),
        ),
        None => forward_body(reason.status, &reason.body, None),
    }
}

/// Forward an upstream body verbatim at its original status.
fn forward_body(status: u16, body: &Bytes, content_type: Option<&str>) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = content_type.unwrap_or_else(|| {
        if serde_json::from_slice::<serde_json::Value>(body).is_ok() {
            "application/json"
        } else {
            "text/plain; charset=utf-8"
        }
    });
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.clone()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub fn error_json(status: StatusCode, value: serde_json::Value) -> Response {
    (status, axum::Json(value)).into_response()
}

pub fn relay_error_response(err: &RelayError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_json(
        status,
        json!({"error": err.to_string(), "code": err.code()}),
    )
}
