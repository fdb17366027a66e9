//! Protocol translation between the Claude Messages API and the upstream
//! provider wire formats.
//!
//! Each provider family has a request builder and a stream decoder behind the
//! [`ServiceType`] dispatch here. Translation itself is pure; only the
//! request builders touch reqwest.

pub mod claude;
pub mod claude_types;
pub mod events;
pub mod gemini;
pub mod gemini_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod schema;
pub mod streaming;

use axum::http::{header, HeaderMap, HeaderName};
use bytes::Bytes;

use crate::config::{ServiceType, UpstreamChannel};
use crate::error::{RelayError, Result};
use crate::pump::ChunkDecoder;
use claude_types::{MessagesRequest, MessagesResponse};

/// Client auth headers that must never reach an upstream. The provider's own
/// auth header is injected after stripping.
fn auth_headers() -> [HeaderName; 3] {
    [
        header::AUTHORIZATION,
        HeaderName::from_static("x-api-key"),
        HeaderName::from_static("x-goog-api-key"),
    ]
}

/// Hop-by-hop and recomputed headers dropped when forwarding. Content-type
/// and length are re-set by every adapter for the translated body.
fn hop_headers() -> [HeaderName; 6] {
    [
        header::HOST,
        header::CONTENT_LENGTH,
        header::CONTENT_TYPE,
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        header::ACCEPT_ENCODING,
    ]
}

/// Forwardable copy of the inbound headers: everything verbatim except auth
/// and hop-by-hop headers.
pub fn sanitize_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = inbound.clone();
    for name in auth_headers().iter().chain(hop_headers().iter()) {
        out.remove(name);
    }
    out
}

/// Build the outbound upstream request for one attempt.
///
/// The Claude adapter forwards `raw_body` untouched; the others serialize a
/// translated body. Every adapter injects its own auth header for `api_key`.
pub fn build_upstream_request(
    client: &reqwest::Client,
    channel: &UpstreamChannel,
    api_key: &str,
    req: &MessagesRequest,
    raw_body: &Bytes,
    inbound_headers: &HeaderMap,
) -> Result<reqwest::RequestBuilder> {
    let base = channel.base_url.trim_end_matches('/');
    let forwarded = sanitize_headers(inbound_headers);
    let stream = req.stream.unwrap_or(false);

    let builder = match channel.service_type {
        ServiceType::Claude => {
            let mut b = client
                .post(format!("{base}/v1/messages"))
                .headers(forwarded)
                .header("x-api-key", api_key)
                .header(header::CONTENT_TYPE, "application/json");
            if !inbound_headers.contains_key("anthropic-version") {
                b = b.header("anthropic-version", "2023-06-01");
            }
            b.body(raw_body.clone())
        }
        ServiceType::Openai => {
            let translated = request::claude_to_openai(req, &channel.models);
            client
                .post(format!("{base}/v1/chat/completions"))
                .headers(forwarded)
                .bearer_auth(api_key)
                .json(&translated)
        }
        ServiceType::OpenaiOld => {
            let translated = request::claude_to_legacy(req, &channel.models);
            client
                .post(format!("{base}/v1/completions"))
                .headers(forwarded)
                .bearer_auth(api_key)
                .json(&translated)
        }
        ServiceType::Gemini => {
            let url = gemini::gemini_url(base, &req.model, &channel.models, stream);
            let translated = gemini::claude_to_gemini(req);
            client
                .post(url)
                .headers(forwarded)
                .header("x-goog-api-key", api_key)
                .json(&translated)
        }
        ServiceType::Unknown => {
            return Err(RelayError::UnsupportedService {
                channel: channel.name.clone(),
            })
        }
    };

    Ok(builder)
}

/// Stream decoder for a provider, or `None` for the Claude passthrough.
pub fn decoder_for(service: ServiceType, model: &str) -> Option<Box<dyn ChunkDecoder>> {
    match service {
        ServiceType::Claude | ServiceType::Unknown => None,
        ServiceType::Openai => Some(Box::new(streaming::StreamTranslator::new(model))),
        ServiceType::OpenaiOld => Some(Box::new(streaming::LegacyStreamTranslator::new(model))),
        ServiceType::Gemini => Some(Box::new(gemini::GeminiStreamTranslator::new(model))),
    }
}

/// Translate a successful non-streaming upstream body into a Claude Messages
/// response. Claude upstreams are handled by the caller as passthrough and
/// never reach this function.
pub fn translate_success_body(
    service: ServiceType,
    body: &Bytes,
    original_model: &str,
) -> Result<MessagesResponse> {
    match service {
        ServiceType::Openai => {
            let parsed: openai_types::ChatCompletionResponse = serde_json::from_slice(body)
                .map_err(|e| {
                    RelayError::translation(format!("failed to parse chat completion: {e}"))
                })?;
            Ok(response::openai_to_claude(&parsed, original_model))
        }
        ServiceType::OpenaiOld => {
            let parsed: openai_types::CompletionResponse =
                serde_json::from_slice(body).map_err(|e| {
                    RelayError::translation(format!("failed to parse completion: {e}"))
                })?;
            Ok(response::legacy_to_claude(&parsed, original_model))
        }
        ServiceType::Gemini => {
            let parsed: gemini_types::GeminiResponseChunk = serde_json::from_slice(body)
                .map_err(|e| {
                    RelayError::translation(format!("failed to parse generateContent: {e}"))
                })?;
            Ok(response::gemini_to_claude(&parsed, original_model))
        }
        ServiceType::Claude | ServiceType::Unknown => Err(RelayError::translation(format!(
            "no body translation for service type '{}'",
            service.as_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_client_auth() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "caller-key".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer caller".parse().unwrap());
        headers.insert("x-goog-api-key", "caller-goog".parse().unwrap());
        headers.insert("anthropic-version", "2023-06-01".parse().unwrap());
        headers.insert(header::HOST, "relay.local".parse().unwrap());

        let out = sanitize_headers(&headers);
        assert!(out.get("x-api-key").is_none());
        assert!(out.get(header::AUTHORIZATION).is_none());
        assert!(out.get("x-goog-api-key").is_none());
        assert!(out.get(header::HOST).is_none());
        assert_eq!(out.get("anthropic-version").unwrap(), "2023-06-01");
    }

    #[test]
    fn decoder_dispatch() {
        assert!(decoder_for(ServiceType::Claude, "m").is_none());
        assert!(decoder_for(ServiceType::Openai, "m").is_some());
        assert!(decoder_for(ServiceType::OpenaiOld, "m").is_some());
        assert!(decoder_for(ServiceType::Gemini, "m").is_some());
    }
}
