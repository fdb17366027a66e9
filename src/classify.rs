//! Upstream failure classification.
//!
//! Each non-success upstream response is sorted into one of three outcomes:
//! retry with the next key (`Failover`), or hand the response to the caller
//! unchanged (`Passthrough`). Failovers carry the original status and body so
//! the last one can be surfaced verbatim when every key is exhausted, plus a
//! quota flag that drives end-of-request key deprioritization.

use bytes::Bytes;

/// What the router should do with an upstream response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    Failover(FailoverReason),
    Passthrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailoverReason {
    pub status: u16,
    pub body: Bytes,
    pub quota_related: bool,
    pub html: Option<HtmlKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlKind {
    Generic,
    CloudflareChallenge,
}

/// Message substrings that mark a 400 as a key failure rather than a caller
/// mistake.
const FAILOVER_MESSAGE_MARKERS: &[&str] = &[
    "积分不足",
    "insufficient",
    "invalid",
    "unauthorized",
    "quota",
    "rate limit",
    "credit",
    "balance",
];

/// The depletion subset: matches here flag the key for deprioritization.
const QUOTA_MESSAGE_MARKERS: &[&str] = &["积分不足", "quota", "credit", "balance"];

const FAILOVER_TYPE_MARKERS: &[&str] = &["permission", "insufficient", "over_quota", "billing"];

const QUOTA_TYPE_MARKERS: &[&str] = &["insufficient", "over_quota", "billing"];

/// Classify an upstream response.
pub fn classify(status: u16, body: &Bytes) -> Outcome {
    if (200..300).contains(&status) {
        return Outcome::Success;
    }

    if status == 401 || status == 403 {
        return Outcome::Failover(FailoverReason {
            status,
            body: body.clone(),
            quota_related: false,
            html: detect_html(body),
        });
    }

    if status >= 500 {
        return Outcome::Failover(FailoverReason {
            status,
            body: body.clone(),
            quota_related: false,
            html: detect_html(body),
        });
    }

    if status == 400 {
        if let Some(quota_related) = classify_bad_request(body) {
            return Outcome::Failover(FailoverReason {
                status,
                body: body.clone(),
                quota_related,
                html: None,
            });
        }
    }

    Outcome::Passthrough
}

/// A 400 only fails over when the body carries an `error` object whose
/// message or type matches a known key-failure marker. Returns the
/// quota-related flag, or None for a genuine caller error.
fn classify_bad_request(body: &Bytes) -> Option<bool> {
    let parsed: crate::translate::openai_types::ChatErrorResponse =
        serde_json::from_slice(body).ok()?;

    let message = parsed.error.message.to_lowercase();
    let error_type = parsed.error.error_type.to_lowercase();

    let message_hit = FAILOVER_MESSAGE_MARKERS
        .iter()
        .any(|m| message.contains(m));
    let type_hit = FAILOVER_TYPE_MARKERS.iter().any(|m| error_type.contains(m));

    if !message_hit && !type_hit {
        return None;
    }

    let quota = QUOTA_MESSAGE_MARKERS.iter().any(|m| message.contains(m))
        || QUOTA_TYPE_MARKERS.iter().any(|m| error_type.contains(m));
    Some(quota)
}

/// Detect an HTML body (error pages, interstitials) and recognize Cloudflare
/// challenge pages specifically.
pub fn detect_html(body: &Bytes) -> Option<HtmlKind> {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim_start();
    let looks_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<!doctype")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");
    if !looks_html {
        return None;
    }

    let lower = text.to_lowercase();
    if lower.contains("cloudflare")
        && (lower.contains("just a moment") || lower.contains("__cf_chl_opt"))
    {
        Some(HtmlKind::CloudflareChallenge)
    } else {
        Some(HtmlKind::Generic)
    }
}
