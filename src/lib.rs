//! # claude-relay
//!
//! A protocol-translating reverse proxy for the Claude Messages API.
//!
//! The relay exposes a single inbound surface, `POST /v1/messages`, and
//! forwards each request to the currently selected upstream channel, which
//! may speak the Claude, OpenAI chat-completions, legacy completions, or
//! Gemini wire format. Responses, streaming included, are translated back
//! into the canonical Claude event stream.
//!
//! When a key fails with a recognizable auth/quota/server error, the request
//! is retried with the channel's next key; keys that failed for quota reasons
//! are moved to the back of the key list once a later key succeeds.
//!
//! ## Modules
//!
//! - [`config`] - Channel configuration, loading, and validation
//! - [`classify`] - Upstream failure classification
//! - [`scheduler`] - Key selection, failure memory, deprioritization
//! - [`pump`] - SSE byte-stream pump over per-provider decoders
//! - [`translate`] - Request/response/stream translation per provider
//! - [`proxy`] - The request router and failover loop
//! - [`server`] - HTTP surface (messages, health, admin)

pub mod classify;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod pump;
pub mod scheduler;
pub mod server;
pub mod translate;

pub use config::{RelayConfig, ServiceType, UpstreamChannel};
pub use error::{RelayError, Result};
pub use logging::SharedLogger;
pub use server::{build_router, AppState};
