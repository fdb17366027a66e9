//! Error types for the relay.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("No upstream channel configured")]
    NoUpstream,

    #[error("Channel '{channel}' has no API keys")]
    NoKeys { channel: String },

    #[error("Channel '{channel}' has unsupported service type")]
    UnsupportedService { channel: String },

    #[error("No available API key for channel '{channel}'")]
    KeysExhausted { channel: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RelayError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    /// Stable machine-readable code for the API surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "UNAUTHORIZED",
            Self::NoUpstream => "NO_UPSTREAM",
            Self::NoKeys { .. } => "NO_API_KEYS",
            Self::UnsupportedService { .. } => "UNSUPPORTED_SERVICE",
            Self::KeysExhausted { .. } => "KEYS_EXHAUSTED",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Upstream { .. } | Self::Http(_) => "UPSTREAM_ERROR",
            Self::Translation { .. } | Self::Json(_) => "TRANSLATION_ERROR",
            Self::Io(_) | Self::Toml(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this error surfaces as when it reaches the caller.
    pub fn status(&self) -> u16 {
        match self {
            Self::Auth { .. } => 401,
            Self::NoUpstream | Self::NoKeys { .. } => 503,
            Self::UnsupportedService { .. } => 400,
            Self::KeysExhausted { .. } | Self::Upstream { .. } | Self::Http(_) => 502,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses() {
        assert_eq!(RelayError::NoUpstream.code(), "NO_UPSTREAM");
        assert_eq!(RelayError::NoUpstream.status(), 503);

        let e = RelayError::NoKeys {
            channel: "main".into(),
        };
        assert_eq!(e.code(), "NO_API_KEYS");
        assert_eq!(e.status(), 503);

        let e = RelayError::UnsupportedService {
            channel: "main".into(),
        };
        assert_eq!(e.status(), 400);

        assert_eq!(RelayError::auth("bad key").status(), 401);
    }
}
