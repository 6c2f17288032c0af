// ── Core error types ──
//
// User-facing errors from plantsip-core. Consumers never see reqwest
// errors or raw JSON failures; `From<plantsip_api::Error>` folds them
// into the onboarding/polling taxonomy exposed through `ErrorKind`.

use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Input errors ─────────────────────────────────────────────────
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    // ── Authentication errors ────────────────────────────────────────
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Remote errors ────────────────────────────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Registry errors ──────────────────────────────────────────────
    #[error("Device {device_id} is already configured")]
    AlreadyConfigured { device_id: String },

    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Anything else ────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unknown(String),
}

/// Coarse classification used for reporting and flow error mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Validation,
    InvalidCredentials,
    Auth,
    Api,
    Unknown,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailed { .. } => ErrorKind::Connection,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::AuthenticationFailed { .. } => ErrorKind::Auth,
            Self::Api { .. } => ErrorKind::Api,
            Self::AlreadyConfigured { .. }
            | Self::DeviceNotFound { .. }
            | Self::Config { .. }
            | Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Connection and timeout failures: retry later, don't escalate.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Timeout)
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<plantsip_api::Error> for CoreError {
    fn from(err: plantsip_api::Error) -> Self {
        match err {
            plantsip_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            plantsip_api::Error::InvalidApiKey => CoreError::AuthenticationFailed {
                message: "API key was rejected".into(),
            },
            plantsip_api::Error::InvalidUrl(e) => CoreError::validation("host", e.to_string()),
            plantsip_api::Error::InvalidHost { host, reason } => {
                CoreError::validation("host", format!("'{host}': {reason}"))
            }
            plantsip_api::Error::Transport(e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_decode() || e.is_status() {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                } else {
                    // Refused, reset, hung up mid-response, redirect loop.
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: transport_reason(&e),
                    }
                }
            }
            plantsip_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            plantsip_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            plantsip_api::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            plantsip_api::Error::Deserialization { message, body: _ } => CoreError::Api {
                message: format!("Unexpected response: {message}"),
                status: None,
            },
        }
    }
}

/// Display text of a transport error plus its innermost cause.
fn transport_reason(err: &(dyn std::error::Error + 'static)) -> String {
    let mut source = err.source();
    let mut root = None;
    while let Some(cause) = source {
        root = Some(cause);
        source = cause.source();
    }
    match root {
        Some(cause) => format!("{err}: {cause}"),
        None => err.to_string(),
    }
}
