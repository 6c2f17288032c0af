//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use plantsip_config::ConfigError;
use plantsip_core::{CoreError, ErrorKind};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(plantsip::connection_failed),
        help("Check that the server is reachable: {reason}")
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(plantsip::timeout),
        help("Raise `timeout` under [defaults] in the config file, or check the server.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(plantsip::auth_failed),
        help("The API key was rejected. Replace it with: plantsip reauth <ID>")
    )]
    AuthFailed { message: String },

    #[error("Invalid username or password")]
    #[diagnostic(code(plantsip::invalid_credentials))]
    InvalidCredentials,

    // ── Devices ──────────────────────────────────────────────────────
    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(plantsip::not_found),
        help("Run: plantsip devices list")
    )]
    NotFound { identifier: String },

    #[error("No devices configured")]
    #[diagnostic(
        code(plantsip::no_devices),
        help("Add one with: plantsip setup\nConfig file: {path}")
    )]
    NoDevices { path: String },

    #[error("{device} is already configured")]
    #[diagnostic(
        code(plantsip::already_configured),
        help("Run: plantsip devices list")
    )]
    AlreadyConfigured { device: String },

    #[error("Setup cancelled")]
    #[diagnostic(code(plantsip::cancelled))]
    Cancelled,

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(plantsip::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(plantsip::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    #[diagnostic(code(plantsip::config))]
    Config { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(plantsip::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::InvalidCredentials => exit_code::AUTH,
            Self::NotFound { .. } | Self::NoDevices { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Error for a failed poll, which only carries the failure class.
    pub fn from_poll(kind: ErrorKind, host: &str, timeout_secs: u64) -> Self {
        match kind {
            ErrorKind::Connection => Self::ConnectionFailed {
                url: host.into(),
                reason: "status request failed".into(),
            },
            ErrorKind::Timeout => Self::Timeout {
                seconds: timeout_secs,
            },
            ErrorKind::Auth | ErrorKind::InvalidCredentials => Self::AuthFailed {
                message: "API key rejected".into(),
            },
            ErrorKind::Validation | ErrorKind::Api | ErrorKind::Unknown => Self::ApiError {
                message: format!("status unavailable ({kind})"),
            },
        }
    }
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::Validation { field, reason } => Self::Validation {
                field: field.into(),
                reason,
            },
            CoreError::InvalidCredentials => Self::InvalidCredentials,
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Api { message, status } => Self::ApiError {
                message: status.map_or_else(|| message.clone(), |s| format!("{message} (HTTP {s})")),
            },
            CoreError::AlreadyConfigured { device_id } => Self::AlreadyConfigured {
                device: format!("Device {device_id}"),
            },
            CoreError::DeviceNotFound { identifier } => Self::NotFound { identifier },
            CoreError::Config { message } => Self::Config { message },
            CoreError::Unknown(message) => Self::ApiError { message },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownDevice { identifier } => Self::NotFound { identifier },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}
