use thiserror::Error;

/// Top-level error type for the `plantsip-api` crate.
///
/// Covers every failure mode of the HTTP surface: host validation,
/// transport, authentication and remote error responses.
/// `plantsip-core` classifies these into its onboarding/polling taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credential exchange was refused (wrong username or password).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The API key was rejected (missing, revoked or malformed).
    #[error("Invalid API key")]
    InvalidApiKey,

    // ── Host / URL ──────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Parsed as a URL but not usable as an API host.
    #[error("Invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Remote API ──────────────────────────────────────────────────
    /// Non-success response from the API.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the remote side rejected our credentials or key.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::InvalidApiKey)
    }

    /// HTTP status of a remote error response, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
