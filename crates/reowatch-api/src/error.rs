use thiserror::Error;

/// Top-level error type for the `reowatch-api` crate.
///
/// Covers every failure mode across both wire surfaces: the vendor JSON
/// command API and the ONVIF event-subscription SOAP endpoint.
/// `reowatch-core` maps these into availability signals and domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong credentials, account locked, user table full).
    #[error("Authentication rejected: {message}")]
    AuthRejected { message: String },

    /// Session token expired or was revoked by the camera.
    #[error("Session expired -- re-authentication required")]
    AuthExpired,

    /// An authenticated call was made before any login succeeded.
    #[error("Not logged in")]
    NotLoggedIn,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Vendor command API ──────────────────────────────────────────
    /// Structured error from the camera (parsed from the per-command
    /// `{cmd, code, error: {rspCode, detail}}` reply).
    #[error("Camera rejected {cmd} (rspCode {rsp_code}): {detail}")]
    Api {
        cmd: String,
        rsp_code: i32,
        detail: String,
    },

    /// The camera replied without the expected command entry.
    #[error("Camera reply missing entry for {cmd}")]
    MissingReply { cmd: String },

    /// Asked to toggle a capability the protocol has no switch for.
    #[error("Capability {capability} cannot be toggled")]
    Unsupported { capability: String },

    // ── ONVIF subscription ──────────────────────────────────────────
    /// SOAP-level failure from the ONVIF event service.
    #[error("ONVIF subscription error: {0}")]
    Soap(String),

    /// Subscription operation invoked with no active lease.
    #[error("No active subscription lease")]
    NoActiveLease,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if re-authentication might resolve this error.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::AuthRejected { .. } | Self::AuthExpired | Self::NotLoggedIn
        )
    }

    /// Returns `true` if this is a transient error worth retrying on the
    /// next scheduled cycle (camera unreachable, timeout, dropped socket).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::Soap(_) => true,
            _ => false,
        }
    }

    /// Extract the vendor response code, if this error carries one.
    pub fn rsp_code(&self) -> Option<i32> {
        match self {
            Self::Api { rsp_code, .. } => Some(*rsp_code),
            _ => None,
        }
    }
}
