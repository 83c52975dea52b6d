//! Closed error taxonomy for the mediation core.
//!
//! Every failure a handler can produce is one of these variants, so
//! propagation is exhaustive-checked. All variants except `Internal` are
//! returned verbatim to the caller; `Internal` wraps any unrecognized
//! failure and its client-facing message is intentionally generic.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid session")]
    InvalidSession,

    #[error("session expired")]
    SessionExpired,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timestamp outside of allowed window")]
    MaxRequestAgeExceeded,

    #[error("not found")]
    NotFound,

    #[error("additional verification required")]
    AuthenticationRequired,

    #[error("verification failed")]
    AuthenticationFailed,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("an account already exists for this email")]
    AccountExists,

    #[error("the record has changed since it was last fetched")]
    OutdatedRevision,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("this action is not allowed under the current plan")]
    ProvisioningNotAllowed,

    #[error("quota exceeded")]
    ProvisioningQuotaExceeded,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ServerError {
    /// Stable wire code for the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidSession => "invalid_session",
            ServerError::SessionExpired => "session_expired",
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::MaxRequestAgeExceeded => "max_request_age_exceeded",
            ServerError::NotFound => "not_found",
            ServerError::AuthenticationRequired => "authentication_required",
            ServerError::AuthenticationFailed => "authentication_failed",
            ServerError::InvalidCredentials => "invalid_credentials",
            ServerError::AccountExists => "account_exists",
            ServerError::OutdatedRevision => "outdated_revision",
            ServerError::InsufficientPermissions => "insufficient_permissions",
            ServerError::ProvisioningNotAllowed => "provisioning_not_allowed",
            ServerError::ProvisioningQuotaExceeded => "provisioning_quota_exceeded",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::NotSupported(_) => "not_supported",
            ServerError::Internal(_) => "server_error",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}

/// Wire form of an error, as embedded in the response envelope.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
}

impl From<&ServerError> for ErrorEnvelope {
    fn from(err: &ServerError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Configuration loading failure. Separate from [`ServerError`] since it can
/// only occur before the server starts handling requests.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
