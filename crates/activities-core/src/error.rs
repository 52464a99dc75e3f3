//! Shared error type across activities crates.

use thiserror::Error;

/// Stable error codes (safe to log or surface to embedders).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A host or messenger was connected twice.
    AlreadyConnected,
    /// Operation needs an established connection.
    NotConnected,
    /// Operation needs `accept()` first.
    NotAccepted,
    /// Operation is not available in this host mode.
    NotSupported,
    /// Popup host constructed without a usable opener.
    NoOpener,
    /// Malformed activity request.
    InvalidRequest,
    /// Malformed wire frame.
    BadEnvelope,
    /// Activity was canceled by the user.
    Aborted,
    /// Activity failed on the host side.
    Failed,
    /// Invalid configuration.
    Config,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and redirect diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AlreadyConnected => "ALREADY_CONNECTED",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::NotAccepted => "NOT_ACCEPTED",
            ErrorCode::NotSupported => "NOT_SUPPORTED",
            ErrorCode::NoOpener => "NO_OPENER",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::BadEnvelope => "BAD_ENVELOPE",
            ErrorCode::Aborted => "ABORT_ERR",
            ErrorCode::Failed => "FAILED",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ActivityError>;

/// Unified error type used by core and host.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("not accepted")]
    NotAccepted,
    #[error("not supported")]
    NotSupported,
    #[error("No window.opener")]
    NoOpener,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("bad envelope: {0}")]
    BadEnvelope(String),
    #[error("AbortError")]
    Aborted,
    #[error("activity failed: {0}")]
    Failed(String),
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ActivityError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ActivityError::AlreadyConnected => ErrorCode::AlreadyConnected,
            ActivityError::NotConnected => ErrorCode::NotConnected,
            ActivityError::NotAccepted => ErrorCode::NotAccepted,
            ActivityError::NotSupported => ErrorCode::NotSupported,
            ActivityError::NoOpener => ErrorCode::NoOpener,
            ActivityError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ActivityError::BadEnvelope(_) => ErrorCode::BadEnvelope,
            ActivityError::Aborted => ErrorCode::Aborted,
            ActivityError::Failed(_) => ErrorCode::Failed,
            ActivityError::Config(_) => ErrorCode::Config,
            ActivityError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the error signals caller misuse rather than an activity outcome.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            ActivityError::AlreadyConnected
                | ActivityError::NotConnected
                | ActivityError::NotAccepted
                | ActivityError::NotSupported
                | ActivityError::NoOpener
                | ActivityError::InvalidRequest(_)
        )
    }
}
