//! Error types for the IMS session engine
//!
//! [`SessionError`] is the internal error propagated with `?` inside session
//! tasks and services. Listeners never see it directly: at the task boundary it
//! is classified into an [`ImsServiceError`] carrying a stable [`ErrorCode`].

use std::fmt;

use rcs_msrp_core::MsrpError;
use thiserror::Error;

/// Main result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// SIP transport failure or missing transaction response
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed or missing SIP payload
    #[error("Payload error: {0}")]
    Payload(String),

    /// Remote SDP could not be used
    #[error("SDP error: {0}")]
    Sdp(String),

    /// A bounded wait expired
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No session with the given id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Digest challenge could not be answered
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Content could not be read or written
    #[error("File access error: {0}")]
    FileAccess(String),

    /// MSRP layer failure
    #[error(transparent)]
    Msrp(#[from] MsrpError),

    /// Unexpected failure, including panics caught at a task boundary
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn network(msg: impl Into<String>) -> Self {
        SessionError::Network(msg.into())
    }

    pub fn payload(msg: impl Into<String>) -> Self {
        SessionError::Payload(msg.into())
    }

    pub fn sdp(msg: impl Into<String>) -> Self {
        SessionError::Sdp(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        SessionError::Timeout(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        SessionError::InvalidState(msg.into())
    }

    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        SessionError::SessionNotFound(session_id.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SessionError::Configuration(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        SessionError::Authentication(msg.into())
    }

    pub fn file_access(msg: impl Into<String>) -> Self {
        SessionError::FileAccess(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SessionError::Internal(msg.into())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::FileAccess(err.to_string())
    }
}

/// Stable error codes delivered to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SessionInitiationFailed,
    SessionInitiationCancelled,
    SessionInitiationDeclined,
    SendResponseFailed,
    MediaTransferFailed,
    MediaSavingFailed,
    NotAllowedToSend,
    MediaSizeTooBig,
    UnexpectedException,
    UnsupportedMediaType,
}

impl ErrorCode {
    /// Numeric value exposed on the service API
    pub fn value(&self) -> u32 {
        match self {
            ErrorCode::UnexpectedException => 1,
            ErrorCode::SessionInitiationFailed => 101,
            ErrorCode::SessionInitiationCancelled => 102,
            ErrorCode::SessionInitiationDeclined => 103,
            ErrorCode::SendResponseFailed => 104,
            ErrorCode::MediaTransferFailed => 105,
            ErrorCode::MediaSavingFailed => 106,
            ErrorCode::NotAllowedToSend => 107,
            ErrorCode::MediaSizeTooBig => 108,
            ErrorCode::UnsupportedMediaType => 109,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::UnexpectedException => "unexpected exception",
            ErrorCode::SessionInitiationFailed => "session initiation has failed",
            ErrorCode::SessionInitiationCancelled => "session initiation has been cancelled",
            ErrorCode::SessionInitiationDeclined => "session initiation has been declined",
            ErrorCode::SendResponseFailed => "no ACK received for the response",
            ErrorCode::MediaTransferFailed => "media transfer has failed",
            ErrorCode::MediaSavingFailed => "received media could not be saved",
            ErrorCode::NotAllowedToSend => "not allowed to send the content",
            ErrorCode::MediaSizeTooBig => "media size exceeds the maximum allowed",
            ErrorCode::UnsupportedMediaType => "unsupported media type",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.value())
    }
}

/// Structured error handed to session listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImsServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ImsServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error with the code's own description as message
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.description())
    }

    /// Classify an internal error raised while setting up the session
    pub fn initiation(err: &SessionError) -> Self {
        match err {
            SessionError::Msrp(e) if e.is_not_allowed() => {
                Self::new(ErrorCode::NotAllowedToSend, e.to_string())
            }
            SessionError::Internal(msg) => Self::new(ErrorCode::UnexpectedException, msg.clone()),
            other => Self::new(ErrorCode::SessionInitiationFailed, other.to_string()),
        }
    }

    /// Classify an MSRP transfer failure
    pub fn media(err: &MsrpError) -> Self {
        if err.is_not_allowed() {
            Self::new(ErrorCode::NotAllowedToSend, err.to_string())
        } else {
            Self::new(ErrorCode::MediaTransferFailed, err.to_string())
        }
    }

    /// Classify a failure raised while opening or feeding the media
    pub fn transfer(err: &SessionError) -> Self {
        match err {
            SessionError::Msrp(e) => Self::media(e),
            other => Self::new(ErrorCode::MediaTransferFailed, other.to_string()),
        }
    }
}

impl fmt::Display for ImsServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.value(), self.message)
    }
}

impl std::error::Error for ImsServiceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_allowed_is_distinct_from_transfer_failure() {
        let denied = MsrpError::not_allowed("permission revoked");
        assert_eq!(ImsServiceError::media(&denied).code, ErrorCode::NotAllowedToSend);

        let timeout = MsrpError::Timeout(std::time::Duration::from_secs(30));
        let err = ImsServiceError::media(&timeout);
        assert_eq!(err.code, ErrorCode::MediaTransferFailed);
        assert!(err.message.contains("response timeout 408"));
    }

    #[test]
    fn test_initiation_classification() {
        let err = ImsServiceError::initiation(&SessionError::timeout("no response to INVITE"));
        assert_eq!(err.code, ErrorCode::SessionInitiationFailed);

        let err = ImsServiceError::initiation(&SessionError::internal("task panicked"));
        assert_eq!(err.code, ErrorCode::UnexpectedException);
    }

    #[test]
    fn test_codes_have_distinct_values() {
        let codes = [
            ErrorCode::SessionInitiationFailed,
            ErrorCode::SessionInitiationCancelled,
            ErrorCode::SessionInitiationDeclined,
            ErrorCode::SendResponseFailed,
            ErrorCode::MediaTransferFailed,
            ErrorCode::MediaSavingFailed,
            ErrorCode::NotAllowedToSend,
            ErrorCode::MediaSizeTooBig,
            ErrorCode::UnexpectedException,
            ErrorCode::UnsupportedMediaType,
        ];
        let mut values: Vec<u32> = codes.iter().map(|c| c.value()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), codes.len());
    }
}
