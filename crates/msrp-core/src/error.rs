//! Error types for the MSRP layer

use std::time::Duration;

use thiserror::Error;

/// Result type for MSRP operations
pub type Result<T> = std::result::Result<T, MsrpError>;

/// Errors raised by the MSRP codec and transport session
#[derive(Debug, Error)]
pub enum MsrpError {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed MSRP message or path
    #[error("MSRP parse error: {message}")]
    Parse { message: String },

    /// A bounded wait expired
    #[error("response timeout 408 (waited {0:?})")]
    Timeout(Duration),

    /// The peer closed the connection
    #[error("MSRP connection closed by peer")]
    ConnectionClosed,

    /// Operation needs an open connection
    #[error("MSRP session is not connected")]
    NotConnected,

    /// The content source refused to be read (permission revoked, file gone)
    #[error("Not allowed to send content: {reason}")]
    NotAllowedToSend { reason: String },

    /// Transfer was cancelled locally or aborted by the peer
    #[error("MSRP transfer aborted")]
    TransferAborted,

    /// TLS handshake or configuration failure
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// The peer answered a chunk with a non-2xx status
    #[error("error response {status}")]
    ErrorResponse { status: u16 },

    /// Invalid configuration of the session
    #[error("Invalid MSRP configuration: {message}")]
    Configuration { message: String },

    /// A background task failed unexpectedly
    #[error("Internal MSRP error: {message}")]
    Internal { message: String },
}

impl MsrpError {
    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a not-allowed-to-send error
    pub fn not_allowed(reason: impl Into<String>) -> Self {
        Self::NotAllowedToSend {
            reason: reason.into(),
        }
    }

    /// Create a TLS error
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify an error raised while reading the content source.
    ///
    /// Permission problems are reported as [`MsrpError::NotAllowedToSend`] so that
    /// callers can tell them apart from network failures.
    pub fn from_source_error(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound => {
                Self::not_allowed(err.to_string())
            }
            _ => Self::Io(err),
        }
    }

    /// True when the error is the distinct not-allowed-to-send condition
    pub fn is_not_allowed(&self) -> bool {
        matches!(self, Self::NotAllowedToSend { .. })
    }
}
