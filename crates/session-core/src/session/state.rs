//! Session identifiers and state machine values

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Which side sent the INVITE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionDirection {
    Originating,
    Terminating,
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    InviteSent,
    InviteReceived,
    Ringing,
    Accepted,
    MediaNegotiated,
    Established,
    Transferred,
    Aborted,
    Failed,
    Rejected,
}

impl SessionState {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Transferred
                | SessionState::Aborted
                | SessionState::Failed
                | SessionState::Rejected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "CREATED",
            SessionState::InviteSent => "INVITE_SENT",
            SessionState::InviteReceived => "INVITE_RECEIVED",
            SessionState::Ringing => "RINGING",
            SessionState::Accepted => "ACCEPTED",
            SessionState::MediaNegotiated => "MEDIA_NEGOTIATED",
            SessionState::Established => "ESTABLISHED",
            SessionState::Transferred => "TRANSFERRED",
            SessionState::Aborted => "ABORTED",
            SessionState::Failed => "FAILED",
            SessionState::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// Why a session ended or was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationReason {
    ByUser,
    ByRemote,
    BySystem,
    ByTimeout,
}

/// Which service a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    FileTransfer,
    Geoloc,
    GenericMsrp,
    GenericRtp,
}

impl SessionKind {
    /// MSRP kinds own a media transport, RTP kinds are signalling only
    pub fn uses_msrp(&self) -> bool {
        !matches!(self, SessionKind::GenericRtp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        for state in [
            SessionState::Transferred,
            SessionState::Aborted,
            SessionState::Failed,
            SessionState::Rejected,
        ] {
            assert!(state.is_terminal());
        }
        assert!(!SessionState::Established.is_terminal());
        assert!(!SessionState::Ringing.is_terminal());
        assert_eq!(SessionState::MediaNegotiated.to_string(), "MEDIA_NEGOTIATED");
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert!(!SessionKind::GenericRtp.uses_msrp());
        assert!(SessionKind::Geoloc.uses_msrp());
    }
}
