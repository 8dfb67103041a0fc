//! # rcs-session-core
//!
//! IMS session engine for RCS. A session drives one SIP INVITE dialog from
//! creation to a terminal state, negotiating MSRP or RTP media through SDP.
//! File transfer, geolocation sharing and generic extension sessions are
//! built on it, and the [`ImsModule`] routes inbound signalling to them.

// Core modules
pub mod config;
pub mod contact;
pub mod dialog;
pub mod errors;
pub mod logging;
pub mod sdp;
pub mod service;
pub mod session;
pub mod sip;

// Public re-exports of main types
pub use config::{NetworkInfo, RcsSettings, SettingsProvider, StaticNetworkInfo};
pub use contact::{ContactId, ContactManager, InMemoryContactManager};
pub use errors::{ErrorCode, ImsServiceError, Result, SessionError};
pub use logging::{setup_logging, LoggingConfig};
pub use service::{CoreListener, ImmManager, ImsModule, InstantMultimediaMessage, SessionRegistry};
pub use session::{
    FileSharingSession, GenericSipSession, GeolocSharingSession, ImsSession, SessionContext, SessionId,
    SessionState, TerminationReason,
};
pub use sip::{SipMethod, SipRequest, SipResponse, SipTransport};

/// Everything a host embedding the engine usually needs
pub mod prelude {
    pub use crate::service::{CoreListener, ImsModule, InstantMultimediaMessage};
    pub use crate::session::{
        FileIcon, FileSharingSession, FileTransferListener, GenericSipSession, Geoloc, GeolocListener,
        GeolocSharingSession, MmContent, SessionErrorListener, SessionId, SessionState, SessionStateListener,
        SipDataListener, TerminationReason, TransferProgressListener,
    };
    pub use crate::{ContactId, ErrorCode, ImsServiceError, RcsSettings, Result, SessionError};
}
