//! Session state machine and session kinds

pub mod behavior;
pub mod content;
pub mod file_transfer;
pub mod generic;
pub mod geoloc;
pub mod invitation;
pub mod listener;
pub mod media;
mod originating;
pub mod session;
pub mod state;
mod terminating;

pub use behavior::{InvitationRejection, OfferBody, SessionBehavior};
pub use content::{FileIcon, Geoloc, MmContent, GEOLOC_CONTENT_TYPE};
pub use file_transfer::{FileSharingSession, FT_FEATURE_TAG};
pub use generic::{extension_feature_tag, extension_service_id, GenericSipSession};
pub use geoloc::{GeolocSharingSession, GEOLOC_FEATURE_TAG};
pub use invitation::{InvitationAnswer, InvitationGate};
pub use listener::{
    FileTransferListener, GeolocListener, ListenerSet, SessionErrorListener, SessionStateListener,
    SipDataListener, TransferProgressListener,
};
pub use media::MediaSession;
pub use session::{ImsSession, SessionContext};
pub use state::{SessionDirection, SessionId, SessionKind, SessionState, TerminationReason};
