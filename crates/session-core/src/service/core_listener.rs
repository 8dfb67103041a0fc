use bytes::Bytes;

use crate::contact::ContactId;
use crate::session::{FileSharingSession, GenericSipSession, GeolocSharingSession};

/// Receives what the IMS module creates from inbound signalling
///
/// Invitation callbacks run before the session is started, so listeners
/// attached to the session there observe every state notification.
pub trait CoreListener: Send + Sync {
    fn on_file_transfer_invitation(&self, _session: &FileSharingSession) {}

    fn on_geoloc_sharing_invitation(&self, _session: &GeolocSharingSession) {}

    fn on_sip_session_invitation(&self, _session: &GenericSipSession) {}

    fn on_instant_message(
        &self,
        _contact: &ContactId,
        _feature_tag: Option<&str>,
        _content_type: Option<&str>,
        _content: &Bytes,
    ) {
    }
}

/// Listener ignoring every event
pub struct NoopCoreListener;

impl CoreListener for NoopCoreListener {}
