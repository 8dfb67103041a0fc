//! Listener traits, one per concern
//!
//! Every method has an empty default body so a listener implements only the
//! notifications it cares about. Listeners are called synchronously from
//! session tasks and must not block.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::contact::ContactId;
use crate::errors::ImsServiceError;

use super::content::{FileIcon, Geoloc, MmContent};
use super::state::{SessionId, TerminationReason};

/// Lifecycle notifications common to every session kind
pub trait SessionStateListener: Send + Sync {
    fn on_session_invited(&self, _session_id: &SessionId, _contact: &ContactId) {}

    fn on_session_ringing(&self, _session_id: &SessionId) {}

    fn on_session_accepting(&self, _session_id: &SessionId, _contact: &ContactId) {}

    fn on_session_started(&self, _session_id: &SessionId, _contact: &ContactId) {}

    fn on_session_aborted(&self, _session_id: &SessionId, _contact: &ContactId, _reason: TerminationReason) {}

    fn on_session_rejected(&self, _session_id: &SessionId, _contact: &ContactId, _reason: TerminationReason) {}
}

pub trait TransferProgressListener: Send + Sync {
    fn on_transfer_progress(&self, _session_id: &SessionId, _contact: &ContactId, _current: u64, _total: u64) {}
}

pub trait SessionErrorListener: Send + Sync {
    fn on_session_error(&self, _session_id: &SessionId, _contact: &ContactId, _error: &ImsServiceError) {}
}

/// File transfer outcome notifications
pub trait FileTransferListener: Send + Sync {
    /// Invitation accepted automatically because of the auto-accept policy
    fn on_session_auto_accepted(
        &self,
        _session_id: &SessionId,
        _contact: &ContactId,
        _content: &MmContent,
        _icon: Option<&FileIcon>,
    ) {
    }

    fn on_file_transferred(&self, _session_id: &SessionId, _contact: &ContactId, _content: &MmContent) {}
}

pub trait GeolocListener: Send + Sync {
    fn on_geoloc_transferred(
        &self,
        _session_id: &SessionId,
        _contact: &ContactId,
        _geoloc: &Geoloc,
        _initiated_by_remote: bool,
    ) {
    }
}

/// Data delivered on a generic MSRP session
pub trait SipDataListener: Send + Sync {
    fn on_data_received(
        &self,
        _session_id: &SessionId,
        _contact: &ContactId,
        _data: &Bytes,
        _content_type: Option<&str>,
    ) {
    }
}

/// Listeners of one concern, notified in insertion order
pub struct ListenerSet<T: ?Sized> {
    listeners: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<T>) {
        self.listeners.lock().push(listener);
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Call `f` on a snapshot, so listeners may register others meanwhile
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        let snapshot: Vec<Arc<T>> = self.listeners.lock().clone();
        for listener in &snapshot {
            f(&**listener);
        }
    }
}
