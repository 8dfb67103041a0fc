//! Session registries
//!
//! One lock guards every map, so adding and removing a session is serialized
//! across all session kinds and the call-id index stays consistent with them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::session::{FileSharingSession, GenericSipSession, GeolocSharingSession, ImsSession, SessionId, SessionKind};

/// A registered session of any kind
#[derive(Clone)]
pub enum RegisteredSession {
    FileTransfer(FileSharingSession),
    Geoloc(GeolocSharingSession),
    Generic(GenericSipSession),
}

impl RegisteredSession {
    pub fn core(&self) -> &Arc<ImsSession> {
        match self {
            RegisteredSession::FileTransfer(s) => s.core(),
            RegisteredSession::Geoloc(s) => s.core(),
            RegisteredSession::Generic(s) => s.core(),
        }
    }
}

#[derive(Default)]
struct Registries {
    file_transfers: HashMap<SessionId, FileSharingSession>,
    geoloc_sharings: HashMap<SessionId, GeolocSharingSession>,
    sip_msrp: HashMap<SessionId, GenericSipSession>,
    sip_rtp: HashMap<SessionId, GenericSipSession>,
    by_call_id: HashMap<String, SessionId>,
    stats: RegistryStats,
}

/// Counters of the registry's lifetime
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_created: usize,
    pub total_removed: usize,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Registries>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(inner: &mut Registries, session: &ImsSession) {
        inner.by_call_id.insert(session.call_id(), session.id().clone());
        inner.stats.total_created += 1;
        debug!("Registered {:?} session {}", session.kind(), session.id());
    }

    pub fn add_file_transfer(&self, session: FileSharingSession) {
        let mut inner = self.inner.lock();
        Self::index(&mut inner, session.core());
        inner.file_transfers.insert(session.id().clone(), session);
    }

    pub fn add_geoloc_sharing(&self, session: GeolocSharingSession) {
        let mut inner = self.inner.lock();
        Self::index(&mut inner, session.core());
        inner.geoloc_sharings.insert(session.id().clone(), session);
    }

    pub fn add_generic(&self, session: GenericSipSession) {
        let mut inner = self.inner.lock();
        Self::index(&mut inner, session.core());
        match session.kind() {
            SessionKind::GenericRtp => inner.sip_rtp.insert(session.id().clone(), session),
            _ => inner.sip_msrp.insert(session.id().clone(), session),
        };
    }

    /// Remove a session whatever its kind. Idempotent.
    pub fn remove(&self, id: &SessionId) -> Option<RegisteredSession> {
        let mut inner = self.inner.lock();
        let removed = inner
            .file_transfers
            .remove(id)
            .map(RegisteredSession::FileTransfer)
            .or_else(|| inner.geoloc_sharings.remove(id).map(RegisteredSession::Geoloc))
            .or_else(|| inner.sip_msrp.remove(id).map(RegisteredSession::Generic))
            .or_else(|| inner.sip_rtp.remove(id).map(RegisteredSession::Generic));
        if removed.is_some() {
            inner.by_call_id.retain(|_, session_id| session_id != id);
            inner.stats.total_removed += 1;
            debug!("Removed session {}", id);
        }
        removed
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &SessionId) -> Option<RegisteredSession> {
        let inner = self.inner.lock();
        inner
            .file_transfers
            .get(id)
            .cloned()
            .map(RegisteredSession::FileTransfer)
            .or_else(|| inner.geoloc_sharings.get(id).cloned().map(RegisteredSession::Geoloc))
            .or_else(|| inner.sip_msrp.get(id).cloned().map(RegisteredSession::Generic))
            .or_else(|| inner.sip_rtp.get(id).cloned().map(RegisteredSession::Generic))
    }

    pub fn get_file_transfer(&self, id: &SessionId) -> Option<FileSharingSession> {
        self.inner.lock().file_transfers.get(id).cloned()
    }

    pub fn get_geoloc_sharing(&self, id: &SessionId) -> Option<GeolocSharingSession> {
        self.inner.lock().geoloc_sharings.get(id).cloned()
    }

    pub fn get_generic_msrp(&self, id: &SessionId) -> Option<GenericSipSession> {
        self.inner.lock().sip_msrp.get(id).cloned()
    }

    pub fn get_generic_rtp(&self, id: &SessionId) -> Option<GenericSipSession> {
        self.inner.lock().sip_rtp.get(id).cloned()
    }

    /// Session owning the dialog `call_id`
    pub fn find_by_call_id(&self, call_id: &str) -> Option<RegisteredSession> {
        let id = self.inner.lock().by_call_id.get(call_id).cloned()?;
        self.get(&id)
    }

    pub fn file_transfers(&self) -> Vec<FileSharingSession> {
        self.inner.lock().file_transfers.values().cloned().collect()
    }

    pub fn generic_sessions(&self) -> Vec<GenericSipSession> {
        let inner = self.inner.lock();
        inner.sip_msrp.values().chain(inner.sip_rtp.values()).cloned().collect()
    }

    pub fn all_sessions(&self) -> Vec<RegisteredSession> {
        let inner = self.inner.lock();
        inner
            .file_transfers
            .values()
            .cloned()
            .map(RegisteredSession::FileTransfer)
            .chain(inner.geoloc_sharings.values().cloned().map(RegisteredSession::Geoloc))
            .chain(inner.sip_msrp.values().cloned().map(RegisteredSession::Generic))
            .chain(inner.sip_rtp.values().cloned().map(RegisteredSession::Generic))
            .collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.file_transfers.len() + inner.geoloc_sharings.len() + inner.sip_msrp.len() + inner.sip_rtp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        self.inner.lock().stats
    }
}
