//! Identifiers and flags of one SIP dialog
//!
//! A [`DialogPath`] is created by its session (from the local side for an
//! outgoing INVITE, from the received INVITE otherwise) and mutated only by
//! that session as the handshake progresses.

use std::time::Duration;

use crate::sip::{SipRequest, headers};

/// Dialog identifiers, CSeq counter, negotiated SDP and lifecycle flags
#[derive(Debug, Clone)]
pub struct DialogPath {
    call_id: String,
    cseq: u32,
    local_tag: String,
    remote_tag: Option<String>,
    /// Request-URI for in-dialog requests
    target: String,
    local_party: String,
    remote_party: String,
    invite: Option<SipRequest>,
    local_content: Option<String>,
    remote_content: Option<String>,
    route: Vec<String>,
    session_expire: u32,
    sig_established: bool,
    session_established: bool,
    session_cancelled: bool,
    session_terminated: bool,
}

impl DialogPath {
    /// Dialog for a request we originate
    pub fn originating(call_id: impl Into<String>, target: impl Into<String>, local_party: impl Into<String>, remote_party: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            cseq: 1,
            local_tag: generate_tag(),
            remote_tag: None,
            target: target.into(),
            local_party: local_party.into(),
            remote_party: remote_party.into(),
            invite: None,
            local_content: None,
            remote_content: None,
            route: Vec::new(),
            session_expire: 0,
            sig_established: false,
            session_established: false,
            session_cancelled: false,
            session_terminated: false,
        }
    }

    /// Dialog for a received INVITE
    ///
    /// The remote side becomes the target of in-dialog requests and the
    /// Record-Route set is reversed into our route set.
    pub fn terminating(invite: &SipRequest, local_party: impl Into<String>) -> Self {
        let remote_party = invite.from_uri().unwrap_or_default();
        let target = invite.contact_uri().unwrap_or_else(|| remote_party.clone());
        let route = invite
            .headers
            .get_all(headers::RECORD_ROUTE)
            .map(str::to_string)
            .collect();
        Self {
            call_id: invite.call_id().unwrap_or_default().to_string(),
            cseq: invite.cseq().unwrap_or(1),
            local_tag: generate_tag(),
            remote_tag: invite.from_tag(),
            target,
            local_party: local_party.into(),
            remote_party,
            invite: Some(invite.clone()),
            local_content: None,
            remote_content: invite.body_str().map(str::to_string),
            route,
            session_expire: invite
                .headers
                .get(headers::SESSION_EXPIRES)
                .and_then(parse_delta_seconds)
                .unwrap_or(0),
            sig_established: false,
            session_established: false,
            session_cancelled: false,
            session_terminated: false,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn increment_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn remote_tag(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    pub fn set_remote_tag(&mut self, tag: impl Into<String>) {
        self.remote_tag = Some(tag.into());
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    pub fn local_party(&self) -> &str {
        &self.local_party
    }

    pub fn remote_party(&self) -> &str {
        &self.remote_party
    }

    pub fn invite(&self) -> Option<&SipRequest> {
        self.invite.as_ref()
    }

    pub fn set_invite(&mut self, invite: SipRequest) {
        self.invite = Some(invite);
    }

    pub fn local_content(&self) -> Option<&str> {
        self.local_content.as_deref()
    }

    pub fn set_local_content(&mut self, sdp: impl Into<String>) {
        self.local_content = Some(sdp.into());
    }

    pub fn remote_content(&self) -> Option<&str> {
        self.remote_content.as_deref()
    }

    pub fn set_remote_content(&mut self, sdp: impl Into<String>) {
        self.remote_content = Some(sdp.into());
    }

    pub fn route(&self) -> &[String] {
        &self.route
    }

    pub fn set_route(&mut self, route: Vec<String>) {
        self.route = route;
    }

    /// Session-Expires in seconds, 0 when no session timer is used
    pub fn session_expire(&self) -> u32 {
        self.session_expire
    }

    pub fn set_session_expire(&mut self, secs: u32) {
        self.session_expire = secs;
    }

    /// Raise the session expiry to at least `min_se` (after a 422)
    pub fn set_min_session_expire(&mut self, min_se: u32) {
        if min_se > self.session_expire {
            self.session_expire = min_se;
        }
    }

    pub fn session_expire_duration(&self) -> Option<Duration> {
        (self.session_expire > 0).then(|| Duration::from_secs(u64::from(self.session_expire)))
    }

    /// A final 2xx has been exchanged
    pub fn is_sig_established(&self) -> bool {
        self.sig_established
    }

    pub fn sig_established(&mut self) {
        self.sig_established = true;
    }

    /// The ACK has been exchanged
    pub fn is_session_established(&self) -> bool {
        self.session_established
    }

    pub fn session_established(&mut self) {
        self.session_established = true;
    }

    pub fn is_session_cancelled(&self) -> bool {
        self.session_cancelled
    }

    pub fn session_cancelled(&mut self) {
        self.session_cancelled = true;
    }

    pub fn is_session_terminated(&self) -> bool {
        self.session_terminated
    }

    pub fn session_terminated(&mut self) {
        self.session_terminated = true;
    }
}

/// Random dialog tag
pub fn generate_tag() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
}

/// Random Call-ID scoped to `host`
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", uuid::Uuid::new_v4().simple(), host)
}

/// Delta-seconds of a Session-Expires or Min-SE value (`1800;refresher=uac`)
pub fn parse_delta_seconds(value: &str) -> Option<u32> {
    value.split(';').next()?.trim().parse().ok()
}
