//! MSRP URIs: `msrp://host:port/session-id;tcp` (RFC 4975 §6)

use std::fmt;

use rand::Rng;

use crate::error::{MsrpError, Result};

const SESSION_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A parsed MSRP URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsrpPath {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub session_id: String,
}

impl MsrpPath {
    pub fn new(host: impl Into<String>, port: u16, session_id: impl Into<String>, secure: bool) -> Self {
        Self {
            secure,
            host: host.into(),
            port,
            session_id: session_id.into(),
        }
    }

    /// Build a local path with a freshly generated session id
    pub fn local(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self::new(host, port, generate_session_id(), secure)
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let (secure, rest) = if let Some(rest) = uri.strip_prefix("msrps://") {
            (true, rest)
        } else if let Some(rest) = uri.strip_prefix("msrp://") {
            (false, rest)
        } else {
            return Err(MsrpError::parse(format!("not an MSRP URI: '{}'", uri)));
        };

        let (authority, resource) = rest
            .split_once('/')
            .ok_or_else(|| MsrpError::parse(format!("MSRP URI without session id: '{}'", uri)))?;
        let session_id = resource.split(';').next().unwrap_or_default();
        if session_id.is_empty() {
            return Err(MsrpError::parse(format!("MSRP URI without session id: '{}'", uri)));
        }

        // Bracketed IPv6 literal or host:port
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !port.contains(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| MsrpError::parse(format!("invalid port in '{}'", uri)))?;
                (host, port)
            }
            _ => return Err(MsrpError::parse(format!("MSRP URI without port: '{}'", uri))),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');

        Ok(Self::new(host, port, session_id, secure))
    }
}

impl fmt::Display for MsrpPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "msrps" } else { "msrp" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}/{};tcp", scheme, self.host, self.port, self.session_id)
        } else {
            write!(f, "{}://{}:{}/{};tcp", scheme, self.host, self.port, self.session_id)
        }
    }
}

/// Random session identifier for the local MSRP path
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| SESSION_ID_CHARS[rng.gen_range(0..SESSION_ID_CHARS.len())] as char)
        .collect()
}

/// Random MSRP transaction identifier
pub fn generate_transaction_id() -> String {
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| SESSION_ID_CHARS[rng.gen_range(0..SESSION_ID_CHARS.len())] as char)
        .collect()
}
