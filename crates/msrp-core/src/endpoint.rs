//! Local MSRP media endpoint
//!
//! The active side of a connection never listens: it advertises the
//! placeholder port 9 in SDP and dials out. The passive side binds a real
//! listener, probing upward from the configured default port.

use std::net::{IpAddr, SocketAddr};

use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::error::{MsrpError, Result};

/// Port advertised by the active side (RFC 4145 discard port)
pub const ACTIVE_PLACEHOLDER_PORT: u16 = 9;

/// Number of consecutive ports tried before giving up
pub const DEFAULT_PORT_ATTEMPTS: u16 = 50;

/// Where the local MSRP connection comes from
#[derive(Debug)]
pub enum LocalEndpoint {
    /// We connect out; nothing is bound locally
    Active,
    /// We accept on a bound listener
    Passive { listener: TcpListener, port: u16 },
}

impl LocalEndpoint {
    /// Port to advertise in the SDP `m=` line
    pub fn advertised_port(&self) -> u16 {
        match self {
            LocalEndpoint::Active => ACTIVE_PLACEHOLDER_PORT,
            LocalEndpoint::Passive { port, .. } => *port,
        }
    }

    pub fn is_passive(&self) -> bool {
        matches!(self, LocalEndpoint::Passive { .. })
    }

    /// Bind a passive endpoint on `ip`, starting at `default_port`.
    ///
    /// A default port of 0 lets the OS pick a free port.
    pub async fn bind_passive(ip: IpAddr, default_port: u16, attempts: u16) -> Result<Self> {
        let (listener, port) = bind_with_probe(ip, default_port, attempts).await?;
        Ok(LocalEndpoint::Passive { listener, port })
    }
}

/// Bind the first free port in `default_port..default_port + attempts`
pub async fn bind_with_probe(ip: IpAddr, default_port: u16, attempts: u16) -> Result<(TcpListener, u16)> {
    if default_port == 0 {
        let listener = TcpListener::bind(SocketAddr::new(ip, 0)).await?;
        let port = listener.local_addr()?.port();
        debug!("MSRP listener bound on OS assigned port {}", port);
        return Ok((listener, port));
    }

    let mut last_err = None;
    for offset in 0..attempts.max(1) {
        let Some(port) = default_port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind(SocketAddr::new(ip, port)).await {
            Ok(listener) => {
                debug!("MSRP listener bound on {}:{}", ip, port);
                return Ok((listener, port));
            }
            Err(e) => {
                debug!("MSRP port {} unavailable: {}", port, e);
                last_err = Some(e);
            }
        }
    }

    warn!(
        "No free MSRP port in {}..{} on {}",
        default_port,
        default_port.saturating_add(attempts),
        ip
    );
    Err(match last_err {
        Some(e) => MsrpError::Io(e),
        None => MsrpError::config(format!("invalid MSRP port range starting at {}", default_port)),
    })
}
