//! The MSRP transport owned by a session
//!
//! Wraps an [`MsrpSession`] together with the local endpoint chosen during
//! negotiation. A session installs at most one of these at a time.

use std::net::IpAddr;

use parking_lot::Mutex;
use rcs_msrp_core::{
    ConnectionMode, LocalEndpoint, MsrpEvent, MsrpPath, MsrpSession, MsrpSessionConfig,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SettingsProvider;
use crate::errors::{Result, SessionError};
use crate::sdp::SetupRole;

pub struct MediaSession {
    msrp: MsrpSession,
    role: SetupRole,
    endpoint: Mutex<Option<LocalEndpoint>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<MsrpEvent>>>,
    closed: CancellationToken,
}

impl MediaSession {
    pub fn new(config: MsrpSessionConfig, endpoint: LocalEndpoint, role: SetupRole) -> Self {
        let (msrp, events) = MsrpSession::new(config);
        Self {
            msrp,
            role,
            endpoint: Mutex::new(Some(endpoint)),
            events: Mutex::new(Some(events)),
            closed: CancellationToken::new(),
        }
    }

    /// Allocate the local endpoint for `role` and build the session around it
    ///
    /// The active role advertises the placeholder port and binds nothing.
    pub async fn allocate(
        role: SetupRole,
        ip: IpAddr,
        secured: bool,
        settings: &dyn SettingsProvider,
        buffer_incoming: bool,
    ) -> Result<Self> {
        let endpoint = match role {
            SetupRole::Active => LocalEndpoint::Active,
            SetupRole::Passive | SetupRole::ActPass => {
                LocalEndpoint::bind_passive(ip, settings.default_msrp_port(), settings.msrp_port_span())
                    .await?
            }
        };
        let local_path = MsrpPath::local(ip.to_string(), endpoint.advertised_port(), secured);
        let mut config = MsrpSessionConfig::new(local_path);
        config.chunk_size = settings.msrp_chunk_size();
        config.response_timeout = settings.msrp_socket_timeout();
        config.connect_timeout = settings.msrp_socket_timeout();
        config.buffer_incoming = buffer_incoming;
        debug!(
            "Allocated {} MSRP endpoint on port {}",
            role,
            endpoint.advertised_port()
        );
        Ok(Self::new(config, endpoint, role))
    }

    /// Setup role advertised for this endpoint
    pub fn role(&self) -> SetupRole {
        self.role
    }

    pub fn msrp(&self) -> &MsrpSession {
        &self.msrp
    }

    pub fn local_path(&self) -> &MsrpPath {
        self.msrp.local_path()
    }

    pub fn advertised_port(&self) -> u16 {
        self.msrp.local_path().port
    }

    pub fn set_remote_path(&self, path: &str) -> Result<()> {
        self.msrp.set_remote_path(MsrpPath::parse(path)?);
        Ok(())
    }

    /// Event receiver, handed out once to the session's event task
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<MsrpEvent>> {
        self.events.lock().take()
    }

    /// Connect out to the remote endpoint
    pub async fn open_active(&self, host: &str, port: u16) -> Result<()> {
        self.msrp
            .open(ConnectionMode::Active {
                host: host.to_string(),
                port,
            })
            .await?;
        Ok(())
    }

    /// Accept the remote's connection on the listener bound at allocation
    pub async fn open_passive(&self) -> Result<()> {
        let endpoint = self.endpoint.lock().take();
        let listener = match endpoint {
            Some(LocalEndpoint::Passive { listener, .. }) => listener,
            Some(LocalEndpoint::Active) | None => {
                return Err(SessionError::invalid_state(
                    "no listening MSRP endpoint to accept on",
                ));
            }
        };
        self.msrp.open(ConnectionMode::Passive { listener }).await?;
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        matches!(*self.endpoint.lock(), Some(LocalEndpoint::Passive { .. }))
    }

    pub fn send_empty_chunk(&self) -> Result<()> {
        self.msrp.send_empty_chunk()?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled once the media is closed
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Close the transport and release the listener. Idempotent.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.msrp.close();
        self.endpoint.lock().take();
    }
}

#[cfg(feature = "tls")]
pub(crate) fn configure_tls(
    media: &MediaSession,
    listening: bool,
    settings: &dyn SettingsProvider,
) -> Result<()> {
    use rcs_msrp_core::{client_config_from_pem, server_config_from_pem, TlsMode};

    let paths = settings.tls_paths();
    let mode = if listening {
        let (Some(cert), Some(key)) = (paths.certificate, paths.private_key) else {
            return Err(SessionError::config(
                "secure MSRP needs tls_certificate and tls_private_key",
            ));
        };
        TlsMode::Server(server_config_from_pem(&cert, &key)?)
    } else {
        let Some(ca) = paths.ca_certificate else {
            return Err(SessionError::config("secure MSRP needs tls_ca_certificate"));
        };
        TlsMode::Client(client_config_from_pem(&ca)?)
    };
    media.msrp().set_tls(mode);
    Ok(())
}

#[cfg(not(feature = "tls"))]
pub(crate) fn configure_tls(
    _media: &MediaSession,
    _listening: bool,
    _settings: &dyn SettingsProvider,
) -> Result<()> {
    Err(SessionError::config("secure MSRP requires the tls feature"))
}

/// `a=fingerprint` value for our certificate
#[cfg(feature = "tls")]
pub(crate) fn local_fingerprint(settings: &dyn SettingsProvider) -> Option<String> {
    let cert = settings.tls_paths().certificate?;
    match rcs_msrp_core::certificate_fingerprint(&cert) {
        Ok(fingerprint) => Some(fingerprint),
        Err(e) => {
            tracing::warn!("Cannot compute certificate fingerprint: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "tls"))]
pub(crate) fn local_fingerprint(_settings: &dyn SettingsProvider) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RcsSettings;

    #[tokio::test]
    async fn test_active_role_binds_nothing() {
        let settings = RcsSettings::default();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let media = MediaSession::allocate(SetupRole::Active, ip, false, &settings, false)
            .await
            .unwrap();
        assert_eq!(media.advertised_port(), 9);
        assert_eq!(media.role(), SetupRole::Active);
        assert!(!media.is_listening());
        assert!(media.open_passive().await.is_err());
    }

    #[tokio::test]
    async fn test_passive_role_binds_listener_and_close_is_idempotent() {
        let settings = RcsSettings {
            default_msrp_port: 0,
            ..RcsSettings::default()
        };
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let media = MediaSession::allocate(SetupRole::Passive, ip, false, &settings, true)
            .await
            .unwrap();
        assert_ne!(media.advertised_port(), 9);
        assert!(media.is_listening());
        assert!(media.take_events().is_some());
        assert!(media.take_events().is_none());

        media.close();
        media.close();
        assert!(media.is_closed());
        assert!(!media.is_listening());
    }
}
