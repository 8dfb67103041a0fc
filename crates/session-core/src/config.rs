//! Settings consumed by the session engine
//!
//! [`RcsSettings`] is a plain serde struct loaded from TOML. Sessions only see
//! it through the read-only [`SettingsProvider`] trait so that a host
//! application can plug in its own settings store.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SessionError};
use crate::logging::LoggingConfig;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcsSettings {
    /// Largest file accepted or sent, in bytes (0 = unlimited)
    pub max_file_transfer_size: u64,
    /// Above this size an incoming transfer is never auto-accepted (0 = no threshold)
    pub warn_file_transfer_size: u64,
    pub ft_auto_accept: bool,
    pub ft_auto_accept_in_roaming: bool,
    /// Use `TCP/TLS/MSRP` when the access network is Wi-Fi
    pub secure_msrp_over_wifi: bool,
    /// First port tried for passive MSRP listeners (0 = OS assigned)
    pub default_msrp_port: u16,
    /// Number of consecutive ports probed from `default_msrp_port`
    pub msrp_port_span: u16,
    /// Seconds a terminating session waits for the user's answer
    pub ringing_period_secs: u64,
    /// Seconds to wait for a SIP transaction to complete
    pub sip_transaction_timeout_secs: u64,
    /// Seconds to wait for an MSRP connection or chunk acknowledgement
    pub msrp_socket_timeout_secs: u64,
    pub msrp_chunk_size: usize,
    /// Session-Expires offered in INVITE (0 = no session timer)
    pub session_expire_secs: u32,
    pub behind_nat: bool,
    /// Our public user identity, e.g. `sip:+33612345678@ims.example.com`
    pub local_user: String,
    pub user_agent: String,
    pub digest_username: String,
    pub digest_password: String,
    /// Give up after this many 407 challenges for one request
    pub max_auth_attempts: u32,
    /// PEM files for `msrps` connections
    pub tls_certificate: Option<PathBuf>,
    pub tls_private_key: Option<PathBuf>,
    pub tls_ca_certificate: Option<PathBuf>,
    /// MIME types a generic MSRP session accepts
    pub generic_accept_types: Vec<String>,
    /// Directory incoming files are saved into
    pub file_root_directory: PathBuf,
    pub logging: LoggingConfig,
}

impl Default for RcsSettings {
    fn default() -> Self {
        Self {
            max_file_transfer_size: 10 * 1024 * 1024,
            warn_file_transfer_size: 3 * 1024 * 1024,
            ft_auto_accept: false,
            ft_auto_accept_in_roaming: false,
            secure_msrp_over_wifi: false,
            default_msrp_port: 20000,
            msrp_port_span: 50,
            ringing_period_secs: 120,
            sip_transaction_timeout_secs: 30,
            msrp_socket_timeout_secs: 30,
            msrp_chunk_size: rcs_msrp_core::DEFAULT_CHUNK_SIZE,
            session_expire_secs: 0,
            behind_nat: false,
            local_user: "sip:anonymous@localhost".to_string(),
            user_agent: "rcs-session-core".to_string(),
            digest_username: String::new(),
            digest_password: String::new(),
            max_auth_attempts: 3,
            tls_certificate: None,
            tls_private_key: None,
            tls_ca_certificate: None,
            generic_accept_types: vec!["text/plain".to_string()],
            file_root_directory: std::env::temp_dir().join("rcs-files"),
            logging: LoggingConfig::default(),
        }
    }
}

impl RcsSettings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: RcsSettings = toml::from_str(content)
            .map_err(|e| SessionError::config(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SessionError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.msrp_chunk_size == 0 {
            return Err(SessionError::config("msrp_chunk_size must be positive"));
        }
        if self.sip_transaction_timeout_secs == 0 || self.msrp_socket_timeout_secs == 0 {
            return Err(SessionError::config("timeouts must be positive"));
        }
        if self.ringing_period_secs == 0 {
            return Err(SessionError::config("ringing_period_secs must be positive"));
        }
        if !self.local_user.starts_with("sip:") && !self.local_user.starts_with("tel:") {
            return Err(SessionError::config(format!(
                "local_user '{}' is not a SIP or tel URI",
                self.local_user
            )));
        }
        if self.tls_certificate.is_some() != self.tls_private_key.is_some() {
            return Err(SessionError::config(
                "tls_certificate and tls_private_key must be set together",
            ));
        }
        if self.max_auth_attempts == 0 {
            return Err(SessionError::config("max_auth_attempts must be at least 1"));
        }
        self.logging.directives()?;
        Ok(())
    }
}

/// Read-only settings collaborator
pub trait SettingsProvider: Send + Sync {
    fn max_file_transfer_size(&self) -> u64;
    fn warn_file_transfer_size(&self) -> u64;
    fn ft_auto_accept(&self) -> bool;
    fn ft_auto_accept_in_roaming(&self) -> bool;
    fn secure_msrp_over_wifi(&self) -> bool;
    fn default_msrp_port(&self) -> u16;
    fn msrp_port_span(&self) -> u16;
    fn ringing_period(&self) -> Duration;
    fn sip_transaction_timeout(&self) -> Duration;
    fn msrp_socket_timeout(&self) -> Duration;
    fn msrp_chunk_size(&self) -> usize;
    fn session_expire(&self) -> u32;
    fn behind_nat(&self) -> bool;
    fn local_user(&self) -> String;
    fn user_agent(&self) -> String;
    fn digest_credentials(&self) -> (String, String);
    fn max_auth_attempts(&self) -> u32;
    fn generic_accept_types(&self) -> Vec<String>;
    fn tls_paths(&self) -> TlsPaths;
    fn file_root_directory(&self) -> PathBuf;
}

/// Locations of the PEM material for secure MSRP
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlsPaths {
    pub certificate: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub ca_certificate: Option<PathBuf>,
}

impl SettingsProvider for RcsSettings {
    fn max_file_transfer_size(&self) -> u64 {
        self.max_file_transfer_size
    }

    fn warn_file_transfer_size(&self) -> u64 {
        self.warn_file_transfer_size
    }

    fn ft_auto_accept(&self) -> bool {
        self.ft_auto_accept
    }

    fn ft_auto_accept_in_roaming(&self) -> bool {
        self.ft_auto_accept_in_roaming
    }

    fn secure_msrp_over_wifi(&self) -> bool {
        self.secure_msrp_over_wifi
    }

    fn default_msrp_port(&self) -> u16 {
        self.default_msrp_port
    }

    fn msrp_port_span(&self) -> u16 {
        self.msrp_port_span
    }

    fn ringing_period(&self) -> Duration {
        Duration::from_secs(self.ringing_period_secs)
    }

    fn sip_transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.sip_transaction_timeout_secs)
    }

    fn msrp_socket_timeout(&self) -> Duration {
        Duration::from_secs(self.msrp_socket_timeout_secs)
    }

    fn msrp_chunk_size(&self) -> usize {
        self.msrp_chunk_size
    }

    fn session_expire(&self) -> u32 {
        self.session_expire_secs
    }

    fn behind_nat(&self) -> bool {
        self.behind_nat
    }

    fn local_user(&self) -> String {
        self.local_user.clone()
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn digest_credentials(&self) -> (String, String) {
        (self.digest_username.clone(), self.digest_password.clone())
    }

    fn max_auth_attempts(&self) -> u32 {
        self.max_auth_attempts
    }

    fn generic_accept_types(&self) -> Vec<String> {
        self.generic_accept_types.clone()
    }

    fn tls_paths(&self) -> TlsPaths {
        TlsPaths {
            certificate: self.tls_certificate.clone(),
            private_key: self.tls_private_key.clone(),
            ca_certificate: self.tls_ca_certificate.clone(),
        }
    }

    fn file_root_directory(&self) -> PathBuf {
        self.file_root_directory.clone()
    }
}

/// Access network the IMS module currently uses
pub trait NetworkInfo: Send + Sync {
    fn is_roaming(&self) -> bool;
    fn is_wifi(&self) -> bool;
    fn local_ip(&self) -> IpAddr;
}

/// Fixed network description, for hosts without a connectivity manager
#[derive(Debug, Clone)]
pub struct StaticNetworkInfo {
    pub roaming: bool,
    pub wifi: bool,
    pub ip: IpAddr,
}

impl Default for StaticNetworkInfo {
    fn default() -> Self {
        Self {
            roaming: false,
            wifi: false,
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl NetworkInfo for StaticNetworkInfo {
    fn is_roaming(&self) -> bool {
        self.roaming
    }

    fn is_wifi(&self) -> bool {
        self.wifi
    }

    fn local_ip(&self) -> IpAddr {
        self.ip
    }
}
