//! # rcs-msrp-core
//!
//! MSRP (RFC 4975) for the RCS IMS stack: the message codec, MSRP URIs,
//! local endpoint allocation and a connection-oriented transport session that
//! chunks outgoing content and reassembles incoming content.
//!
//! ```no_run
//! use rcs_msrp_core::{ConnectionMode, MsrpPath, MsrpSession, MsrpSessionConfig};
//!
//! # async fn demo() -> rcs_msrp_core::Result<()> {
//! let config = MsrpSessionConfig::new(MsrpPath::local("10.0.0.1", 9, false));
//! let (session, mut events) = MsrpSession::new(config);
//! session.set_remote_path(MsrpPath::parse("msrp://10.0.0.2:20000/abc;tcp")?);
//! session
//!     .open(ConnectionMode::Active { host: "10.0.0.2".into(), port: 20000 })
//!     .await?;
//! session.send_empty_chunk()?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod path;
pub mod session;
#[cfg(feature = "tls")]
pub mod tls;
pub mod transaction;

pub use chunk::{ByteRange, ContinuationFlag, MsrpCodec, MsrpMessage, MsrpMethod, MsrpStartLine, MAX_CHUNK_BODY};
pub use endpoint::{bind_with_probe, LocalEndpoint, ACTIVE_PLACEHOLDER_PORT, DEFAULT_PORT_ATTEMPTS};
pub use error::{MsrpError, Result};
pub use events::{ChunkType, MsrpEvent};
pub use path::{generate_session_id, generate_transaction_id, MsrpPath};
pub use session::{
    ConnectionMode, MsrpSession, MsrpSessionConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_RESPONSE_TIMEOUT,
};
#[cfg(feature = "tls")]
pub use session::TlsMode;

#[cfg(feature = "tls")]
pub use tls::{certificate_fingerprint, client_config_from_pem, fingerprint_of, server_config_from_pem};
