//! SIP messages and the signalling collaborator

pub mod auth;
pub mod factory;
pub mod message;
pub mod transport;

pub use auth::{DigestChallenge, SessionAuthenticationAgent};
pub use factory::{reason_phrase, SipMessageFactory, SDP_CONTENT_TYPE};
pub use message::{
    extract_display_name, extract_uri, header_param, headers, SipHeaders, SipMethod, SipRequest,
    SipResponse,
};
pub use transport::SipTransport;
