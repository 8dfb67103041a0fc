//! The SIP transaction layer collaborator
//!
//! The engine never touches sockets for signalling. It hands complete
//! requests/responses to a [`SipTransport`] and awaits transaction results.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

use super::message::{SipRequest, SipResponse};

/// Transaction-level access to the SIP stack
///
/// Implementations must return `SessionError::Timeout` when a transaction
/// ends without the awaited message.
#[async_trait]
pub trait SipTransport: Send + Sync {
    /// Send a request and return its final response
    async fn send_request_and_wait(&self, request: SipRequest, timeout: Duration) -> Result<SipResponse>;

    /// Send a request without waiting for a response (ACK, CANCEL)
    async fn send_request(&self, request: SipRequest) -> Result<()>;

    /// Send a response without waiting for anything
    async fn send_response(&self, response: SipResponse) -> Result<()>;

    /// Send a 2xx to an INVITE and return the ACK that confirms it
    async fn send_response_and_wait_ack(&self, response: SipResponse, timeout: Duration) -> Result<SipRequest>;
}
