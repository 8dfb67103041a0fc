//! Events emitted by an MSRP transport session

use bytes::Bytes;

use crate::error::MsrpError;

/// Kind of payload carried by a chunk, used to route transfer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    FileSharing,
    GeoLocation,
    TextMessage,
    ImdnReport,
    EmptyChunk,
    Generic,
}

impl ChunkType {
    /// Map a content type onto the chunk kind it carries
    pub fn from_content_type(content_type: &str) -> Self {
        let ct = content_type.to_ascii_lowercase();
        if ct.starts_with("application/vnd.gsma.rcspushlocation+xml") {
            ChunkType::GeoLocation
        } else if ct.starts_with("message/imdn+xml") {
            ChunkType::ImdnReport
        } else if ct.starts_with("text/") || ct.starts_with("message/cpim") {
            ChunkType::TextMessage
        } else {
            ChunkType::FileSharing
        }
    }
}

/// Notification from the MSRP layer to the owning IMS session
#[derive(Debug)]
pub enum MsrpEvent {
    /// Local send progress, `current` bytes of `total` acknowledged-or-written
    TransferProgress { current: u64, total: u64 },

    /// A chunk of an incoming message arrived
    ChunkReceived {
        message_id: String,
        data: Bytes,
        current: u64,
        total: u64,
    },

    /// A complete incoming message was received (last chunk)
    DataReceived {
        message_id: String,
        data: Bytes,
        content_type: Option<String>,
    },

    /// Every chunk of an outgoing message was acknowledged
    DataTransferred { message_id: String },

    /// The peer aborted an incoming message or closed mid-transfer
    TransferAborted,

    /// An outgoing transfer failed
    TransferError {
        message_id: Option<String>,
        error: MsrpError,
        chunk_type: ChunkType,
    },

    /// The connection went away
    ConnectionClosed,
}
