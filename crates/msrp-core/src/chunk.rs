//! MSRP message codec (RFC 4975 §7)
//!
//! An MSRP message is a start line, a header block, an optional body and an
//! end-line made of seven dashes, the transaction id and a continuation flag:
//!
//! ```text
//! MSRP a786hjs2 SEND
//! To-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp
//! From-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp
//! Message-ID: 87652491
//! Byte-Range: 1-25/25
//! Content-Type: text/plain
//!
//! Hey Bob, are you there?
//! -------a786hjs2$
//! ```
//!
//! [`MsrpCodec`] implements the tokio-util `Decoder`/`Encoder` pair so the
//! transport session can use `FramedRead`/`FramedWrite` over any byte stream.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{MsrpError, Result};

/// Protocol token that starts every MSRP start line
pub const MSRP_PROTOCOL: &str = "MSRP";

/// Header names used by this stack
pub mod headers {
    pub const TO_PATH: &str = "To-Path";
    pub const FROM_PATH: &str = "From-Path";
    pub const MESSAGE_ID: &str = "Message-ID";
    pub const BYTE_RANGE: &str = "Byte-Range";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const FAILURE_REPORT: &str = "Failure-Report";
    pub const SUCCESS_REPORT: &str = "Success-Report";
    pub const STATUS: &str = "Status";
}

const END_LINE_DASHES: &str = "-------";

/// Upper bound on the size of a start line plus header block
const MAX_HEADER_BLOCK: usize = 16 * 1024;

/// Largest chunk body accepted from a peer
pub const MAX_CHUNK_BODY: usize = 1024 * 1024;

/// Continuation flag closing an MSRP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationFlag {
    /// `+` more chunks follow
    More,
    /// `$` last chunk of the message
    Last,
    /// `#` the sender aborted the message
    Abort,
}

impl ContinuationFlag {
    pub fn as_byte(&self) -> u8 {
        match self {
            ContinuationFlag::More => b'+',
            ContinuationFlag::Last => b'$',
            ContinuationFlag::Abort => b'#',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'+' => Some(ContinuationFlag::More),
            b'$' => Some(ContinuationFlag::Last),
            b'#' => Some(ContinuationFlag::Abort),
            _ => None,
        }
    }
}

/// MSRP request methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsrpMethod {
    Send,
    Report,
    Other(String),
}

impl MsrpMethod {
    fn parse(token: &str) -> Self {
        match token {
            "SEND" => MsrpMethod::Send,
            "REPORT" => MsrpMethod::Report,
            other => MsrpMethod::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MsrpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsrpMethod::Send => write!(f, "SEND"),
            MsrpMethod::Report => write!(f, "REPORT"),
            MsrpMethod::Other(m) => write!(f, "{}", m),
        }
    }
}

/// Distinguishes requests from transaction responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsrpStartLine {
    Request(MsrpMethod),
    Response { status: u16, comment: Option<String> },
}

/// `Byte-Range` header value: `start-end/total`, `*` for unknown end or total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
    pub total: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: u64, total: u64) -> Self {
        Self {
            start,
            end: Some(end),
            total: Some(total),
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let (range, total) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| MsrpError::parse(format!("invalid Byte-Range '{}'", value)))?;
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| MsrpError::parse(format!("invalid Byte-Range '{}'", value)))?;
        let start = start
            .parse::<u64>()
            .map_err(|_| MsrpError::parse(format!("invalid Byte-Range start '{}'", start)))?;
        let parse_opt = |s: &str| -> Result<Option<u64>> {
            if s == "*" {
                Ok(None)
            } else {
                s.parse::<u64>()
                    .map(Some)
                    .map_err(|_| MsrpError::parse(format!("invalid Byte-Range value '{}'", s)))
            }
        };
        Ok(Self {
            start,
            end: parse_opt(end)?,
            total: parse_opt(total)?,
        })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.start)?;
        match self.end {
            Some(end) => write!(f, "{}", end)?,
            None => write!(f, "*")?,
        }
        match self.total {
            Some(total) => write!(f, "/{}", total),
            None => write!(f, "/*"),
        }
    }
}

/// One MSRP request or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsrpMessage {
    pub transaction_id: String,
    pub start_line: MsrpStartLine,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub flag: ContinuationFlag,
}

impl MsrpMessage {
    /// Build a SEND request without body
    pub fn send(transaction_id: impl Into<String>, to_path: &str, from_path: &str, message_id: &str) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            start_line: MsrpStartLine::Request(MsrpMethod::Send),
            headers: vec![
                (headers::TO_PATH.to_string(), to_path.to_string()),
                (headers::FROM_PATH.to_string(), from_path.to_string()),
                (headers::MESSAGE_ID.to_string(), message_id.to_string()),
            ],
            body: None,
            flag: ContinuationFlag::Last,
        }
    }

    /// Build the transaction response to `request`.
    ///
    /// The paths are swapped: the response goes back along the request's From-Path.
    pub fn response_to(request: &MsrpMessage, status: u16, comment: &str) -> Self {
        let mut headers = Vec::with_capacity(2);
        if let Some(from) = request.header(headers::FROM_PATH) {
            headers.push((headers::TO_PATH.to_string(), first_path(from).to_string()));
        }
        if let Some(to) = request.header(headers::TO_PATH) {
            headers.push((headers::FROM_PATH.to_string(), first_path(to).to_string()));
        }
        Self {
            transaction_id: request.transaction_id.clone(),
            start_line: MsrpStartLine::Response {
                status,
                comment: Some(comment.to_string()),
            },
            headers,
            body: None,
            flag: ContinuationFlag::Last,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_flag(mut self, flag: ContinuationFlag) -> Self {
        self.flag = flag;
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start_line, MsrpStartLine::Request(_))
    }

    pub fn method(&self) -> Option<&MsrpMethod> {
        match &self.start_line {
            MsrpStartLine::Request(m) => Some(m),
            MsrpStartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start_line {
            MsrpStartLine::Response { status, .. } => Some(*status),
            MsrpStartLine::Request(_) => None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header(headers::MESSAGE_ID)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(headers::CONTENT_TYPE)
    }

    pub fn byte_range(&self) -> Option<ByteRange> {
        self.header(headers::BYTE_RANGE)
            .and_then(|v| ByteRange::parse(v).ok())
    }

    /// Whether the sender wants a transaction response (`Failure-Report` other than `no`)
    pub fn wants_response(&self) -> bool {
        !matches!(self.header(headers::FAILURE_REPORT), Some(v) if v.eq_ignore_ascii_case("no"))
    }

    /// Serialize into the wire representation
    pub fn encode_into(&self, dst: &mut BytesMut) {
        let body_len = self.body.as_ref().map(|b| b.len()).unwrap_or(0);
        dst.reserve(256 + body_len);
        dst.put_slice(MSRP_PROTOCOL.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.transaction_id.as_bytes());
        match &self.start_line {
            MsrpStartLine::Request(method) => {
                dst.put_u8(b' ');
                dst.put_slice(method.to_string().as_bytes());
            }
            MsrpStartLine::Response { status, comment } => {
                dst.put_slice(format!(" {:03}", status).as_bytes());
                if let Some(comment) = comment {
                    dst.put_u8(b' ');
                    dst.put_slice(comment.as_bytes());
                }
            }
        }
        dst.put_slice(b"\r\n");
        for (name, value) in &self.headers {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        if let Some(body) = &self.body {
            dst.put_slice(b"\r\n");
            dst.put_slice(body);
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(END_LINE_DASHES.as_bytes());
        dst.put_slice(self.transaction_id.as_bytes());
        dst.put_u8(self.flag.as_byte());
        dst.put_slice(b"\r\n");
    }
}

/// First URI of a space separated MSRP path list
fn first_path(paths: &str) -> &str {
    paths.split_whitespace().next().unwrap_or(paths)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Streaming codec for MSRP messages
#[derive(Debug, Default, Clone)]
pub struct MsrpCodec {
    /// Body bytes of the pending frame already searched for the end-line
    body_scanned: usize,
}

impl MsrpCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_start_line(line: &[u8]) -> Result<(String, MsrpStartLine)> {
        let line = std::str::from_utf8(line)
            .map_err(|_| MsrpError::parse("start line is not UTF-8"))?;
        let mut parts = line.splitn(4, ' ');
        if parts.next() != Some(MSRP_PROTOCOL) {
            return Err(MsrpError::parse(format!("not an MSRP start line: '{}'", line)));
        }
        let transaction_id = parts
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MsrpError::parse("missing transaction id"))?
            .to_string();
        let token = parts
            .next()
            .ok_or_else(|| MsrpError::parse("missing method or status"))?;
        let start_line = match token.parse::<u16>() {
            Ok(status) if token.len() == 3 => MsrpStartLine::Response {
                status,
                comment: parts.next().map(|c| c.to_string()),
            },
            _ => MsrpStartLine::Request(MsrpMethod::parse(token)),
        };
        Ok((transaction_id, start_line))
    }

    fn parse_header(line: &[u8]) -> Result<(String, String)> {
        let line = std::str::from_utf8(line)
            .map_err(|_| MsrpError::parse("header is not UTF-8"))?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MsrpError::parse(format!("malformed header '{}'", line)))?;
        Ok((name.trim().to_string(), value.trim().to_string()))
    }
}

impl Decoder for MsrpCodec {
    type Item = MsrpMessage;
    type Error = MsrpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<MsrpMessage>> {
        let Some(line_end) = find(src, b"\r\n") else {
            if src.len() > MAX_HEADER_BLOCK {
                return Err(MsrpError::parse("start line too long"));
            }
            return Ok(None);
        };
        let (transaction_id, start_line) = Self::parse_start_line(&src[..line_end])?;
        let end_marker = format!("{}{}", END_LINE_DASHES, transaction_id);

        let mut headers = Vec::new();
        let mut pos = line_end + 2;
        loop {
            let Some(rel) = find(&src[pos..], b"\r\n") else {
                if src.len() - pos > MAX_HEADER_BLOCK {
                    return Err(MsrpError::parse("header block too long"));
                }
                return Ok(None);
            };
            let line = &src[pos..pos + rel];

            if line.len() == end_marker.len() + 1 && line.starts_with(end_marker.as_bytes()) {
                let flag = ContinuationFlag::from_byte(line[line.len() - 1])
                    .ok_or_else(|| MsrpError::parse("invalid continuation flag"))?;
                let consumed = pos + rel + 2;
                let _ = src.split_to(consumed);
                return Ok(Some(MsrpMessage {
                    transaction_id,
                    start_line,
                    headers,
                    body: None,
                    flag,
                }));
            }

            if line.is_empty() {
                let body_start = pos + 2;
                let terminator = format!("\r\n{}", end_marker);
                // Resume where the previous call stopped, keeping room for a split terminator
                let resume = self.body_scanned.saturating_sub(terminator.len() - 1);
                let Some(found) = find(&src[body_start + resume..], terminator.as_bytes()) else {
                    self.body_scanned = src.len() - body_start;
                    if self.body_scanned > MAX_CHUNK_BODY + terminator.len() {
                        self.body_scanned = 0;
                        return Err(MsrpError::parse(format!(
                            "chunk body exceeds {} bytes",
                            MAX_CHUNK_BODY
                        )));
                    }
                    return Ok(None);
                };
                let body_len = resume + found;
                if body_len > MAX_CHUNK_BODY {
                    self.body_scanned = 0;
                    return Err(MsrpError::parse(format!("chunk body exceeds {} bytes", MAX_CHUNK_BODY)));
                }
                self.body_scanned = body_len;
                let flag_pos = body_start + body_len + terminator.len();
                if src.len() < flag_pos + 3 {
                    return Ok(None);
                }
                let flag = ContinuationFlag::from_byte(src[flag_pos])
                    .ok_or_else(|| MsrpError::parse("invalid continuation flag"))?;
                if &src[flag_pos + 1..flag_pos + 3] != b"\r\n" {
                    return Err(MsrpError::parse("end-line not terminated by CRLF"));
                }
                self.body_scanned = 0;
                let mut frame = src.split_to(flag_pos + 3).freeze();
                let body = frame.split_off(body_start).slice(0..body_len);
                return Ok(Some(MsrpMessage {
                    transaction_id,
                    start_line,
                    headers,
                    body: Some(body),
                    flag,
                }));
            }

            headers.push(Self::parse_header(line)?);
            pos += rel + 2;
        }
    }
}

impl Encoder<MsrpMessage> for MsrpCodec {
    type Error = MsrpError;

    fn encode(&mut self, item: MsrpMessage, dst: &mut BytesMut) -> Result<()> {
        item.encode_into(dst);
        Ok(())
    }
}
