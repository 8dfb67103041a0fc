//! SIP request/response value types
//!
//! These are the messages exchanged with the [`SipTransport`](super::SipTransport)
//! collaborator. Wire parsing and transactions live in the transport; here we
//! only need ordered, case-insensitive headers and a body.

use std::fmt;

use bytes::Bytes;

pub mod headers {
    pub const CALL_ID: &str = "Call-ID";
    pub const CSEQ: &str = "CSeq";
    pub const FROM: &str = "From";
    pub const TO: &str = "To";
    pub const CONTACT: &str = "Contact";
    pub const ACCEPT_CONTACT: &str = "Accept-Contact";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const P_ASSERTED_IDENTITY: &str = "P-Asserted-Identity";
    pub const PROXY_AUTHENTICATE: &str = "Proxy-Authenticate";
    pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
    pub const ROUTE: &str = "Route";
    pub const RECORD_ROUTE: &str = "Record-Route";
    pub const SESSION_EXPIRES: &str = "Session-Expires";
    pub const MIN_SE: &str = "Min-SE";
    pub const SUPPORTED: &str = "Supported";
    pub const USER_AGENT: &str = "User-Agent";
    pub const MAX_FORWARDS: &str = "Max-Forwards";
    pub const ALLOW: &str = "Allow";
    pub const ACCEPT: &str = "Accept";
}

/// SIP request methods used by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Message,
    Other(String),
}

impl SipMethod {
    pub fn as_str(&self) -> &str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Message => "MESSAGE",
            SipMethod::Other(name) => name,
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SipMethod {
    fn from(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "INVITE" => SipMethod::Invite,
            "ACK" => SipMethod::Ack,
            "BYE" => SipMethod::Bye,
            "CANCEL" => SipMethod::Cancel,
            "MESSAGE" => SipMethod::Message,
            other => SipMethod::Other(other.to_string()),
        }
    }
}

/// Ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SipHeaders {
    entries: Vec<(String, String)>,
}

impl SipHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Append a value, keeping any existing ones
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Extract a `;name=value` parameter from a header value
pub fn header_param(value: &str, name: &str) -> Option<String> {
    // Parameters after a closing '>' belong to the header, not the URI.
    let params = match value.rfind('>') {
        Some(idx) => &value[idx + 1..],
        None => value,
    };
    params.split(';').skip(1).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| val.trim().trim_matches('"').to_string())
    })
}

/// Extract the URI from a name-addr or addr-spec header value
pub fn extract_uri(value: &str) -> String {
    let value = value.trim();
    if let (Some(start), Some(end)) = (value.find('<'), value.find('>')) {
        if start < end {
            return value[start + 1..end].trim().to_string();
        }
    }
    value.split(';').next().unwrap_or(value).trim().to_string()
}

/// Extract the quoted display name of a name-addr, if any
pub fn extract_display_name(value: &str) -> Option<String> {
    let value = value.trim();
    let before = &value[..value.find('<')?];
    let name = before.trim().trim_matches('"').trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn parse_cseq(headers: &SipHeaders) -> Option<(u32, SipMethod)> {
    let value = headers.get(headers::CSEQ)?;
    let mut parts = value.split_whitespace();
    let number = parts.next()?.parse().ok()?;
    let method = SipMethod::from(parts.next()?);
    Some((number, method))
}

fn body_as_str(body: &Option<Bytes>) -> Option<&str> {
    body.as_ref().and_then(|b| std::str::from_utf8(b).ok())
}

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipRequest {
    pub method: SipMethod,
    pub uri: String,
    pub headers: SipHeaders,
    pub body: Option<Bytes>,
}

impl SipRequest {
    pub fn new(method: SipMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: SipHeaders::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers.set(headers::CONTENT_TYPE, content_type);
        self.headers.set(headers::CONTENT_LENGTH, body.len().to_string());
        self.body = Some(body);
        self
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get(headers::CALL_ID)
    }

    pub fn cseq(&self) -> Option<u32> {
        parse_cseq(&self.headers).map(|(n, _)| n)
    }

    pub fn from_header(&self) -> Option<&str> {
        self.headers.get(headers::FROM)
    }

    pub fn to_header(&self) -> Option<&str> {
        self.headers.get(headers::TO)
    }

    pub fn from_tag(&self) -> Option<String> {
        self.from_header().and_then(|v| header_param(v, "tag"))
    }

    pub fn to_tag(&self) -> Option<String> {
        self.to_header().and_then(|v| header_param(v, "tag"))
    }

    pub fn from_uri(&self) -> Option<String> {
        self.from_header().map(extract_uri)
    }

    /// URI of the Contact header, where in-dialog requests are targeted
    pub fn contact_uri(&self) -> Option<String> {
        self.headers.get(headers::CONTACT).map(extract_uri)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(headers::CONTENT_TYPE)
    }

    pub fn body_str(&self) -> Option<&str> {
        body_as_str(&self.body)
    }

    /// Whether the Contact or Accept-Contact headers carry `feature_tag`
    pub fn has_feature_tag(&self, feature_tag: &str) -> bool {
        let tag = feature_tag.to_ascii_lowercase();
        self.headers
            .get_all(headers::CONTACT)
            .chain(self.headers.get_all(headers::ACCEPT_CONTACT))
            .any(|value| value.to_ascii_lowercase().contains(&tag))
    }
}

impl fmt::Display for SipRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0", self.method, self.uri)?;
        for (name, value) in self.headers.iter() {
            write!(f, "\r\n{}: {}", name, value)?;
        }
        f.write_str("\r\n\r\n")?;
        if let Some(body) = body_as_str(&self.body) {
            f.write_str(body)?;
        }
        Ok(())
    }
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    pub headers: SipHeaders,
    pub body: Option<Bytes>,
}

impl SipResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: SipHeaders::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers.set(headers::CONTENT_TYPE, content_type);
        self.headers.set(headers::CONTENT_LENGTH, body.len().to_string());
        self.body = Some(body);
        self
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get(headers::CALL_ID)
    }

    pub fn cseq(&self) -> Option<u32> {
        parse_cseq(&self.headers).map(|(n, _)| n)
    }

    pub fn cseq_method(&self) -> Option<SipMethod> {
        parse_cseq(&self.headers).map(|(_, m)| m)
    }

    pub fn to_tag(&self) -> Option<String> {
        self.headers.get(headers::TO).and_then(|v| header_param(v, "tag"))
    }

    pub fn contact_uri(&self) -> Option<String> {
        self.headers.get(headers::CONTACT).map(extract_uri)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(headers::CONTENT_TYPE)
    }

    pub fn body_str(&self) -> Option<&str> {
        body_as_str(&self.body)
    }
}

impl fmt::Display for SipResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {} {}", self.status, self.reason)?;
        for (name, value) in self.headers.iter() {
            write!(f, "\r\n{}: {}", name, value)?;
        }
        f.write_str("\r\n\r\n")?;
        if let Some(body) = body_as_str(&self.body) {
            f.write_str(body)?;
        }
        Ok(())
    }
}
