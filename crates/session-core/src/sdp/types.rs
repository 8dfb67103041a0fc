//! Types for SDP negotiation

use std::fmt;

pub const MSRP_PROTOCOL: &str = "TCP/MSRP";
pub const MSRPS_PROTOCOL: &str = "TCP/TLS/MSRP";

/// Connection setup role of RFC 4145
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupRole {
    /// Will connect out
    Active,
    /// Will accept an incoming connection
    Passive,
    /// Either, decided by the answer
    ActPass,
}

impl SetupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupRole::Active => "active",
            SetupRole::Passive => "passive",
            SetupRole::ActPass => "actpass",
        }
    }

    /// Parse an `a=setup` value, `None` for unknown values such as `holdconn`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(SetupRole::Active),
            "passive" => Some(SetupRole::Passive),
            "actpass" => Some(SetupRole::ActPass),
            _ => None,
        }
    }
}

impl fmt::Display for SetupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media direction attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDirection {
    SendOnly,
    RecvOnly,
    SendRecv,
}

impl MediaDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::SendRecv => "sendrecv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "sendrecv" => Some(MediaDirection::SendRecv),
            _ => None,
        }
    }
}

/// One `a=` line: `a=name:value` or flag `a=name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpAttribute {
    pub name: String,
    pub value: Option<String>,
}

/// One `m=` block with its attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<String>,
    /// Address of a media-level `c=` line
    pub connection: Option<String>,
    pub attributes: Vec<SdpAttribute>,
}

impl MediaDescription {
    /// Value of the first attribute called `name`; flags yield `Some("")`
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn direction(&self) -> Option<MediaDirection> {
        self.attributes
            .iter()
            .find_map(|a| MediaDirection::parse(&a.name))
    }

    pub fn is_secured_msrp(&self) -> bool {
        self.protocol.eq_ignore_ascii_case(MSRPS_PROTOCOL)
    }
}

/// A parsed session description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescription {
    pub origin: Option<String>,
    /// Address of the session-level `c=` line
    pub connection: Option<String>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Address to reach `media` at, media-level `c=` winning over session level
    pub fn remote_host(&self, media: &MediaDescription) -> Option<String> {
        media.connection.clone().or_else(|| self.connection.clone())
    }
}

/// `a=file-selector` content (RFC 5547)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSelector {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

impl FileSelector {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            name: Some(name.into()),
            mime_type: Some(mime_type.into()),
            size: Some(size),
        }
    }

    pub fn parse(value: &str) -> Self {
        let mut selector = FileSelector::default();
        let mut rest = value.trim();
        while !rest.is_empty() {
            let Some((key, after)) = rest.split_once(':') else {
                break;
            };
            let (val, remaining) = if let Some(quoted) = after.strip_prefix('"') {
                match quoted.split_once('"') {
                    Some((val, remaining)) => (val, remaining),
                    None => (quoted, ""),
                }
            } else {
                match after.split_once(' ') {
                    Some((val, remaining)) => (val, remaining),
                    None => (after, ""),
                }
            };
            match key.trim() {
                "name" => selector.name = Some(val.to_string()),
                "type" => selector.mime_type = Some(val.to_string()),
                "size" => selector.size = val.trim().parse().ok(),
                _ => {}
            }
            rest = remaining.trim_start();
        }
        selector
    }
}

impl fmt::Display for FileSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(format!("name:\"{}\"", name));
        }
        if let Some(mime_type) = &self.mime_type {
            parts.push(format!("type:{}", mime_type));
        }
        if let Some(size) = self.size {
            parts.push(format!("size:{}", size));
        }
        f.write_str(&parts.join(" "))
    }
}
