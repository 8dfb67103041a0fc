//! SDP parsing and extraction of the MSRP media parameters

use crate::errors::{Result, SessionError};

use super::types::{FileSelector, MediaDescription, SdpAttribute, SessionDescription, SetupRole};

/// Address from a `c=IN IP4 <addr>` value
fn connection_address(value: &str) -> Option<String> {
    value.split_whitespace().nth(2).map(|addr| {
        // Multicast TTL suffix
        addr.split('/').next().unwrap_or(addr).to_string()
    })
}

/// Parse an SDP body
///
/// Unknown lines are ignored. A malformed `m=` line is an error.
pub fn parse_sdp(sdp: &str) -> Result<SessionDescription> {
    let mut description = SessionDescription::default();
    let mut saw_version = false;

    for line in sdp.lines() {
        let line = line.trim_end_matches('\r');
        let Some((kind, value)) = line.split_once('=') else {
            continue;
        };
        match kind {
            "v" => saw_version = true,
            "o" => description.origin = Some(value.to_string()),
            "c" => {
                let address = connection_address(value);
                match description.media.last_mut() {
                    Some(media) => media.connection = address,
                    None => description.connection = address,
                }
            }
            "m" => description.media.push(parse_media_line(value)?),
            "a" => {
                let attribute = match value.split_once(':') {
                    Some((name, val)) => SdpAttribute {
                        name: name.to_string(),
                        value: Some(val.to_string()),
                    },
                    None => SdpAttribute {
                        name: value.to_string(),
                        value: None,
                    },
                };
                // Session-level attributes are not used by any session kind.
                if let Some(media) = description.media.last_mut() {
                    media.attributes.push(attribute);
                }
            }
            _ => {}
        }
    }

    if !saw_version {
        return Err(SessionError::sdp("missing v= line"));
    }
    Ok(description)
}

fn parse_media_line(value: &str) -> Result<MediaDescription> {
    let mut parts = value.split_whitespace();
    let (Some(media), Some(port), Some(protocol)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(SessionError::sdp(format!("malformed media line '{}'", value)));
    };
    let port = port
        .split('/')
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| SessionError::sdp(format!("invalid media port in '{}'", value)))?;
    Ok(MediaDescription {
        media: media.to_string(),
        port,
        protocol: protocol.to_string(),
        formats: parts.map(str::to_string).collect(),
        connection: None,
        attributes: Vec::new(),
    })
}

/// What a session needs from the remote MSRP media description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsrpMediaParams {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub path: String,
    /// `None` when the remote did not send `a=setup` or sent an unknown role
    pub setup: Option<SetupRole>,
    /// Raw `a=setup` value
    pub setup_attribute: Option<String>,
    pub accept_types: Option<String>,
    pub file_selector: Option<FileSelector>,
    pub file_transfer_id: Option<String>,
    pub file_icon: Option<String>,
    pub max_size: Option<u64>,
    pub fingerprint: Option<String>,
}

impl MsrpMediaParams {
    /// Extract the first media description
    ///
    /// `path` and a connection address are always required, `file-selector`
    /// only when `require_selector` is set.
    pub fn extract(description: &SessionDescription, require_selector: bool) -> Result<Self> {
        let media = description
            .media
            .first()
            .ok_or_else(|| SessionError::sdp("no media description"))?;
        let path = media
            .attribute("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SessionError::sdp("missing path attribute"))?
            .to_string();
        let file_selector = media
            .attribute("file-selector")
            .filter(|v| !v.is_empty())
            .map(FileSelector::parse);
        if require_selector && file_selector.is_none() {
            return Err(SessionError::sdp("missing file-selector attribute"));
        }
        let host = description
            .remote_host(media)
            .ok_or_else(|| SessionError::sdp("missing connection address"))?;

        Ok(Self {
            host,
            port: media.port,
            protocol: media.protocol.clone(),
            path,
            setup: media.attribute("setup").and_then(SetupRole::parse),
            setup_attribute: media.attribute("setup").map(str::to_string),
            accept_types: media.attribute("accept-types").map(str::to_string),
            file_selector,
            file_transfer_id: media.attribute("file-transfer-id").map(str::to_string),
            file_icon: media.attribute("file-icon").map(str::to_string),
            max_size: media.attribute("max-size").and_then(|v| v.trim().parse().ok()),
            fingerprint: media.attribute("fingerprint").map(str::to_string),
        })
    }

    /// Parse `sdp` and extract its MSRP parameters
    pub fn from_sdp(sdp: &str, require_selector: bool) -> Result<Self> {
        Self::extract(&parse_sdp(sdp)?, require_selector)
    }

    /// Local role answering this offer
    pub fn setup_answer(&self) -> SetupRole {
        super::setup::create_setup_answer(self.setup_attribute.as_deref())
    }

    pub fn is_secured(&self) -> bool {
        self.protocol.eq_ignore_ascii_case(super::types::MSRPS_PROTOCOL)
    }
}
