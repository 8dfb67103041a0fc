//! SDP offer/answer construction

use std::net::IpAddr;

use chrono::Utc;

use super::types::{MediaDirection, SetupRole};

const CRLF: &str = "\r\n";
/// Seconds between the NTP epoch (1900) and the Unix epoch
const NTP_EPOCH_OFFSET: i64 = 2_208_988_800;

/// `IN IP4 <addr>` / `IN IP6 <addr>`
pub fn format_address_type(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("IN IP4 {}", v4),
        IpAddr::V6(v6) => format!("IN IP6 {}", v6),
    }
}

pub fn ntp_time_now() -> i64 {
    Utc::now().timestamp() + NTP_EPOCH_OFFSET
}

/// Builder for the single-media SDP bodies exchanged by sessions
///
/// Attribute lines are emitted in a fixed order so that offers are stable
/// byte for byte.
#[derive(Debug, Clone)]
pub struct SdpBuilder {
    ip: IpAddr,
    msrp: Option<(u16, String)>,
    raw_media: Option<String>,
    accept_types: Option<String>,
    accept_wrapped_types: Option<String>,
    file_transfer_id: Option<String>,
    file_disposition: Option<String>,
    file_selector: Option<String>,
    file_location: Option<String>,
    setup: Option<SetupRole>,
    path: Option<String>,
    fingerprint: Option<String>,
    direction: Option<MediaDirection>,
    max_size: u64,
    file_icon: Option<String>,
}

impl SdpBuilder {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            msrp: None,
            raw_media: None,
            accept_types: None,
            accept_wrapped_types: None,
            file_transfer_id: None,
            file_disposition: None,
            file_selector: None,
            file_location: None,
            setup: None,
            path: None,
            fingerprint: None,
            direction: None,
            max_size: 0,
            file_icon: None,
        }
    }

    /// `m=message <port> <protocol> *`
    pub fn msrp_media(mut self, port: u16, protocol: &str) -> Self {
        self.msrp = Some((port, protocol.to_string()));
        self
    }

    /// Caller-provided media block (RTP sessions), emitted verbatim
    pub fn raw_media(mut self, block: impl Into<String>) -> Self {
        let mut block = block.into();
        if !block.is_empty() && !block.ends_with(CRLF) {
            block.push_str(CRLF);
        }
        self.raw_media = Some(block);
        self
    }

    pub fn accept_types(mut self, types: impl Into<String>) -> Self {
        self.accept_types = Some(types.into());
        self
    }

    pub fn accept_wrapped_types(mut self, types: impl Into<String>) -> Self {
        self.accept_wrapped_types = Some(types.into());
        self
    }

    pub fn file_transfer_id(mut self, id: impl Into<String>) -> Self {
        self.file_transfer_id = Some(id.into());
        self
    }

    pub fn file_disposition(mut self, disposition: impl Into<String>) -> Self {
        self.file_disposition = Some(disposition.into());
        self
    }

    pub fn file_selector(mut self, selector: impl Into<String>) -> Self {
        self.file_selector = Some(selector.into());
        self
    }

    pub fn file_location(mut self, location: impl Into<String>) -> Self {
        self.file_location = Some(location.into());
        self
    }

    pub fn setup(mut self, role: SetupRole) -> Self {
        self.setup = Some(role);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Full fingerprint value, e.g. `SHA-256 AB:CD:...`
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn direction(mut self, direction: MediaDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    /// `a=max-size`, omitted when 0
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// `a=file-icon:<cid>`
    pub fn file_icon(mut self, cid: impl Into<String>) -> Self {
        self.file_icon = Some(cid.into());
        self
    }

    pub fn build(self) -> String {
        let ntp = ntp_time_now();
        let address = format_address_type(&self.ip);
        let mut sdp = format!(
            "v=0{crlf}o=- {ntp} {ntp} {address}{crlf}s=-{crlf}c={address}{crlf}t=0 0{crlf}",
            crlf = CRLF,
            ntp = ntp,
            address = address
        );

        if let Some(block) = &self.raw_media {
            sdp.push_str(block);
        }
        if let Some((port, protocol)) = &self.msrp {
            sdp.push_str(&format!("m=message {} {} *{}", port, protocol, CRLF));
        }

        let mut attr = |name: &str, value: &Option<String>| {
            if let Some(value) = value {
                sdp.push_str(&format!("a={}:{}{}", name, value, CRLF));
            }
        };
        attr("accept-types", &self.accept_types);
        attr("accept-wrapped-types", &self.accept_wrapped_types);
        attr("file-transfer-id", &self.file_transfer_id);
        attr("file-disposition", &self.file_disposition);
        attr("file-selector", &self.file_selector);
        attr("file-location", &self.file_location);
        attr("setup", &self.setup.map(|r| r.as_str().to_string()));
        attr("path", &self.path);
        attr("fingerprint", &self.fingerprint);
        attr("file-icon", &self.file_icon);

        if let Some(direction) = self.direction {
            sdp.push_str(&format!("a={}{}", direction.as_str(), CRLF));
        }
        if self.max_size > 0 {
            sdp.push_str(&format!("a=max-size:{}{}", self.max_size, CRLF));
        }
        sdp
    }
}
