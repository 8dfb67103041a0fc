//! Content descriptors carried by sharing sessions

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use rcs_msrp_core::MsrpError;
use tokio::io::AsyncRead;

use crate::errors::{Result, SessionError};
use crate::sip::{SipRequest, headers};

pub const GEOLOC_CONTENT_TYPE: &str = "application/vnd.gsma.rcspushlocation+xml";
pub const FILE_ICON_CID: &str = "image@joyn.com";

/// Where the bytes of a content live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    Memory(Bytes),
    File(PathBuf),
}

/// Thumbnail sent along with a file transfer invitation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIcon {
    pub mime_type: String,
    pub data: Bytes,
}

/// MIME type, size and location of shared content. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmContent {
    name: String,
    mime_type: String,
    size: u64,
    source: ContentSource,
}

impl MmContent {
    /// Content read from a file; the size is taken from the file metadata
    pub fn from_file(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)
            .map_err(|e| SessionError::file_access(format!("{}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            mime_type: mime_type.into(),
            size: metadata.len(),
            source: ContentSource::File(path),
        })
    }

    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
            source: ContentSource::Memory(data),
        }
    }

    /// Descriptor of content still to be received into `destination`
    pub fn incoming(name: impl Into<String>, mime_type: impl Into<String>, size: u64, destination: PathBuf) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            source: ContentSource::File(destination),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ContentSource::File(path) => Some(path),
            ContentSource::Memory(_) => None,
        }
    }

    /// Open the content for streaming
    ///
    /// A permission failure maps to `NotAllowedToSend` so it can be told
    /// apart from other I/O failures.
    pub async fn open_reader(&self) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        match &self.source {
            ContentSource::Memory(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
            ContentSource::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(MsrpError::from_source_error)?;
                Ok(Box::new(file))
            }
        }
    }
}

/// Extract the SDP part and the file icon of a received INVITE
///
/// A plain `application/sdp` body yields no icon.
pub fn split_invite_body(invite: &SipRequest) -> Result<(String, Option<FileIcon>)> {
    let body = invite
        .body_str()
        .ok_or_else(|| SessionError::payload("INVITE without a text body"))?;
    let content_type = invite.content_type().unwrap_or("application/sdp");
    if !content_type.to_ascii_lowercase().starts_with("multipart/") {
        return Ok((body.to_string(), None));
    }

    let boundary = crate::sip::header_param(content_type, "boundary")
        .ok_or_else(|| SessionError::payload("multipart body without boundary"))?;
    let delimiter = format!("--{}", boundary);

    let mut sdp = None;
    let mut icon = None;
    for part in body.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }
        let part = part.trim_start_matches("\r\n");
        let Some((part_headers, content)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let content = content.strip_suffix("\r\n").unwrap_or(content);
        let header = |name: &str| {
            part_headers.lines().find_map(|line| {
                let (n, v) = line.split_once(':')?;
                n.trim().eq_ignore_ascii_case(name).then(|| v.trim().to_string())
            })
        };
        let part_type = header(headers::CONTENT_TYPE).unwrap_or_default();
        if part_type.eq_ignore_ascii_case("application/sdp") {
            sdp = Some(content.to_string());
        } else if header("Content-ID").is_some_and(|cid| cid.contains(FILE_ICON_CID)) {
            let data = BASE64
                .decode(content.replace(['\r', '\n'], ""))
                .map_err(|e| SessionError::payload(format!("invalid file icon encoding: {}", e)))?;
            icon = Some(FileIcon {
                mime_type: part_type,
                data: Bytes::from(data),
            });
        }
    }

    let sdp = sdp.ok_or_else(|| SessionError::payload("multipart body without SDP part"))?;
    Ok((sdp, icon))
}

/// Build the multipart INVITE body carrying `sdp` and the base64 `icon`
pub fn build_multipart_body(boundary: &str, sdp: &str, icon: &FileIcon) -> String {
    let encoded = BASE64.encode(&icon.data);
    format!(
        "--{b}\r\nContent-Type: application/sdp\r\nContent-Length: {sdp_len}\r\n\r\n{sdp}\r\n\
         --{b}\r\nContent-Type: {mime}\r\nContent-Transfer-Encoding: base64\r\n\
         Content-ID: <{cid}>\r\nContent-Length: {icon_len}\r\nContent-Disposition: icon\r\n\r\n\
         {encoded}\r\n--{b}--",
        b = boundary,
        sdp_len = sdp.len(),
        sdp = sdp,
        mime = icon.mime_type,
        cid = FILE_ICON_CID,
        icon_len = encoded.len(),
        encoded = encoded
    )
}

/// A position shared by a geolocation session
#[derive(Debug, Clone, PartialEq)]
pub struct Geoloc {
    pub label: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters
    pub accuracy: f32,
    /// Expiration as Unix milliseconds
    pub expiration: i64,
}

impl Geoloc {
    /// Encode as a GSMA push-location document
    pub fn to_document(&self, from_uri: &str) -> String {
        let until = chrono::DateTime::from_timestamp_millis(self.expiration)
            .unwrap_or_default()
            .format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let label = self
            .label
            .as_deref()
            .map(|l| format!(" label=\"{}\"", escape_xml(l)))
            .unwrap_or_default();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <rcsenvelope xmlns=\"urn:gsma:params:xml:ns:rcs:rcs:geolocation\" \
             xmlns:gp=\"urn:ietf:params:xml:ns:pidf:geopriv10\" \
             xmlns:gml=\"http://www.opengis.net/gml\" \
             xmlns:gs=\"http://www.opengis.net/pidflo/1.0\" entity=\"{from}\">\n\
             <rcspushlocation id=\"loc1\"{label}>\
             <gp:geopriv><gp:location-info>\
             <gs:Circle srsName=\"urn:ogc:def:crs:EPSG::4326\">\
             <gml:pos>{lat} {lon}</gml:pos>\
             <gs:radius uom=\"urn:ogc:def:uom:EPSG::9001\">{acc}</gs:radius>\
             </gs:Circle></gp:location-info>\
             <gp:usage-rules><gp:retention-expiry>{until}</gp:retention-expiry></gp:usage-rules>\
             </gp:geopriv></rcspushlocation>\n</rcsenvelope>\n",
            from = escape_xml(from_uri),
            label = label,
            lat = self.latitude,
            lon = self.longitude,
            acc = self.accuracy,
            until = until
        )
    }

    /// Decode a push-location document
    pub fn parse_document(document: &str) -> Result<Self> {
        let pos = element_text(document, "gml:pos")
            .ok_or_else(|| SessionError::payload("geolocation without position"))?;
        let mut coords = pos.split_whitespace().map(str::parse::<f64>);
        let (Some(Ok(latitude)), Some(Ok(longitude))) = (coords.next(), coords.next()) else {
            return Err(SessionError::payload(format!("invalid position '{}'", pos)));
        };
        let accuracy = element_text(document, "gs:radius")
            .and_then(|r| r.trim().parse().ok())
            .unwrap_or(0.0);
        let expiration = element_text(document, "gp:retention-expiry")
            .and_then(|e| chrono::DateTime::parse_from_rfc3339(e.trim()).ok())
            .map(|e| e.timestamp_millis())
            .unwrap_or(0);
        let label = attribute_value(document, "rcspushlocation", "label").map(|l| unescape_xml(&l));
        Ok(Self {
            label,
            latitude,
            longitude,
            accuracy,
            expiration,
        })
    }
}

fn element_text<'a>(document: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let start = document.find(&open)?;
    let content_start = start + document[start..].find('>')? + 1;
    let close = format!("</{}>", tag);
    let end = content_start + document[content_start..].find(&close)?;
    Some(&document[content_start..end])
}

fn attribute_value(document: &str, tag: &str, attribute: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let start = document.find(&open)?;
    let element = &document[start..start + document[start..].find('>')?];
    let key = format!("{}=\"", attribute);
    let value_start = element.find(&key)? + key.len();
    let value_end = value_start + element[value_start..].find('"')?;
    Some(element[value_start..value_end].to_string())
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}
