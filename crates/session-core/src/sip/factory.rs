//! Construction of the SIP requests and responses a session sends

use crate::dialog::DialogPath;

use super::message::{headers, SipMethod, SipRequest, SipResponse};

pub const SDP_CONTENT_TYPE: &str = "application/sdp";
pub const MULTIPART_BOUNDARY: &str = "boundary1";
pub const ALLOWED_METHODS: &str = "INVITE, ACK, CANCEL, BYE, MESSAGE, OPTIONS";
const MAX_FORWARDS: &str = "70";
/// Below this value a Session-Expires header is not sent
pub const MIN_SESSION_EXPIRE: u32 = 90;

/// Standard reason phrase for the codes the engine sends
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        200 => "OK",
        202 => "Accepted",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        415 => "Unsupported Media Type",
        422 => "Session Interval Too Small",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        500 => "Server Internal Error",
        603 => "Decline",
        606 => "Not Acceptable",
        _ => "Unknown",
    }
}

fn name_addr(uri: &str) -> String {
    if uri.contains('<') {
        uri.to_string()
    } else {
        format!("<{}>", uri)
    }
}

/// Builds SIP messages from a dialog path
#[derive(Debug, Clone)]
pub struct SipMessageFactory {
    local_contact: String,
    user_agent: String,
}

impl SipMessageFactory {
    /// `local_contact` is our reachable SIP URI, used in Contact headers
    pub fn new(local_contact: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            local_contact: local_contact.into(),
            user_agent: user_agent.into(),
        }
    }

    fn contact_header(&self, feature_tags: &[String]) -> String {
        let mut contact = name_addr(&self.local_contact);
        for tag in feature_tags {
            contact.push(';');
            contact.push_str(tag);
        }
        contact
    }

    /// Request skeleton shared by every in-dialog request
    fn dialog_request(&self, dialog: &DialogPath, method: SipMethod, cseq: u32) -> SipRequest {
        let mut to = name_addr(dialog.remote_party());
        if let Some(tag) = dialog.remote_tag() {
            to.push_str(";tag=");
            to.push_str(tag);
        }
        let mut request = SipRequest::new(method.clone(), dialog.target())
            .with_header(headers::CALL_ID, dialog.call_id())
            .with_header(headers::CSEQ, format!("{} {}", cseq, method))
            .with_header(
                headers::FROM,
                format!("{};tag={}", name_addr(dialog.local_party()), dialog.local_tag()),
            )
            .with_header(headers::TO, to)
            .with_header(headers::MAX_FORWARDS, MAX_FORWARDS);
        for route in dialog.route() {
            request.headers.add(headers::ROUTE, route.clone());
        }
        request.headers.add(headers::USER_AGENT, self.user_agent.clone());
        request
    }

    /// INVITE carrying `content` (SDP or multipart) with our feature tags
    pub fn create_invite(
        &self,
        dialog: &DialogPath,
        feature_tags: &[String],
        accept_tags: &[String],
        content_type: &str,
        content: &str,
    ) -> SipRequest {
        let mut invite = self.dialog_request(dialog, SipMethod::Invite, dialog.cseq());
        invite.headers.set(headers::CONTACT, self.contact_header(feature_tags));
        if !accept_tags.is_empty() {
            invite
                .headers
                .add(headers::ACCEPT_CONTACT, format!("*;{}", accept_tags.join(";")));
        }
        invite.headers.add(headers::ALLOW, ALLOWED_METHODS);
        if dialog.session_expire() >= MIN_SESSION_EXPIRE {
            invite.headers.add(headers::SUPPORTED, "timer");
            invite
                .headers
                .add(headers::SESSION_EXPIRES, dialog.session_expire().to_string());
        }
        invite.with_body(content_type, content.to_string())
    }

    /// ACK for the 2xx of our INVITE
    pub fn create_ack(&self, dialog: &DialogPath) -> SipRequest {
        let mut ack = self.dialog_request(dialog, SipMethod::Ack, dialog.cseq());
        ack.headers.set(headers::CONTACT, self.contact_header(&[]));
        ack
    }

    /// BYE, consuming the next CSeq of the dialog
    pub fn create_bye(&self, dialog: &mut DialogPath) -> SipRequest {
        let cseq = dialog.increment_cseq();
        self.dialog_request(dialog, SipMethod::Bye, cseq)
    }

    /// CANCEL of our pending INVITE
    ///
    /// Uses the INVITE's CSeq number and omits the To tag.
    pub fn create_cancel(&self, dialog: &DialogPath) -> SipRequest {
        let mut cancel = self.dialog_request(dialog, SipMethod::Cancel, dialog.cseq());
        cancel.headers.set(headers::TO, name_addr(dialog.remote_party()));
        cancel
    }

    /// Out-of-dialog MESSAGE
    pub fn create_message(
        &self,
        dialog: &DialogPath,
        feature_tag: Option<&str>,
        content_type: &str,
        content: impl Into<bytes::Bytes>,
    ) -> SipRequest {
        let mut message = self.dialog_request(dialog, SipMethod::Message, dialog.cseq());
        if let Some(tag) = feature_tag {
            message
                .headers
                .set(headers::CONTACT, self.contact_header(&[tag.to_string()]));
            message.headers.add(headers::ACCEPT_CONTACT, format!("*;{}", tag));
        }
        message.with_body(content_type, content)
    }

    /// Response to `request` echoing its dialog headers
    ///
    /// `local_tag` is added to the To header unless it already has one.
    pub fn create_response(&self, request: &SipRequest, local_tag: Option<&str>, code: u16) -> SipResponse {
        let mut response = SipResponse::new(code, reason_phrase(code));
        for name in [headers::CALL_ID, headers::CSEQ, headers::FROM] {
            if let Some(value) = request.headers.get(name) {
                response.headers.add(name, value);
            }
        }
        for via in request.headers.get_all("Via") {
            response.headers.add("Via", via);
        }
        let mut to = request.to_header().unwrap_or_default().to_string();
        if let Some(tag) = local_tag {
            if request.to_tag().is_none() {
                to.push_str(";tag=");
                to.push_str(tag);
            }
        }
        response.headers.add(headers::TO, to);
        response
    }

    /// 180 Ringing for a received INVITE
    pub fn create_ringing(&self, dialog: &DialogPath) -> Option<SipResponse> {
        let invite = dialog.invite()?;
        Some(self.create_response(invite, Some(dialog.local_tag()), 180))
    }

    /// Final error response for a received INVITE
    pub fn create_error_response(&self, dialog: &DialogPath, code: u16) -> Option<SipResponse> {
        let invite = dialog.invite()?;
        Some(self.create_response(invite, Some(dialog.local_tag()), code))
    }

    /// 200 OK answering the INVITE with our SDP
    pub fn create_200_ok_invite(
        &self,
        dialog: &DialogPath,
        feature_tags: &[String],
        sdp: &str,
    ) -> Option<SipResponse> {
        let invite = dialog.invite()?;
        let mut response = self.create_response(invite, Some(dialog.local_tag()), 200);
        response.headers.add(headers::CONTACT, self.contact_header(feature_tags));
        response.headers.add(headers::ALLOW, ALLOWED_METHODS);
        response.headers.add(headers::USER_AGENT, self.user_agent.clone());
        if dialog.session_expire() >= MIN_SESSION_EXPIRE {
            response.headers.add(headers::SUPPORTED, "timer");
            response.headers.add(
                headers::SESSION_EXPIRES,
                format!("{};refresher=uac", dialog.session_expire()),
            );
        }
        Some(response.with_body(SDP_CONTENT_TYPE, sdp.to_string()))
    }
}
