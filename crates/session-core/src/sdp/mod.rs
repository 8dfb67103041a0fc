//! SDP offer/answer for MSRP and RTP media

pub mod builder;
pub mod parser;
pub mod setup;
pub mod types;

pub use builder::{format_address_type, SdpBuilder};
pub use parser::{parse_sdp, MsrpMediaParams};
pub use setup::{create_mobile_to_mobile_setup_offer, create_setup_answer, create_setup_offer, offerer_listens, placeholder_port};
pub use types::{
    FileSelector, MediaDescription, MediaDirection, SdpAttribute, SessionDescription, SetupRole,
    MSRPS_PROTOCOL, MSRP_PROTOCOL,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_parse_round_trip() {
        let selector = FileSelector::new("report.pdf", "application/pdf", 1000);
        let offer = SdpBuilder::new("192.168.1.10".parse().unwrap())
            .msrp_media(20001, MSRP_PROTOCOL)
            .accept_types("application/pdf")
            .file_transfer_id("1234567890")
            .file_disposition("attachment")
            .file_selector(selector.to_string())
            .setup(SetupRole::ActPass)
            .path("msrp://192.168.1.10:20001/sess;tcp")
            .direction(MediaDirection::SendOnly)
            .build();

        let params = MsrpMediaParams::from_sdp(&offer, true).unwrap();
        assert_eq!(params.file_transfer_id.as_deref(), Some("1234567890"));
        assert_eq!(params.file_selector, Some(selector));
        assert_eq!(params.setup, Some(SetupRole::ActPass));
        assert_eq!(params.host, "192.168.1.10");
        assert_eq!(params.port, 20001);
    }
}
