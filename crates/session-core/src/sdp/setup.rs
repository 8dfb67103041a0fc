//! Setup role negotiation (RFC 4145, RFC 6135)

use rcs_msrp_core::ACTIVE_PLACEHOLDER_PORT;

use super::types::SetupRole;

/// Role offered in an outgoing INVITE
pub fn create_setup_offer(behind_nat: bool) -> SetupRole {
    if behind_nat {
        SetupRole::Active
    } else {
        SetupRole::ActPass
    }
}

/// Role offered for mobile-to-mobile content sharing
pub fn create_mobile_to_mobile_setup_offer() -> SetupRole {
    SetupRole::Active
}

/// Role answered to a remote offer
///
/// An absent attribute is read as a remote `passive`, an unrecognised one
/// yields `passive`.
pub fn create_setup_answer(remote: Option<&str>) -> SetupRole {
    let Some(remote) = remote else {
        return SetupRole::Active;
    };
    match SetupRole::parse(remote) {
        Some(SetupRole::ActPass) | Some(SetupRole::Passive) => SetupRole::Active,
        Some(SetupRole::Active) | None => SetupRole::Passive,
    }
}

/// Port advertised in `m=` for a local role, `None` when a listener must be bound
pub fn placeholder_port(local: SetupRole) -> Option<u16> {
    (local == SetupRole::Active).then_some(ACTIVE_PLACEHOLDER_PORT)
}

/// Whether the offerer should accept the connection once the answer is known
///
/// Only a remote `active` answer makes us the listening side.
pub fn offerer_listens(remote_answer: Option<SetupRole>) -> bool {
    remote_answer == Some(SetupRole::Active)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_flips_role() {
        assert_eq!(create_setup_answer(Some("active")), SetupRole::Passive);
        assert_eq!(create_setup_answer(Some("passive")), SetupRole::Active);
        assert_eq!(create_setup_answer(Some("actpass")), SetupRole::Active);
    }

    #[test]
    fn test_absent_setup_is_read_as_remote_passive() {
        assert_eq!(create_setup_answer(None), create_setup_answer(Some("passive")));
        assert_eq!(create_setup_answer(Some("holdconn")), SetupRole::Passive);
    }

    #[test]
    fn test_offer_depends_on_nat() {
        assert_eq!(create_setup_offer(true), SetupRole::Active);
        assert_eq!(create_setup_offer(false), SetupRole::ActPass);
        assert_eq!(create_mobile_to_mobile_setup_offer(), SetupRole::Active);
        assert_eq!(placeholder_port(SetupRole::Active), Some(9));
        assert_eq!(placeholder_port(SetupRole::Passive), None);
        assert_eq!(placeholder_port(SetupRole::ActPass), None);
        assert!(offerer_listens(Some(SetupRole::Active)));
        assert!(!offerer_listens(Some(SetupRole::Passive)));
        assert!(!offerer_listens(None));
    }
}
