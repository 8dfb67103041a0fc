//! Remote contact identities and the block-list collaborator

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;

use crate::sip::{extract_display_name, extract_uri, headers, SipRequest};

/// A validated phone-number identity, always stored as `+<digits>` or `<digits>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactId(String);

const MIN_DIGITS: usize = 3;
const MAX_DIGITS: usize = 15;

impl ContactId {
    /// Validate a phone number, ignoring visual separators
    pub fn parse(number: &str) -> Option<Self> {
        let number = number.trim();
        let (plus, digits) = match number.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, number),
        };
        let mut normalized = String::with_capacity(number.len());
        if plus {
            normalized.push('+');
        }
        for c in digits.chars() {
            match c {
                '0'..='9' => normalized.push(c),
                ' ' | '-' | '.' | '(' | ')' => {}
                _ => return None,
            }
        }
        let count = normalized.len() - usize::from(plus);
        (MIN_DIGITS..=MAX_DIGITS)
            .contains(&count)
            .then_some(ContactId(normalized))
    }

    /// Extract the number from a `tel:` or `sip:` URI (with or without brackets)
    pub fn from_uri(uri: &str) -> Option<Self> {
        let uri = extract_uri(uri);
        let rest = if let Some(rest) = uri.strip_prefix("tel:") {
            rest
        } else if let Some(rest) = uri.strip_prefix("sip:").or_else(|| uri.strip_prefix("sips:")) {
            rest.split('@').next()?
        } else {
            return None;
        };
        Self::parse(rest.split(';').next()?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `tel:` URI of the contact
    pub fn to_tel_uri(&self) -> String {
        format!("tel:{}", self.0)
    }

    /// `sip:` URI of the contact in `domain`
    pub fn to_sip_uri(&self, domain: &str) -> String {
        format!("sip:{}@{};user=phone", self.0, domain)
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asserted identity header of a request
///
/// With two `P-Asserted-Identity` values the `tel:` one is preferred.
/// Without any, the From header is used.
pub fn asserted_identity(request: &SipRequest) -> Option<String> {
    let asserted: Vec<&str> = request.headers.get_all(headers::P_ASSERTED_IDENTITY).take(2).collect();
    if let Some(tel) = asserted.iter().find(|v| v.contains("tel:")) {
        return Some(extract_uri(tel));
    }
    if let Some(first) = asserted.first() {
        return Some(extract_uri(first));
    }
    request.from_uri()
}

/// Remote contact of an incoming request, if it carries a valid phone identity
pub fn remote_contact(request: &SipRequest) -> Option<ContactId> {
    asserted_identity(request).and_then(|uri| ContactId::from_uri(&uri))
}

/// Display name advertised by the remote, taken from the asserted identity or From
pub fn remote_display_name(request: &SipRequest) -> Option<String> {
    request
        .headers
        .get(headers::P_ASSERTED_IDENTITY)
        .and_then(extract_display_name)
        .or_else(|| request.from_header().and_then(extract_display_name))
}

/// Contact information collaborator
pub trait ContactManager: Send + Sync {
    fn is_blocked(&self, contact: &ContactId) -> bool;

    /// Record a display name seen in signalling
    fn set_display_name(&self, contact: &ContactId, display_name: &str);
}

/// Contact manager held in memory
#[derive(Debug, Default)]
pub struct InMemoryContactManager {
    blocked: Mutex<HashSet<ContactId>>,
    display_names: Mutex<HashMap<ContactId, String>>,
}

impl InMemoryContactManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, contact: ContactId) {
        self.blocked.lock().insert(contact);
    }

    pub fn unblock(&self, contact: &ContactId) {
        self.blocked.lock().remove(contact);
    }

    pub fn display_name(&self, contact: &ContactId) -> Option<String> {
        self.display_names.lock().get(contact).cloned()
    }
}

impl ContactManager for InMemoryContactManager {
    fn is_blocked(&self, contact: &ContactId) -> bool {
        self.blocked.lock().contains(contact)
    }

    fn set_display_name(&self, contact: &ContactId, display_name: &str) {
        self.display_names
            .lock()
            .insert(contact.clone(), display_name.to_string());
    }
}
