//! Proxy digest authentication for requests challenged with 407
//!
//! Implements the client side of RFC 2617 digest with MD5, preferring
//! `qop=auth` when the proxy offers it.

use md5::{Digest, Md5};

use crate::errors::{Result, SessionError};

use super::message::{headers, SipRequest, SipResponse};

/// Digest challenge read from a `Proxy-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    /// True when the proxy offered `qop=auth`
    pub qop_auth: bool,
}

impl DigestChallenge {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let params = match value.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("Digest") => rest,
            _ => {
                return Err(SessionError::authentication(format!(
                    "unsupported challenge: {}",
                    value
                )));
            }
        };

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut qop_auth = false;
        for (key, val) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(val),
                "nonce" => nonce = Some(val),
                "opaque" => opaque = Some(val),
                "algorithm" => algorithm = Some(val),
                "qop" => {
                    qop_auth = val
                        .split(',')
                        .any(|q| q.trim().eq_ignore_ascii_case("auth"));
                }
                _ => {}
            }
        }

        if let Some(algo) = &algorithm {
            if !algo.eq_ignore_ascii_case("MD5") {
                return Err(SessionError::authentication(format!(
                    "unsupported digest algorithm {}",
                    algo
                )));
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| SessionError::authentication("challenge without realm"))?,
            nonce: nonce.ok_or_else(|| SessionError::authentication("challenge without nonce"))?,
            opaque,
            algorithm,
            qop_auth,
        })
    }
}

/// Split `a="x, y", b=z` into key/value pairs, honouring quotes
fn split_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                params.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    params.push(current);

    params
        .into_iter()
        .filter_map(|param| {
            let (key, val) = param.split_once('=')?;
            Some((key.trim().to_string(), val.trim().trim_matches('"').to_string()))
        })
        .collect()
}

fn md5_hex(data: &str) -> String {
    format!("{:x}", Md5::digest(data.as_bytes()))
}

/// Per-dialog digest state: the last challenge and its nonce count
#[derive(Debug, Clone)]
pub struct SessionAuthenticationAgent {
    username: String,
    password: String,
    challenge: Option<DigestChallenge>,
    nonce_count: u32,
}

impl SessionAuthenticationAgent {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            challenge: None,
            nonce_count: 0,
        }
    }

    /// Remember the challenge of a 407 response
    pub fn read_proxy_authenticate(&mut self, response: &SipResponse) -> Result<()> {
        let value = response
            .headers
            .get(headers::PROXY_AUTHENTICATE)
            .ok_or_else(|| SessionError::authentication("407 without Proxy-Authenticate"))?;
        let challenge = DigestChallenge::parse(value)?;
        if self.challenge.as_ref().map(|c| &c.nonce) != Some(&challenge.nonce) {
            self.nonce_count = 0;
        }
        self.challenge = Some(challenge);
        Ok(())
    }

    pub fn has_challenge(&self) -> bool {
        self.challenge.is_some()
    }

    /// Add `Proxy-Authorization` to `request` if a challenge is known
    pub fn set_proxy_authorization(&mut self, request: &mut SipRequest) {
        if let Some(value) = self.authorization_for(request.method.as_str(), &request.uri) {
            request.headers.set(headers::PROXY_AUTHORIZATION, value);
        }
    }

    fn authorization_for(&mut self, method: &str, uri: &str) -> Option<String> {
        let challenge = self.challenge.as_ref()?;
        let ha1 = md5_hex(&format!("{}:{}:{}", self.username, challenge.realm, self.password));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            self.username, challenge.realm, challenge.nonce, uri
        );
        if challenge.qop_auth {
            self.nonce_count += 1;
            let nc = format!("{:08x}", self.nonce_count);
            let cnonce = format!("{:016x}", rand::random::<u64>());
            let response = md5_hex(&format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, challenge.nonce, nc, cnonce, ha2
            ));
            header.push_str(&format!(
                ", response=\"{}\", qop=auth, nc={}, cnonce=\"{}\"",
                response, nc, cnonce
            ));
        } else {
            let response = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2));
            header.push_str(&format!(", response=\"{}\"", response));
        }
        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        header.push_str(", algorithm=MD5");
        Some(header)
    }
}
