//! Request credential extraction.
//!
//! Accepted forms, all carrying the same `<token-id>:<secret>` pair:
//! - `Authorization: Bearer <id>:<secret>`
//! - `Authorization: Basic base64(<id>:<secret>)`
//! - `Cookie: R_SESS=<id>:<secret>`
//!
//! The header wins over the cookie. A credential that is present but cannot
//! be parsed is an error, never an anonymous request.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::secrets::Secret;

pub const COOKIE_NAME: &str = "R_SESS";
pub const BEARER_SCHEME: &str = "Bearer";
pub const BASIC_SCHEME: &str = "Basic";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MalformedCredential {
    #[error("credential header is not valid ASCII")]
    NonAscii,
    #[error("unsupported authorization scheme")]
    UnsupportedScheme,
    #[error("credential is empty")]
    Empty,
    #[error("credential is not valid base64")]
    InvalidBase64,
    #[error("credential is not valid UTF-8")]
    InvalidUtf8,
    #[error("credential must have the form <id>:<secret>")]
    MissingSeparator,
}

/// A bearer credential: the public token id plus the secret proving possession.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token_id: String,
    pub secret: Secret,
}

impl Credential {
    pub fn new(token_id: impl Into<String>, secret: Secret) -> Self {
        Self {
            token_id: token_id.into(),
            secret,
        }
    }

    /// `<id>:<secret>`, the form handed back to clients at issuance.
    pub fn encode(&self) -> Secret {
        Secret::new(format!("{}:{}", self.token_id, self.secret.expose()))
    }

    /// Parse a bare `<id>:<secret>` pair.
    pub fn parse(raw: &str) -> Result<Self, MalformedCredential> {
        if raw.is_empty() {
            return Err(MalformedCredential::Empty);
        }
        let (id, secret) = raw
            .split_once(':')
            .ok_or(MalformedCredential::MissingSeparator)?;
        if id.is_empty() || secret.is_empty() {
            return Err(MalformedCredential::MissingSeparator);
        }
        Ok(Self::new(id, Secret::new(secret)))
    }

    /// Parse an `Authorization` header value.
    pub fn from_authorization(value: &str) -> Result<Self, MalformedCredential> {
        let value = value.trim();
        if value.is_empty() {
            return Err(MalformedCredential::Empty);
        }
        let (scheme, rest) = value
            .split_once(' ')
            .ok_or(MalformedCredential::UnsupportedScheme)?;
        let rest = rest.trim();

        if scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
            Self::parse(rest)
        } else if scheme.eq_ignore_ascii_case(BASIC_SCHEME) {
            let decoded = Zeroizing::new(
                STANDARD
                    .decode(rest)
                    .map_err(|_| MalformedCredential::InvalidBase64)?,
            );
            let text =
                std::str::from_utf8(&decoded).map_err(|_| MalformedCredential::InvalidUtf8)?;
            Self::parse(text)
        } else {
            Err(MalformedCredential::UnsupportedScheme)
        }
    }
}

/// Pull a credential out of request headers.
///
/// `Ok(None)` means no credential was supplied at all; an empty session
/// cookie (as left behind by logout) also counts as absent.
pub fn extract(headers: &HeaderMap) -> Result<Option<Credential>, MalformedCredential> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| MalformedCredential::NonAscii)?;
        return Credential::from_authorization(value).map(Some);
    }

    for header in headers.get_all(COOKIE) {
        let header = header.to_str().map_err(|_| MalformedCredential::NonAscii)?;
        for pair in header.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            if name.trim() != COOKIE_NAME {
                continue;
            }
            let value = value.trim().trim_matches('"');
            if value.is_empty() {
                return Ok(None);
            }
            return Credential::parse(value).map(Some);
        }
    }

    Ok(None)
}

/// `Set-Cookie` value carrying a freshly issued session credential.
pub fn session_cookie(
    credential: &Credential,
    max_age_secs: Option<i64>,
    secure: bool,
) -> Option<HeaderValue> {
    let encoded = credential.encode();
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        COOKIE_NAME,
        encoded.expose()
    );
    if let Some(max_age) = max_age_secs {
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }
    if secure {
        cookie.push_str("; Secure");
    }
    let cookie = Zeroizing::new(cookie);
    HeaderValue::from_str(&cookie).ok()
}

/// `Set-Cookie` value that clears the session cookie.
pub fn cleared_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static("R_SESS=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure")
    } else {
        HeaderValue::from_static("R_SESS=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_bearer() {
        let cred = extract(&headers(&[("authorization", "Bearer token-abc:s3cret")]))
            .unwrap()
            .unwrap();
        assert_eq!(cred.token_id, "token-abc");
        assert_eq!(cred.secret.expose(), "s3cret");
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let cred = Credential::from_authorization("bearer token-abc:s3cret").unwrap();
        assert_eq!(cred.token_id, "token-abc");
    }

    #[test]
    fn test_basic() {
        let encoded = STANDARD.encode("token-abc:s3cret");
        let cred = extract(&headers(&[("authorization", &format!("Basic {}", encoded))]))
            .unwrap()
            .unwrap();
        assert_eq!(cred.token_id, "token-abc");
        assert_eq!(cred.secret.expose(), "s3cret");
    }

    #[test]
    fn test_secret_may_contain_colon() {
        let cred = Credential::parse("token-abc:part:two").unwrap();
        assert_eq!(cred.secret.expose(), "part:two");
    }

    #[test]
    fn test_cookie() {
        let cred = extract(&headers(&[("cookie", "theme=dark; R_SESS=token-abc:s3cret")]))
            .unwrap()
            .unwrap();
        assert_eq!(cred.token_id, "token-abc");
    }

    #[test]
    fn test_header_wins_over_cookie() {
        let cred = extract(&headers(&[
            ("authorization", "Bearer token-hdr:a"),
            ("cookie", "R_SESS=token-cookie:b"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(cred.token_id, "token-hdr");
    }

    #[test]
    fn test_absent_is_not_malformed() {
        assert!(extract(&HeaderMap::new()).unwrap().is_none());
        assert!(extract(&headers(&[("cookie", "theme=dark")])).unwrap().is_none());
        assert!(extract(&headers(&[("cookie", "R_SESS=")])).unwrap().is_none());
    }

    #[test]
    fn test_malformed_is_rejected() {
        let cases = [
            ("authorization", "Bearer no-separator", MalformedCredential::MissingSeparator),
            ("authorization", "Bearer :secret", MalformedCredential::MissingSeparator),
            ("authorization", "Bearer token-abc:", MalformedCredential::MissingSeparator),
            ("authorization", "Basic !!!", MalformedCredential::InvalidBase64),
            ("authorization", "Digest abc", MalformedCredential::UnsupportedScheme),
            ("authorization", "token-abc:secret", MalformedCredential::UnsupportedScheme),
            ("authorization", "   ", MalformedCredential::Empty),
            ("cookie", "R_SESS=garbage", MalformedCredential::MissingSeparator),
        ];
        for (name, value, expected) in cases {
            let err = extract(&headers(&[(name, value)])).unwrap_err();
            assert_eq!(err, expected, "{}: {}", name, value);
        }
    }

    #[test]
    fn test_basic_invalid_utf8() {
        let encoded = STANDARD.encode([0xffu8, 0xfe, b':', b'x']);
        assert_eq!(
            Credential::from_authorization(&format!("Basic {}", encoded)).unwrap_err(),
            MalformedCredential::InvalidUtf8
        );
    }

    #[test]
    fn test_session_cookie_roundtrip() {
        let cred = Credential::new("token-abc", Secret::new("s3cret"));
        let value = session_cookie(&cred, Some(3600), true).unwrap();
        let value = value.to_str().unwrap();
        assert!(value.starts_with("R_SESS=token-abc:s3cret;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Max-Age=3600"));
        assert!(value.ends_with("Secure"));

        let cleared = cleared_cookie(false);
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
    }
}
