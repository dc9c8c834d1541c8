//! Identity provider seam.
//!
//! Credential verification (passwords, OIDC, SAML, LDAP) happens elsewhere.
//! The token manager only consumes the resulting `(principal, provider)` pair.

use async_trait::async_trait;
use axum::http::HeaderMap;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::errors::{AuthError, Rejection};
use crate::models::token::Principal;

pub const IDP_KEY_HEADER: &str = "x-idp-key";
pub const REMOTE_USER_HEADER: &str = "x-remote-user";
pub const REMOTE_PROVIDER_HEADER: &str = "x-remote-provider";
pub const DEFAULT_PROVIDER: &str = "external";

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the principal behind a login request.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;
}

/// Trusts an authenticating front end (SSO proxy) that has already verified
/// the user and forwards the identity in headers, proven by a shared key.
///
/// With no key configured every login is refused.
pub struct TrustedHeaderProvider {
    shared_key: Option<Zeroizing<String>>,
}

impl TrustedHeaderProvider {
    pub fn new(shared_key: Option<String>) -> Self {
        Self {
            shared_key: shared_key.filter(|k| !k.is_empty()).map(Zeroizing::new),
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl IdentityProvider for TrustedHeaderProvider {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let Some(expected) = &self.shared_key else {
            tracing::warn!("login refused: no identity front-end key configured");
            return Err(AuthError::Unauthenticated(Rejection::MissingCredential));
        };

        let provided = header(headers, IDP_KEY_HEADER).unwrap_or_default();
        if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            tracing::warn!("login refused: identity front-end key mismatch");
            return Err(AuthError::Unauthenticated(Rejection::SecretMismatch));
        }

        let principal_id = header(headers, REMOTE_USER_HEADER).ok_or_else(|| {
            AuthError::invalid(format!("missing {} header", REMOTE_USER_HEADER))
        })?;
        let auth_provider = header(headers, REMOTE_PROVIDER_HEADER).unwrap_or(DEFAULT_PROVIDER);

        Ok(Principal {
            principal_id: principal_id.to_string(),
            auth_provider: auth_provider.to_string(),
        })
    }
}
