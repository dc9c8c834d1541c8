use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Distinguishes a primary login session from an API-key-like token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "varchar", rename_all = "kebab-case")]
pub enum TokenKind {
    Session,
    ApiKey,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Session => "session",
            TokenKind::ApiKey => "api-key",
        }
    }
}

impl std::str::FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "session" => Ok(TokenKind::Session),
            "api-key" | "apikey" | "api_key" => Ok(TokenKind::ApiKey),
            other => Err(format!("unknown token kind '{}'", other)),
        }
    }
}

/// A persisted token record.
///
/// Only the hash of the secret is ever held here; the plaintext is handed to
/// the client once at issuance and then dropped.
#[derive(Clone, sqlx::FromRow)]
pub struct Token {
    pub id: String,
    pub secret_hash: String,
    pub principal_id: String,
    pub auth_provider: String,
    pub kind: TokenKind,
    pub description: Option<String>,
    pub cluster_id: Option<String>,
    pub is_derived: bool,
    pub parent_token_id: Option<String>,
    pub enabled: bool,
    pub ttl_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Expired once `expires_at` is at or before `now`. Non-expiring tokens never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    pub fn is_owned_by(&self, principal_id: &str) -> bool {
        self.principal_id == principal_id
    }

    /// Public rendering of the record. `current` marks the token carrying the request.
    pub fn view(&self, now: DateTime<Utc>, current: bool) -> TokenView {
        TokenView {
            id: self.id.clone(),
            principal_id: self.principal_id.clone(),
            auth_provider: self.auth_provider.clone(),
            kind: self.kind,
            description: self.description.clone(),
            cluster_id: self.cluster_id.clone(),
            is_derived: self.is_derived,
            parent_token_id: self.parent_token_id.clone(),
            enabled: self.enabled,
            expired: self.is_expired(now),
            current,
            ttl_seconds: self.ttl_seconds,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            expires_at: self.expires_at,
        }
    }
}

// The hash is not secret in the plaintext sense, but it is an offline
// brute-force target and has no business in logs.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("secret_hash", &"<redacted>")
            .field("principal_id", &self.principal_id)
            .field("auth_provider", &self.auth_provider)
            .field("kind", &self.kind)
            .field("is_derived", &self.is_derived)
            .field("parent_token_id", &self.parent_token_id)
            .field("enabled", &self.enabled)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Client-facing token representation. Never carries the hash or the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenView {
    pub id: String,
    pub principal_id: String,
    pub auth_provider: String,
    pub kind: TokenKind,
    pub description: Option<String>,
    pub cluster_id: Option<String>,
    pub is_derived: bool,
    pub parent_token_id: Option<String>,
    pub enabled: bool,
    pub expired: bool,
    pub current: bool,
    pub ttl_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// An authenticated identity as produced by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: String,
    pub auth_provider: String,
}

/// The already-authenticated party on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub principal_id: String,
    pub privileged: bool,
}

impl Caller {
    pub fn new(principal_id: impl Into<String>, privileged: bool) -> Self {
        Self {
            principal_id: principal_id.into(),
            privileged,
        }
    }

    /// Owner or privileged caller.
    pub fn may_access(&self, token: &Token) -> bool {
        self.privileged || token.is_owned_by(&self.principal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(expires_at: Option<DateTime<Utc>>, enabled: bool) -> Token {
        Token {
            id: "token-abc".into(),
            secret_hash: "deadbeef".into(),
            principal_id: "u-alice".into(),
            auth_provider: "local".into(),
            kind: TokenKind::Session,
            description: None,
            cluster_id: None,
            is_derived: false,
            parent_token_id: None,
            enabled,
            ttl_seconds: 60,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
        }
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let now = Utc::now();
        assert!(!sample(None, true).is_expired(now));
        assert!(!sample(Some(now + Duration::seconds(1)), true).is_expired(now));
        assert!(sample(Some(now), true).is_expired(now));
        assert!(!sample(None, false).is_expired(now));
    }

    #[test]
    fn test_debug_redacts_hash() {
        let rendered = format!("{:?}", sample(None, true));
        assert!(!rendered.contains("deadbeef"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_view_omits_hash() {
        let json = serde_json::to_value(sample(None, true).view(Utc::now(), true)).unwrap();
        assert!(json.get("secret_hash").is_none());
        assert_eq!(json["current"], true);
        assert_eq!(json["kind"], "session");
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("session".parse::<TokenKind>(), Ok(TokenKind::Session));
        assert_eq!("API-KEY".parse::<TokenKind>(), Ok(TokenKind::ApiKey));
        assert!("cookie".parse::<TokenKind>().is_err());
    }

    #[test]
    fn test_caller_access() {
        let token = sample(None, true);
        assert!(Caller::new("u-alice", false).may_access(&token));
        assert!(!Caller::new("u-bob", false).may_access(&token));
        assert!(Caller::new("u-bob", true).may_access(&token));
    }
}
