//! Token lifecycle engine.
//!
//! Issues, derives, validates, revokes and enumerates tokens. Holds no mutable
//! state of its own: every invariant that involves concurrent callers rests on
//! the per-record atomicity of the [`TokenStore`].
//!
//! States: `Active -> Disabled` (logout), `Active | Disabled -> Deleted`
//! (remove). `Expired` is derived from the clock and never stored.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::credentials::Credential;
use crate::errors::{AuthError, Rejection};
use crate::models::token::{Caller, Principal, Token, TokenKind};
use crate::secrets::{Secret, SecretGenerator};
use crate::store::{StoreError, TokenStore};

pub const MAX_DESCRIPTION_LEN: usize = 256;

/// Longest lifetime any token, or any configured lifetime bound, may carry.
pub const MAX_TTL_SECS: i64 = 100 * 365 * 24 * 3600;

/// Issuance limits.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    /// Whether `ttl_seconds == 0` (never expires) is accepted at creation.
    pub allow_non_expiring: bool,
    /// Upper bound on any derived token's lifetime.
    pub max_derived_ttl_secs: i64,
    /// Fresh ids drawn before an id collision is surfaced as `Conflict`.
    pub create_attempts: u32,
    /// Minimum spacing between `last_used_at` writes for one token. 0 touches on every use.
    pub touch_interval_secs: i64,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            allow_non_expiring: false,
            max_derived_ttl_secs: 90 * 24 * 3600,
            create_attempts: 3,
            touch_interval_secs: 60,
        }
    }
}

/// Parameters for deriving a token from a live one.
#[derive(Debug, Clone, Default)]
pub struct DeriveRequest {
    /// Requested lifetime. 0 asks for the longest lifetime allowed.
    pub ttl_seconds: i64,
    pub description: Option<String>,
    pub cluster_id: Option<String>,
}

/// A freshly issued token together with its one-time plaintext secret.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: Token,
    pub secret: Secret,
}

impl IssuedToken {
    pub fn credential(&self) -> Credential {
        Credential::new(self.token.id.clone(), self.secret.clone())
    }
}

pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    secrets: Arc<dyn SecretGenerator>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        secrets: Arc<dyn SecretGenerator>,
        clock: Arc<dyn Clock>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            store,
            secrets,
            clock,
            policy,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Issue a primary token for a principal the identity provider has already authenticated.
    pub async fn create_from_credential(
        &self,
        principal: &Principal,
        ttl_seconds: i64,
        kind: TokenKind,
        description: Option<String>,
    ) -> Result<IssuedToken, AuthError> {
        if principal.principal_id.trim().is_empty() {
            return Err(AuthError::invalid("principal id must not be empty"));
        }
        if principal.auth_provider.trim().is_empty() {
            return Err(AuthError::invalid("auth provider must not be empty"));
        }
        if ttl_seconds < 0 {
            return Err(AuthError::invalid("ttl must not be negative"));
        }
        if ttl_seconds == 0 && !self.policy.allow_non_expiring {
            return Err(AuthError::invalid("non-expiring tokens are not permitted"));
        }
        let description = normalize_description(description)?;

        let now = self.clock.now();
        let expires_at = if ttl_seconds > 0 {
            Some(expiry_after(now, ttl_seconds)?)
        } else {
            None
        };

        let issued = self
            .persist(|id, secret_hash| Token {
                id,
                secret_hash,
                principal_id: principal.principal_id.clone(),
                auth_provider: principal.auth_provider.clone(),
                kind,
                description: description.clone(),
                cluster_id: None,
                is_derived: false,
                parent_token_id: None,
                enabled: true,
                ttl_seconds,
                created_at: now,
                last_used_at: None,
                expires_at,
            })
            .await?;

        tracing::info!(
            token_id = %issued.token.id,
            principal = %principal.principal_id,
            provider = %principal.auth_provider,
            kind = kind.as_str(),
            ttl_seconds,
            "token issued"
        );
        Ok(issued)
    }

    /// Derive a narrower token from a currently valid one.
    ///
    /// The child keeps the parent's identity; its expiry never passes the
    /// parent's and never exceeds `max_derived_ttl_secs`, so a derivation is
    /// never silently non-expiring.
    pub async fn derive(
        &self,
        parent: &Credential,
        request: DeriveRequest,
    ) -> Result<IssuedToken, AuthError> {
        if request.ttl_seconds < 0 {
            return Err(AuthError::invalid("ttl must not be negative"));
        }
        let description = normalize_description(request.description)?;
        let parent = self.validate(parent).await?;

        let requested_cluster = request.cluster_id.filter(|c| !c.trim().is_empty());
        let cluster_id = match (&parent.cluster_id, requested_cluster) {
            (Some(scope), Some(requested)) if *scope != requested => {
                tracing::warn!(
                    parent = %parent.id,
                    scope = %scope,
                    requested = %requested,
                    "derivation outside parent cluster scope"
                );
                return Err(AuthError::PermissionDenied);
            }
            (Some(scope), _) => Some(scope.clone()),
            (None, requested) => requested,
        };

        let now = self.clock.now();
        let cap = self.policy.max_derived_ttl_secs;
        let wanted = if request.ttl_seconds > 0 {
            request.ttl_seconds.min(cap)
        } else {
            cap
        };
        let mut expires_at = expiry_after(now, wanted)?;
        if let Some(parent_expiry) = parent.expires_at {
            expires_at = expires_at.min(parent_expiry);
        }
        let ttl_seconds = ceil_secs(expires_at - now);
        let clamped = request.ttl_seconds > 0 && ttl_seconds < request.ttl_seconds;

        let issued = self
            .persist(|id, secret_hash| Token {
                id,
                secret_hash,
                principal_id: parent.principal_id.clone(),
                auth_provider: parent.auth_provider.clone(),
                kind: TokenKind::ApiKey,
                description: description.clone(),
                cluster_id: cluster_id.clone(),
                is_derived: true,
                parent_token_id: Some(parent.id.clone()),
                enabled: true,
                ttl_seconds,
                created_at: now,
                last_used_at: None,
                expires_at: Some(expires_at),
            })
            .await?;

        tracing::info!(
            token_id = %issued.token.id,
            parent = %parent.id,
            principal = %parent.principal_id,
            requested_ttl = request.ttl_seconds,
            ttl_seconds,
            clamped,
            "token derived"
        );
        Ok(issued)
    }

    /// Authenticate a presented credential.
    ///
    /// One primary-key lookup and one constant-time digest comparison. The
    /// `last_used_at` touch is spawned and can never change the outcome.
    pub async fn validate(&self, credential: &Credential) -> Result<Token, AuthError> {
        let token = match self.store.get(&credential.token_id).await? {
            Some(token) => token,
            None => return Err(reject(&credential.token_id, Rejection::UnknownToken)),
        };

        if !self
            .secrets
            .verify(credential.secret.expose(), &token.secret_hash)
        {
            return Err(reject(&token.id, Rejection::SecretMismatch));
        }
        if !token.enabled {
            return Err(reject(&token.id, Rejection::Disabled));
        }
        let now = self.clock.now();
        if token.is_expired(now) {
            return Err(reject(&token.id, Rejection::Expired));
        }

        self.touch(&token, now);
        Ok(token)
    }

    /// Disable a token. Already-disabled tokens succeed silently.
    pub async fn logout(&self, token_id: &str, caller: &Caller) -> Result<(), AuthError> {
        let token = self.authorized_get(token_id, caller).await?;
        if !token.enabled {
            tracing::debug!(token_id, "logout of already disabled token");
            return Ok(());
        }

        self.store.update_enabled(token_id, false).await?;
        tracing::info!(
            token_id,
            principal = %token.principal_id,
            caller = %caller.principal_id,
            "token disabled"
        );
        Ok(())
    }

    /// Delete a token permanently. An absent token is `NotFound`.
    pub async fn remove(&self, token_id: &str, caller: &Caller) -> Result<(), AuthError> {
        let token = self.authorized_get(token_id, caller).await?;
        self.store.delete(token_id).await?;
        tracing::info!(
            token_id,
            principal = %token.principal_id,
            caller = %caller.principal_id,
            "token deleted"
        );
        Ok(())
    }

    /// Tokens visible to the caller, newest first.
    pub async fn list(&self, caller: &Caller) -> Result<Vec<Token>, AuthError> {
        let mut tokens = if caller.privileged {
            self.store.list_all().await?
        } else {
            let mut own = self.store.list_by_principal(&caller.principal_id).await?;
            own.retain(|t| t.is_owned_by(&caller.principal_id));
            own
        };

        tokens.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tokens)
    }

    pub async fn get_by_id(&self, token_id: &str, caller: &Caller) -> Result<Token, AuthError> {
        self.authorized_get(token_id, caller).await
    }

    /// Delete tokens that expired more than `grace` ago. Disabled but
    /// unexpired tokens are kept for audit.
    pub async fn reap_expired(&self, grace: Duration) -> Result<u64, AuthError> {
        let before = self.clock.now() - grace;
        let removed = self.store.delete_expired(before).await?;
        if removed > 0 {
            tracing::info!(removed, %before, "reaped expired tokens");
        }
        Ok(removed)
    }

    async fn authorized_get(&self, token_id: &str, caller: &Caller) -> Result<Token, AuthError> {
        let token = self
            .store
            .get(token_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        if !caller.may_access(&token) {
            tracing::warn!(
                token_id,
                caller = %caller.principal_id,
                "access to another principal's token denied"
            );
            return Err(AuthError::PermissionDenied);
        }
        Ok(token)
    }

    async fn persist<F>(&self, build: F) -> Result<IssuedToken, AuthError>
    where
        F: Fn(String, String) -> Token,
    {
        let attempts = self.policy.create_attempts.max(1);
        for attempt in 1..=attempts {
            let id = self.secrets.generate_id()?;
            let (secret, secret_hash) = self.secrets.generate()?;
            let token = build(id, secret_hash);
            match self.store.create(&token).await {
                Ok(()) => return Ok(IssuedToken { token, secret }),
                Err(StoreError::Conflict) => {
                    tracing::warn!(token_id = %token.id, attempt, "token id collision");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::Conflict)
    }

    fn touch(&self, token: &Token, now: DateTime<Utc>) {
        let interval = Duration::seconds(self.policy.touch_interval_secs);
        if matches!(token.last_used_at, Some(last) if now - last < interval) {
            return;
        }

        let store = Arc::clone(&self.store);
        let id = token.id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(&id, now).await {
                tracing::debug!(token_id = %id, error = %e, "last-used update failed");
            }
        });
    }
}

fn reject(token_id: &str, reason: Rejection) -> AuthError {
    tracing::debug!(token_id, %reason, "token rejected");
    AuthError::Unauthenticated(reason)
}

fn normalize_description(description: Option<String>) -> Result<Option<String>, AuthError> {
    match description.map(|d| d.trim().to_string()) {
        Some(d) if d.len() > MAX_DESCRIPTION_LEN => Err(AuthError::invalid(format!(
            "description must be at most {} bytes",
            MAX_DESCRIPTION_LEN
        ))),
        Some(d) if d.is_empty() => Ok(None),
        other => Ok(other),
    }
}

fn expiry_after(now: DateTime<Utc>, ttl_seconds: i64) -> Result<DateTime<Utc>, AuthError> {
    if ttl_seconds > MAX_TTL_SECS {
        return Err(AuthError::invalid(format!(
            "ttl must be at most {} seconds",
            MAX_TTL_SECS
        )));
    }
    Duration::try_seconds(ttl_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AuthError::invalid("ttl too large"))
}

fn ceil_secs(d: Duration) -> i64 {
    (d.num_milliseconds() + 999).div_euclid(1000)
}
