use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::manager::{TokenPolicy, MAX_TTL_SECS};
use crate::secrets::TokenSecrets;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Unset means the in-memory store (tokens do not survive a restart).
    pub database_url: Option<String>,
    /// Principals allowed to act on every token.
    /// Comma-separated via TOKENMGR_ADMIN_PRINCIPALS.
    pub admin_principals: Vec<String>,
    /// Shared key proving a login came through the identity front end.
    pub idp_key: Option<String>,
    /// Default lifetime of a login session. TOKENMGR_SESSION_TTL_SECS, default 16h.
    pub session_ttl_secs: i64,
    /// Upper bound on derived-token lifetime. TOKENMGR_MAX_DERIVED_TTL_SECS, default 90d.
    pub max_derived_ttl_secs: i64,
    pub allow_non_expiring: bool,
    /// HMAC pepper for secret digests. Required in production.
    pub hash_key: Option<String>,
    pub cookie_secure: bool,
    pub auth_timeout_ms: u64,
    pub touch_interval_secs: i64,
    /// Reaper period. 0 disables the background reaper.
    pub reap_interval_secs: u64,
    /// How long expired tokens are kept before the reaper deletes them.
    pub reap_grace_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8443,
            database_url: None,
            admin_principals: Vec::new(),
            idp_key: None,
            session_ttl_secs: 16 * 3600,
            max_derived_ttl_secs: 90 * 24 * 3600,
            allow_non_expiring: false,
            hash_key: None,
            cookie_secure: true,
            auth_timeout_ms: 5000,
            touch_interval_secs: 60,
            reap_interval_secs: 3600,
            reap_grace_secs: 30 * 24 * 3600,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("admin_principals", &self.admin_principals)
            .field("idp_key", &self.idp_key.as_ref().map(|_| "<redacted>"))
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("max_derived_ttl_secs", &self.max_derived_ttl_secs)
            .field("allow_non_expiring", &self.allow_non_expiring)
            .field("hash_key", &self.hash_key.as_ref().map(|_| "<redacted>"))
            .field("cookie_secure", &self.cookie_secure)
            .field("auth_timeout_ms", &self.auth_timeout_ms)
            .field("touch_interval_secs", &self.touch_interval_secs)
            .field("reap_interval_secs", &self.reap_interval_secs)
            .field("reap_grace_secs", &self.reap_grace_secs)
            .finish()
    }
}

impl Config {
    pub fn is_privileged(&self, principal_id: &str) -> bool {
        self.admin_principals.iter().any(|p| p == principal_id)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            allow_non_expiring: self.allow_non_expiring,
            max_derived_ttl_secs: self.max_derived_ttl_secs,
            touch_interval_secs: self.touch_interval_secs,
            ..TokenPolicy::default()
        }
    }

    /// Range checks on the lifetime settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        let bounded = [
            ("TOKENMGR_SESSION_TTL_SECS", self.session_ttl_secs, 0),
            ("TOKENMGR_MAX_DERIVED_TTL_SECS", self.max_derived_ttl_secs, 1),
            ("TOKENMGR_TOUCH_INTERVAL_SECS", self.touch_interval_secs, 0),
            ("TOKENMGR_REAP_GRACE_SECS", self.reap_grace_secs, 0),
        ];
        for (key, value, min) in bounded {
            if !(min..=MAX_TTL_SECS).contains(&value) {
                anyhow::bail!("{} must be between {} and {}, got {}", key, min, MAX_TTL_SECS, value);
            }
        }
        if self.session_ttl_secs == 0 && !self.allow_non_expiring {
            anyhow::bail!(
                "TOKENMGR_SESSION_TTL_SECS=0 issues non-expiring sessions; \
                 set TOKENMGR_ALLOW_NON_EXPIRING=true to permit that"
            );
        }
        Ok(())
    }

    pub fn secrets(&self) -> anyhow::Result<TokenSecrets> {
        match &self.hash_key {
            Some(key) => TokenSecrets::with_pepper(key.as_bytes()),
            None => Ok(TokenSecrets::new()),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();
    let cfg = Config {
        port: env_or("TOKENMGR_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
        admin_principals: env_list("TOKENMGR_ADMIN_PRINCIPALS"),
        idp_key: std::env::var("TOKENMGR_IDP_KEY").ok().filter(|s| !s.is_empty()),
        session_ttl_secs: env_or("TOKENMGR_SESSION_TTL_SECS", defaults.session_ttl_secs),
        max_derived_ttl_secs: env_or("TOKENMGR_MAX_DERIVED_TTL_SECS", defaults.max_derived_ttl_secs),
        allow_non_expiring: env_bool("TOKENMGR_ALLOW_NON_EXPIRING", defaults.allow_non_expiring),
        hash_key: std::env::var("TOKENMGR_HASH_KEY").ok().filter(|s| !s.is_empty()),
        cookie_secure: env_bool("TOKENMGR_COOKIE_SECURE", defaults.cookie_secure),
        auth_timeout_ms: env_or("TOKENMGR_AUTH_TIMEOUT_MS", defaults.auth_timeout_ms),
        touch_interval_secs: env_or("TOKENMGR_TOUCH_INTERVAL_SECS", defaults.touch_interval_secs),
        reap_interval_secs: env_or("TOKENMGR_REAP_INTERVAL_SECS", defaults.reap_interval_secs),
        reap_grace_secs: env_or("TOKENMGR_REAP_GRACE_SECS", defaults.reap_grace_secs),
    };

    cfg.validate()?;

    let env_mode = std::env::var("TOKENMGR_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_default();
    if env_mode == "production" && cfg.hash_key.is_none() {
        anyhow::bail!(
            "TOKENMGR_HASH_KEY is not set. \
             Set a random pepper before running in production."
        );
    }
    if cfg.hash_key.is_none() {
        tracing::warn!("TOKENMGR_HASH_KEY is not set; token digests are unpeppered SHA-256");
    }
    if cfg.idp_key.is_none() {
        tracing::warn!("TOKENMGR_IDP_KEY is not set; logins are disabled");
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_lookup() {
        let cfg = Config {
            admin_principals: vec!["u-admin".into()],
            ..Config::default()
        };
        assert!(cfg.is_privileged("u-admin"));
        assert!(!cfg.is_privileged("u-alice"));
    }

    #[test]
    fn test_lifetime_bounds() {
        assert!(Config::default().validate().is_ok());

        let huge_cap = Config {
            max_derived_ttl_secs: i64::MAX,
            ..Config::default()
        };
        assert!(huge_cap.validate().is_err());

        let zero_cap = Config {
            max_derived_ttl_secs: 0,
            ..Config::default()
        };
        assert!(zero_cap.validate().is_err());

        let negative_grace = Config {
            reap_grace_secs: -1,
            ..Config::default()
        };
        assert!(negative_grace.validate().is_err());

        let open_sessions = Config {
            session_ttl_secs: 0,
            ..Config::default()
        };
        assert!(open_sessions.validate().is_err());
        assert!(Config {
            allow_non_expiring: true,
            ..open_sessions
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_debug_redacts_keys() {
        let cfg = Config {
            idp_key: Some("front-end-key".into()),
            hash_key: Some("pepper".into()),
            database_url: Some("postgres://user:pw@db/tokens".into()),
            ..Config::default()
        };
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("front-end-key"));
        assert!(!rendered.contains("pepper"));
        assert!(!rendered.contains("user:pw"));
    }

    #[test]
    fn test_policy_from_config() {
        let cfg = Config {
            allow_non_expiring: true,
            max_derived_ttl_secs: 120,
            touch_interval_secs: 5,
            ..Config::default()
        };
        let policy = cfg.token_policy();
        assert!(policy.allow_non_expiring);
        assert_eq!(policy.max_derived_ttl_secs, 120);
        assert_eq!(policy.touch_interval_secs, 5);
        assert!(policy.create_attempts >= 1);
    }
}
