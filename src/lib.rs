//! tokenmgr: bearer-token authentication authority for the management API.
//!
//! Issues, derives, validates, enumerates and revokes session tokens. The
//! binary in `main.rs` wires these modules to an HTTP server and a CLI.

use std::sync::Arc;

pub mod api;
pub mod cli;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod identity;
pub mod jobs;
pub mod manager;
pub mod middleware;
pub mod models;
pub mod secrets;
pub mod store;

use clock::SystemClock;
use identity::{IdentityProvider, TrustedHeaderProvider};
use manager::TokenManager;
use store::TokenStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub manager: Arc<TokenManager>,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: config::Config,
}

impl AppState {
    /// Wire the token manager and identity front end from configuration.
    pub fn new(config: config::Config, store: Arc<dyn TokenStore>) -> anyhow::Result<Self> {
        let manager = TokenManager::new(
            store,
            Arc::new(config.secrets()?),
            Arc::new(SystemClock),
            config.token_policy(),
        );
        let identity = Arc::new(TrustedHeaderProvider::new(config.idp_key.clone()));
        Ok(Self::with_parts(Arc::new(manager), identity, config))
    }

    pub fn with_parts(
        manager: Arc<TokenManager>,
        identity: Arc<dyn IdentityProvider>,
        config: config::Config,
    ) -> Self {
        Self {
            manager,
            identity,
            config,
        }
    }
}
