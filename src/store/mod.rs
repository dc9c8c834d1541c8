pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::token::Token;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token id already exists")]
    Conflict,

    #[error("token not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Persistence for token records, keyed by token id with a secondary index
/// on the owning principal.
///
/// Every method is atomic per record: `create` never overwrites, and
/// `update_enabled` / `delete` act on whatever row exists at that instant.
/// Implementations: [`memory::MemoryStore`] (DashMap), [`postgres::PgStore`].
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the id is taken.
    async fn create(&self, token: &Token) -> Result<(), StoreError>;

    /// Primary-key lookup.
    async fn get(&self, id: &str) -> Result<Option<Token>, StoreError>;

    async fn list_by_principal(&self, principal_id: &str) -> Result<Vec<Token>, StoreError>;

    async fn list_all(&self) -> Result<Vec<Token>, StoreError>;

    /// Set the `enabled` flag. Fails with `NotFound` if the row is gone.
    async fn update_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError>;

    /// Remove a record. Fails with `NotFound` if the row is gone.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Record a successful use. Never moves `last_used_at` backwards.
    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete every token whose expiry is at or before `before`. Returns the count removed.
    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
