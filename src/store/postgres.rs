use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{StoreError, TokenStore};
use crate::models::token::Token;

const TOKEN_COLUMNS: &str = "id, secret_hash, principal_id, auth_provider, kind, description, \
     cluster_id, is_derived, parent_token_id, enabled, ttl_seconds, created_at, last_used_at, expires_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict;
        }
    }
    StoreError::Backend(e.into())
}

#[async_trait]
impl TokenStore for PgStore {
    async fn create(&self, token: &Token) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO tokens (id, secret_hash, principal_id, auth_provider, kind, description,
                                   cluster_id, is_derived, parent_token_id, enabled, ttl_seconds,
                                   created_at, last_used_at, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(&token.id)
        .bind(&token.secret_hash)
        .bind(&token.principal_id)
        .bind(&token.auth_provider)
        .bind(token.kind)
        .bind(&token.description)
        .bind(&token.cluster_id)
        .bind(token.is_derived)
        .bind(&token.parent_token_id)
        .bind(token.enabled)
        .bind(token.ttl_seconds)
        .bind(token.created_at)
        .bind(token.last_used_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Token>, StoreError> {
        let row = sqlx::query_as::<_, Token>(&format!(
            "SELECT {} FROM tokens WHERE id = $1",
            TOKEN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row)
    }

    async fn list_by_principal(&self, principal_id: &str) -> Result<Vec<Token>, StoreError> {
        let rows = sqlx::query_as::<_, Token>(&format!(
            "SELECT {} FROM tokens WHERE principal_id = $1 ORDER BY created_at DESC",
            TOKEN_COLUMNS
        ))
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows)
    }

    async fn list_all(&self) -> Result<Vec<Token>, StoreError> {
        let rows = sqlx::query_as::<_, Token>(&format!(
            "SELECT {} FROM tokens ORDER BY created_at DESC",
            TOKEN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows)
    }

    async fn update_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tokens SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tokens SET last_used_at = $2 \
             WHERE id = $1 AND (last_used_at IS NULL OR last_used_at < $2)",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM tokens WHERE expires_at IS NOT NULL AND expires_at <= $1")
                .bind(before)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;

        Ok(result.rows_affected())
    }
}
