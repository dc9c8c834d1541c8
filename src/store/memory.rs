use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{StoreError, TokenStore};
use crate::models::token::Token;

/// In-process token store on sharded DashMaps.
///
/// Used when no database is configured and throughout the test suite.
/// Per-record atomicity comes from the shard lock held by each map operation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tokens: Arc<DashMap<String, Token>>,
    by_principal: Arc<DashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn unindex(&self, principal_id: &str, id: &str) {
        if let Some(mut ids) = self.by_principal.get_mut(principal_id) {
            ids.remove(id);
        }
        self.by_principal
            .remove_if(principal_id, |_, ids| ids.is_empty());
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create(&self, token: &Token) -> Result<(), StoreError> {
        match self.tokens.entry(token.id.clone()) {
            Entry::Occupied(_) => return Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        self.by_principal
            .entry(token.principal_id.clone())
            .or_default()
            .insert(token.id.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.tokens.get(id).map(|t| t.value().clone()))
    }

    async fn list_by_principal(&self, principal_id: &str) -> Result<Vec<Token>, StoreError> {
        let ids: Vec<String> = match self.by_principal.get(principal_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Ok(vec![]),
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.tokens.get(id).map(|t| t.value().clone()))
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Token>, StoreError> {
        Ok(self.tokens.iter().map(|t| t.value().clone()).collect())
    }

    async fn update_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let mut token = self.tokens.get_mut(id).ok_or(StoreError::NotFound)?;
        token.enabled = enabled;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let (_, token) = self.tokens.remove(id).ok_or(StoreError::NotFound)?;
        self.unindex(&token.principal_id, id);
        Ok(())
    }

    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut token = self.tokens.get_mut(id).ok_or(StoreError::NotFound)?;
        if token.last_used_at.map_or(true, |prev| prev < at) {
            token.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let expired: Vec<String> = self
            .tokens
            .iter()
            .filter(|t| matches!(t.expires_at, Some(exp) if exp <= before))
            .map(|t| t.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            match self.delete(&id).await {
                Ok(()) => removed += 1,
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::TokenKind;
    use chrono::Duration;

    fn token(id: &str, principal: &str, expires_at: Option<DateTime<Utc>>) -> Token {
        Token {
            id: id.into(),
            secret_hash: "hash".into(),
            principal_id: principal.into(),
            auth_provider: "local".into(),
            kind: TokenKind::Session,
            description: None,
            cluster_id: None,
            is_derived: false,
            parent_token_id: None,
            enabled: true,
            ttl_seconds: 0,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = MemoryStore::new();
        store.create(&token("token-1", "alice", None)).await.unwrap();
        let err = store.create(&token("token-1", "bob", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        // The original owner is untouched
        assert_eq!(store.get("token-1").await.unwrap().unwrap().principal_id, "alice");
        assert!(store.list_by_principal("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_principal_index() {
        let store = MemoryStore::new();
        store.create(&token("token-1", "alice", None)).await.unwrap();
        store.create(&token("token-2", "alice", None)).await.unwrap();
        store.create(&token("token-3", "bob", None)).await.unwrap();

        assert_eq!(store.list_by_principal("alice").await.unwrap().len(), 2);
        assert_eq!(store.list_all().await.unwrap().len(), 3);

        store.delete("token-1").await.unwrap();
        let alice = store.list_by_principal("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].id, "token-2");
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update_enabled("nope", false).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(store.delete("nope").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_touch_never_moves_backwards() {
        let store = MemoryStore::new();
        store.create(&token("token-1", "alice", None)).await.unwrap();
        let later = Utc::now();
        let earlier = later - Duration::seconds(30);
        store.touch_last_used("token-1", later).await.unwrap();
        store.touch_last_used("token-1", earlier).await.unwrap();
        assert_eq!(
            store.get("token-1").await.unwrap().unwrap().last_used_at,
            Some(later)
        );
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .create(&token("token-old", "alice", Some(now - Duration::days(2))))
            .await
            .unwrap();
        store
            .create(&token("token-new", "alice", Some(now + Duration::days(2))))
            .await
            .unwrap();
        store.create(&token("token-forever", "alice", None)).await.unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert!(store.get("token-old").await.unwrap().is_none());
        assert_eq!(store.len(), 2);
    }
}
