//! In-process stores. Used by tests and by `storage.backend = "memory"`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{
    normalize_roles, NewRefreshToken, NewUser, RefreshTokenRecord, Role, RotationOutcome, User,
};
use crate::db::store::{RefreshTokenStore, UserStore};
use crate::error::{AppError, DatabaseError};
use crate::Result;

/// Keyed table shared by the memory stores. Closures run under the lock,
/// so a single `write` call is atomic with respect to every other caller.
#[derive(Debug)]
pub struct MemoryTable<K, V> {
    rows: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> Clone for MemoryTable<K, V> {
    fn clone(&self) -> Self {
        Self { rows: self.rows.clone() }
    }
}

impl<K, V> Default for MemoryTable<K, V> {
    fn default() -> Self {
        Self { rows: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl<K: Eq + Hash, V: Clone> MemoryTable<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.rows.read().await.get(key).cloned()
    }

    pub async fn find(&self, pred: impl Fn(&V) -> bool) -> Option<V> {
        self.rows.read().await.values().find(|v| pred(v)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&HashMap<K, V>) -> R) -> R {
        let rows = self.rows.read().await;
        f(&rows)
    }

    pub async fn write<R>(&self, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        let mut rows = self.rows.write().await;
        f(&mut rows)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryUserStore {
    users: MemoryTable<Uuid, User>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.find(|u| u.email == email).await)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.get(&id).await)
    }

    async fn create(&self, user: NewUser) -> Result<User> {
        let user = user.into_user();
        self.users
            .write(|rows| {
                if rows.values().any(|u| u.email == user.email) {
                    return Err(AppError::DatabaseError(DatabaseError::Duplicate));
                }
                rows.insert(user.id, user.clone());
                Ok(user)
            })
            .await
    }

    async fn update_roles(&self, id: Uuid, roles: Vec<Role>) -> Result<User> {
        self.users
            .write(|rows| {
                let user = rows
                    .get_mut(&id)
                    .ok_or(AppError::DatabaseError(DatabaseError::NotFound))?;
                user.roles = normalize_roles(roles);
                user.updated_at = Utc::now();
                Ok(user.clone())
            })
            .await
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRefreshTokenStore {
    records: MemoryTable<Uuid, RefreshTokenRecord>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records_for(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.records
            .read(|rows| rows.values().filter(|r| r.user_id == user_id).cloned().collect())
            .await
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn save(&self, user_id: Uuid, token: NewRefreshToken) -> Result<RefreshTokenRecord> {
        let record = token.into_record(user_id, Uuid::new_v4());
        self.records
            .write(|rows| rows.insert(record.id, record.clone()))
            .await;
        Ok(record)
    }

    async fn is_valid(&self, user_id: Uuid, token_hash: &str) -> Result<bool> {
        Ok(self
            .records
            .find(|r| r.user_id == user_id && r.token_hash == token_hash && !r.revoked)
            .await
            .is_some())
    }

    async fn rotate(
        &self,
        user_id: Uuid,
        presented_hash: &str,
        replacement: NewRefreshToken,
    ) -> Result<RotationOutcome> {
        let outcome = self
            .records
            .write(|rows| {
                let current = rows
                    .values_mut()
                    .find(|r| r.user_id == user_id && r.token_hash == presented_hash);

                let Some(current) = current else {
                    return RotationOutcome::Unknown;
                };
                if current.revoked {
                    return RotationOutcome::Reused;
                }

                current.revoked = true;
                let next = replacement.into_record(user_id, current.family_id);
                rows.insert(next.id, next);
                RotationOutcome::Rotated
            })
            .await;

        Ok(outcome)
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let revoked = self
            .records
            .write(|rows| {
                let mut count = 0;
                for record in rows.values_mut().filter(|r| r.user_id == user_id && !r.revoked) {
                    record.revoked = true;
                    count += 1;
                }
                count
            })
            .await;
        Ok(revoked)
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let pruned = self
            .records
            .write(|rows| {
                let before = rows.len();
                rows.retain(|_, r| !r.is_expired_at(now));
                (before - rows.len()) as u64
            })
            .await;
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            display_name: None,
            credential_hash: "hash".to_string(),
            roles: vec![Role::User],
        }
    }

    fn new_token(hash: &str, ttl: Duration) -> NewRefreshToken {
        let now = Utc::now();
        NewRefreshToken {
            token_hash: hash.to_string(),
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = MemoryUserStore::new();
        let created = store.create(new_user("alice@x.com")).await.unwrap();

        let by_email = store.find_by_email("alice@x.com").await.unwrap().unwrap();
        let by_id = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_email, created);
        assert_eq!(by_id, created);
        assert!(store.find_by_email("bob@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice@x.com")).await.unwrap();

        let err = store.create(new_user("alice@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseError(DatabaseError::Duplicate)));
    }

    #[tokio::test]
    async fn test_update_roles() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("alice@x.com")).await.unwrap();

        let updated = store
            .update_roles(user.id, vec![Role::Admin, Role::User])
            .await
            .unwrap();
        assert_eq!(updated.roles, vec![Role::User, Role::Admin]);
        assert!(updated.updated_at >= user.updated_at);

        let err = store.update_roles(Uuid::new_v4(), vec![Role::Admin]).await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseError(DatabaseError::NotFound)));
    }

    #[tokio::test]
    async fn test_rotate_revokes_presented_and_keeps_family() {
        let store = MemoryRefreshTokenStore::new();
        let user_id = Uuid::new_v4();
        let first = store.save(user_id, new_token("h1", Duration::days(1))).await.unwrap();

        let outcome = store.rotate(user_id, "h1", new_token("h2", Duration::days(1))).await.unwrap();
        assert_eq!(outcome, RotationOutcome::Rotated);
        assert!(!store.is_valid(user_id, "h1").await.unwrap());
        assert!(store.is_valid(user_id, "h2").await.unwrap());

        let records = store.records_for(user_id).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.family_id == first.family_id));

        let again = store.rotate(user_id, "h1", new_token("h3", Duration::days(1))).await.unwrap();
        assert_eq!(again, RotationOutcome::Reused);
        assert!(!store.is_valid(user_id, "h3").await.unwrap());

        let unknown = store.rotate(user_id, "nope", new_token("h4", Duration::days(1))).await.unwrap();
        assert_eq!(unknown, RotationOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_rotate_is_scoped_to_user() {
        let store = MemoryRefreshTokenStore::new();
        let owner = Uuid::new_v4();
        store.save(owner, new_token("h1", Duration::days(1))).await.unwrap();

        let outcome = store
            .rotate(Uuid::new_v4(), "h1", new_token("h2", Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(outcome, RotationOutcome::Unknown);
        assert!(store.is_valid(owner, "h1").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let store = MemoryRefreshTokenStore::new();
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.save(user_id, new_token("a", Duration::days(1))).await.unwrap();
        store.save(user_id, new_token("b", Duration::days(1))).await.unwrap();
        store.save(other, new_token("c", Duration::days(1))).await.unwrap();

        assert_eq!(store.revoke_all(user_id).await.unwrap(), 2);
        assert!(!store.is_valid(user_id, "a").await.unwrap());
        assert!(!store.is_valid(user_id, "b").await.unwrap());
        assert!(store.is_valid(other, "c").await.unwrap());
        assert_eq!(store.revoke_all(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_never_resurrects_revoked() {
        let store = MemoryRefreshTokenStore::new();
        let user_id = Uuid::new_v4();
        store.save(user_id, new_token("old", Duration::seconds(-10))).await.unwrap();
        store.save(user_id, new_token("live", Duration::days(1))).await.unwrap();
        store.revoke_all(user_id).await.unwrap();

        assert_eq!(store.prune_expired(Utc::now()).await.unwrap(), 1);
        assert!(!store.is_valid(user_id, "old").await.unwrap());
        assert!(!store.is_valid(user_id, "live").await.unwrap());
        assert_eq!(store.records_for(user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_single_winner() {
        let store = Arc::new(MemoryRefreshTokenStore::new());
        let user_id = Uuid::new_v4();
        store.save(user_id, new_token("seed", Duration::days(1))).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .rotate(user_id, "seed", new_token(&format!("next-{}", i), Duration::days(1)))
                    .await
                    .unwrap()
            }));
        }

        let mut rotated = 0;
        for handle in handles {
            if handle.await.unwrap() == RotationOutcome::Rotated {
                rotated += 1;
            }
        }
        assert_eq!(rotated, 1);
    }

    #[tokio::test]
    async fn test_memory_table_helpers() {
        let table: MemoryTable<u32, String> = MemoryTable::new();
        assert!(table.is_empty().await);
        table.write(|rows| rows.insert(1, "one".to_string())).await;
        assert_eq!(table.len().await, 1);
        assert_eq!(table.get(&1).await.as_deref(), Some("one"));
        assert_eq!(table.find(|v| v.starts_with('o')).await.as_deref(), Some("one"));
    }
}
