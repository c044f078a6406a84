//! Persistence contracts used by the auth service.
//!
//! Every mutating call must be durable before it returns `Ok`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{NewRefreshToken, NewUser, RefreshTokenRecord, Role, RotationOutcome, User};
use crate::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Fails with `DatabaseError::Duplicate` when the email is taken.
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Replaces the role set. Fails with `DatabaseError::NotFound` for an unknown id.
    async fn update_roles(&self, id: Uuid, roles: Vec<Role>) -> Result<User>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persists the first token of a new lineage.
    async fn save(&self, user_id: Uuid, token: NewRefreshToken) -> Result<RefreshTokenRecord>;

    /// True only if a matching, non-revoked record exists.
    async fn is_valid(&self, user_id: Uuid, token_hash: &str) -> Result<bool>;

    /// Compare-and-revoke. Revokes the presented record only if it is still
    /// active and stores `replacement` in the same family, as one atomic step.
    /// Concurrent calls with the same hash see at most one `Rotated`.
    async fn rotate(
        &self,
        user_id: Uuid,
        presented_hash: &str,
        replacement: NewRefreshToken,
    ) -> Result<RotationOutcome>;

    /// Returns the number of records newly revoked.
    async fn revoke_all(&self, user_id: Uuid) -> Result<u64>;

    /// Deletes records that expired before `now`.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}
