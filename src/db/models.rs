use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};

/// Role tag carried on users and snapshotted into access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Sorts and dedups a role list. Empty input falls back to `{user}`.
pub fn normalize_roles(mut roles: Vec<Role>) -> Vec<Role> {
    roles.sort();
    roles.dedup();
    if roles.is_empty() {
        roles.push(Role::User);
    }
    roles
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A stored identity. `credential_hash` is skipped on serialization so a `User`
/// can be returned from handlers as-is.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to `UserStore::create`. The email is expected normalized and the
/// credential already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: Option<String>,
    pub credential_hash: String,
    pub roles: Vec<Role>,
}

impl NewUser {
    pub fn into_user(self) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: self.email,
            display_name: self.display_name,
            credential_hash: self.credential_hash,
            roles: normalize_roles(self.roles),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Row shape of the `users` table; roles are kept as `TEXT[]`.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub credential_hash: String,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let roles = row
            .roles
            .iter()
            .map(|r| r.parse::<Role>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::DatabaseError(DatabaseError::QueryError(e)))?;

        Ok(User {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            credential_hash: row.credential_hash,
            roles: normalize_roles(roles),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A persisted refresh token digest. The raw token is never stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Issuance lineage: every rotation keeps the family of the token it replaced.
    pub family_id: Uuid,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A refresh token digest about to be persisted.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewRefreshToken {
    pub fn into_record(self, user_id: Uuid, family_id: Uuid) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            family_id,
            token_hash: self.token_hash,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            revoked: false,
        }
    }
}

/// Result of a compare-and-revoke rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The presented token was active; it is now revoked and the replacement stored.
    Rotated,
    /// The presented token exists but was already revoked.
    Reused,
    /// No record matches the presented token for this user.
    Unknown,
}
