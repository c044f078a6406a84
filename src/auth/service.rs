use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::password::CredentialHasher;
use crate::auth::token::{hash_refresh_token, TokenPair, TokenService};
use crate::config::AuthConfig;
use crate::db::models::{normalize_email, NewRefreshToken, NewUser, Role, RotationOutcome, User};
use crate::db::store::{RefreshTokenStore, UserStore};
use crate::error::{AppError, AuthError, DatabaseError};
use crate::Result;

/// Knobs the service reads from `auth.*` at construction.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub min_password_length: usize,
    pub revoke_all_on_reuse: bool,
}

impl From<&AuthConfig> for AuthPolicy {
    fn from(config: &AuthConfig) -> Self {
        Self {
            min_password_length: config.min_password_length,
            revoke_all_on_reuse: config.revoke_all_on_reuse,
        }
    }
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    tokens: Arc<TokenService>,
    hasher: Arc<dyn CredentialHasher>,
    policy: AuthPolicy,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        tokens: Arc<TokenService>,
        hasher: Arc<dyn CredentialHasher>,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            users,
            refresh_tokens,
            tokens,
            hasher,
            policy,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub async fn register(
        &self,
        email: &str,
        raw_credential: &str,
        display_name: Option<&str>,
    ) -> Result<User> {
        let email = normalize_email(email);
        validate_email(&email)?;
        self.validate_credential(raw_credential)?;

        let credential_hash = self.hash_credential(raw_credential).await?;
        let new_user = NewUser {
            email,
            display_name: display_name.map(str::to_string),
            credential_hash,
            roles: vec![Role::User],
        };

        match self.users.create(new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "User registered");
                Ok(user)
            }
            Err(AppError::DatabaseError(DatabaseError::Duplicate)) => {
                Err(AuthError::DuplicateEmail.into())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn login(&self, email: &str, raw_credential: &str) -> Result<TokenPair> {
        let email = normalize_email(email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            // Spend the same hashing work as a real check so timing does not reveal
            // whether the account exists.
            self.hash_credential(raw_credential).await?;
            warn!("Login rejected");
            return Err(AuthError::InvalidCredentials.into());
        };

        if !self.verify_credential(raw_credential, &user.credential_hash).await? {
            warn!(user_id = %user.id, "Login rejected");
            return Err(AuthError::InvalidCredentials.into());
        }

        let (pair, expires_at) = self.tokens.issue_pair(&user)?;
        self.refresh_tokens
            .save(
                user.id,
                NewRefreshToken {
                    token_hash: hash_refresh_token(&pair.refresh_token),
                    issued_at: Utc::now(),
                    expires_at,
                },
            )
            .await?;

        info!(user_id = %user.id, "Login successful");
        Ok(pair)
    }

    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<TokenPair> {
        let claims = self.tokens.verify_refresh_token(raw_refresh_token)?;
        let presented_hash = hash_refresh_token(raw_refresh_token);

        // Roles are re-read so the new pair carries the current snapshot.
        let user = self
            .users
            .find_by_id(claims.subject)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let (pair, expires_at) = self.tokens.issue_pair(&user)?;
        let replacement = NewRefreshToken {
            token_hash: hash_refresh_token(&pair.refresh_token),
            issued_at: Utc::now(),
            expires_at,
        };

        match self
            .refresh_tokens
            .rotate(user.id, &presented_hash, replacement)
            .await?
        {
            RotationOutcome::Rotated => {
                info!(user_id = %user.id, "Refresh token rotated");
                Ok(pair)
            }
            RotationOutcome::Reused => {
                if self.policy.revoke_all_on_reuse {
                    let revoked = self.refresh_tokens.revoke_all(user.id).await?;
                    warn!(user_id = %user.id, revoked, "Rotated refresh token replayed; revoked all sessions");
                } else {
                    warn!(user_id = %user.id, "Rotated refresh token replayed");
                }
                Err(AuthError::RevokedToken.into())
            }
            RotationOutcome::Unknown => {
                warn!(user_id = %user.id, "Refresh token not on record");
                Err(AuthError::InvalidToken.into())
            }
        }
    }

    /// Revokes every refresh token of the user. Access tokens already handed
    /// out stay valid until they expire.
    pub async fn logout(&self, user_id: Uuid) -> Result<()> {
        let revoked = self.refresh_tokens.revoke_all(user_id).await?;
        info!(user_id = %user_id, revoked, "User logged out");
        Ok(())
    }

    pub async fn set_roles(&self, user_id: Uuid, roles: Vec<Role>) -> Result<User> {
        if roles.is_empty() {
            return Err(AppError::ValidationError("roles must not be empty".into()));
        }
        let user = self.users.update_roles(user_id, roles).await?;
        info!(user_id = %user.id, roles = ?user.roles, "Roles updated");
        Ok(user)
    }

    pub async fn prune_expired_tokens(&self) -> Result<u64> {
        self.refresh_tokens.prune_expired(Utc::now()).await
    }

    fn validate_credential(&self, raw: &str) -> Result<()> {
        if raw.chars().count() < self.policy.min_password_length {
            return Err(AppError::ValidationError(format!(
                "password must be at least {} characters",
                self.policy.min_password_length
            )));
        }
        Ok(())
    }

    async fn hash_credential(&self, raw: &str) -> Result<String> {
        let hasher = self.hasher.clone();
        let raw = raw.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&raw)).await?
    }

    async fn verify_credential(&self, raw: &str, hash: &str) -> Result<bool> {
        let hasher = self.hasher.clone();
        let raw = raw.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&raw, &hash)).await?
    }
}

fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(AppError::ValidationError("invalid email address".into()))
    }
}
