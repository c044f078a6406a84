use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::models::{Role, User};
use crate::error::{AppError, AuthError};
use crate::Result;

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// JWT claims as they go over the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub roles: Vec<Role>,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub jti: Uuid,
    pub token_use: TokenUse,
}

/// What a verified token says about its bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub subject: Uuid,
    pub roles: Vec<Role>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub email: Option<String>,
}

impl TokenPayload {
    /// Payload for a fresh issuance; timestamps are filled in by the service.
    pub fn for_user(user: &User) -> Self {
        Self {
            subject: user.id,
            roles: user.roles.clone(),
            issued_at: 0,
            expires_at: 0,
            email: Some(user.email.clone()),
        }
    }
}

impl From<Claims> for TokenPayload {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            roles: claims.roles,
            issued_at: claims.iat,
            expires_at: claims.exp,
            email: claims.email,
        }
    }
}

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signing and verification context for one token kind.
struct KeySet {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    token_use: TokenUse,
}

impl KeySet {
    fn new(secret: &str, ttl: Duration, token_use: TokenUse) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            token_use,
        }
    }
}

/// Issues and verifies signed tokens. Pure computation, no store access.
pub struct TokenService {
    access: KeySet,
    refresh: KeySet,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let access_ttl = Duration::try_minutes(config.access_token_ttl_minutes).ok_or_else(|| {
            AppError::ConfigError(format!(
                "access_token_ttl_minutes out of range: {}",
                config.access_token_ttl_minutes
            ))
        })?;
        let refresh_ttl = Duration::try_days(config.refresh_token_ttl_days).ok_or_else(|| {
            AppError::ConfigError(format!(
                "refresh_token_ttl_days out of range: {}",
                config.refresh_token_ttl_days
            ))
        })?;

        Ok(Self {
            access: KeySet::new(&config.access_token_secret, access_ttl, TokenUse::Access),
            refresh: KeySet::new(&config.refresh_token_secret, refresh_ttl, TokenUse::Refresh),
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    pub fn issue_access_token(&self, payload: &TokenPayload) -> Result<String> {
        self.issue_access_token_at(payload, Utc::now().timestamp())
    }

    pub fn issue_access_token_at(&self, payload: &TokenPayload, now: i64) -> Result<String> {
        Self::issue(&self.access, payload, now)
    }

    pub fn issue_refresh_token(&self, payload: &TokenPayload) -> Result<String> {
        self.issue_refresh_token_at(payload, Utc::now().timestamp())
    }

    pub fn issue_refresh_token_at(&self, payload: &TokenPayload, now: i64) -> Result<String> {
        Self::issue(&self.refresh, payload, now)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<TokenPayload> {
        self.verify_access_token_at(token, Utc::now().timestamp())
    }

    pub fn verify_access_token_at(&self, token: &str, now: i64) -> Result<TokenPayload> {
        Self::verify(&self.access, token, now)
    }

    /// Signature and expiry only. Callers must still check the refresh token store.
    pub fn verify_refresh_token(&self, token: &str) -> Result<TokenPayload> {
        self.verify_refresh_token_at(token, Utc::now().timestamp())
    }

    pub fn verify_refresh_token_at(&self, token: &str, now: i64) -> Result<TokenPayload> {
        Self::verify(&self.refresh, token, now)
    }

    /// Mints an access/refresh pair for `user`. Also returns the refresh token's
    /// expiry so the caller can persist it.
    pub fn issue_pair(&self, user: &User) -> Result<(TokenPair, DateTime<Utc>)> {
        let now = Utc::now().timestamp();
        let payload = TokenPayload::for_user(user);
        let pair = TokenPair {
            access_token: self.issue_access_token_at(&payload, now)?,
            refresh_token: self.issue_refresh_token_at(&payload, now)?,
        };
        let refresh_expires_at = timestamp_to_datetime(now + self.refresh.ttl.num_seconds())?;
        Ok((pair, refresh_expires_at))
    }

    fn issue(keys: &KeySet, payload: &TokenPayload, now: i64) -> Result<String> {
        let claims = Claims {
            sub: payload.subject,
            roles: payload.roles.clone(),
            iat: now,
            exp: now + keys.ttl.num_seconds(),
            email: payload.email.clone(),
            jti: Uuid::new_v4(),
            token_use: keys.token_use,
        };

        encode(&Header::new(ALGORITHM), &claims, &keys.encoding)
            .map_err(|e| AppError::InternalError(format!("Token signing failed: {}", e)))
    }

    fn verify(keys: &KeySet, token: &str, now: i64) -> Result<TokenPayload> {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked below against the caller's clock, without leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &keys.decoding, &validation)?.claims;

        if claims.token_use != keys.token_use {
            return Err(AuthError::InvalidToken.into());
        }
        if now > claims.exp {
            return Err(AuthError::ExpiredToken.into());
        }

        Ok(claims.into())
    }
}

/// Digest stored in place of a raw refresh token.
pub fn hash_refresh_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

pub(crate) fn timestamp_to_datetime(ts: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| AppError::InternalError(format!("timestamp out of range: {}", ts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn service() -> TokenService {
        TokenService::new(&Settings::new_for_test().unwrap().auth).unwrap()
    }

    fn payload() -> TokenPayload {
        TokenPayload {
            subject: Uuid::new_v4(),
            roles: vec![Role::User, Role::Admin],
            issued_at: 0,
            expires_at: 0,
            email: Some("alice@x.com".into()),
        }
    }

    fn expect_auth_error(result: Result<TokenPayload>, expected: AuthError) {
        match result {
            Err(AppError::AuthError(e)) => assert_eq!(e, expected),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }

    #[test]
    fn test_access_token_round_trip() {
        let tokens = service();
        let p = payload();
        let token = tokens.issue_access_token(&p).unwrap();

        assert_eq!(token.split('.').count(), 3);

        let verified = tokens.verify_access_token(&token).unwrap();
        assert_eq!(verified.subject, p.subject);
        assert_eq!(verified.roles, p.roles);
        assert_eq!(verified.email, p.email);
        assert_eq!(verified.expires_at - verified.issued_at, tokens.access_ttl().num_seconds());
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let tokens = service();
        let p = payload();
        let token = tokens.issue_refresh_token(&p).unwrap();
        let verified = tokens.verify_refresh_token(&token).unwrap();
        assert_eq!(verified.subject, p.subject);
        assert_eq!(verified.expires_at - verified.issued_at, tokens.refresh_ttl().num_seconds());
    }

    #[test]
    fn test_expiry_boundary() {
        let tokens = service();
        let issued = 1_700_000_000;
        let token = tokens.issue_access_token_at(&payload(), issued).unwrap();
        let exp = issued + tokens.access_ttl().num_seconds();

        assert!(tokens.verify_access_token_at(&token, issued).is_ok());
        assert!(tokens.verify_access_token_at(&token, exp).is_ok());
        expect_auth_error(tokens.verify_access_token_at(&token, exp + 1), AuthError::ExpiredToken);
    }

    #[test]
    fn test_refresh_expiry_boundary() {
        let tokens = service();
        let issued = 1_700_000_000;
        let token = tokens.issue_refresh_token_at(&payload(), issued).unwrap();
        let exp = issued + tokens.refresh_ttl().num_seconds();

        assert!(tokens.verify_refresh_token_at(&token, exp).is_ok());
        expect_auth_error(tokens.verify_refresh_token_at(&token, exp + 1), AuthError::ExpiredToken);
    }

    #[test]
    fn test_out_of_range_ttl_is_a_config_error() {
        let mut config = Settings::new_for_test().unwrap().auth;
        config.access_token_ttl_minutes = i64::MAX / 2;
        assert!(matches!(TokenService::new(&config), Err(AppError::ConfigError(_))));

        let mut config = Settings::new_for_test().unwrap().auth;
        config.refresh_token_ttl_days = i64::MAX / 2;
        assert!(matches!(TokenService::new(&config), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let tokens = service();
        let token = tokens.issue_access_token(&payload()).unwrap();
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        parts[2] = URL_SAFE_NO_PAD.encode(b"not-the-signature");
        let forged = parts.join(".");

        expect_auth_error(tokens.verify_access_token(&forged), AuthError::InvalidToken);
    }

    #[test]
    fn test_garbage_is_invalid() {
        let tokens = service();
        expect_auth_error(tokens.verify_access_token("invalid_token"), AuthError::InvalidToken);
        expect_auth_error(tokens.verify_refresh_token(""), AuthError::InvalidToken);
    }

    #[test]
    fn test_access_and_refresh_contexts_are_disjoint() {
        let tokens = service();
        let access = tokens.issue_access_token(&payload()).unwrap();
        let refresh = tokens.issue_refresh_token(&payload()).unwrap();

        expect_auth_error(tokens.verify_refresh_token(&access), AuthError::InvalidToken);
        expect_auth_error(tokens.verify_access_token(&refresh), AuthError::InvalidToken);
    }

    #[test]
    fn test_same_secret_still_separated_by_token_use() {
        let mut config = Settings::new_for_test().unwrap().auth;
        config.refresh_token_secret = config.access_token_secret.clone();
        let tokens = TokenService::new(&config).unwrap();

        let access = tokens.issue_access_token(&payload()).unwrap();
        expect_auth_error(tokens.verify_refresh_token(&access), AuthError::InvalidToken);
    }

    #[test]
    fn test_tokens_minted_together_differ() {
        let tokens = service();
        let p = payload();
        let a = tokens.issue_refresh_token_at(&p, 1_700_000_000).unwrap();
        let b = tokens.issue_refresh_token_at(&p, 1_700_000_000).unwrap();
        assert_ne!(a, b);
        assert_ne!(hash_refresh_token(&a), hash_refresh_token(&b));
    }

    #[test]
    fn test_hash_refresh_token_is_stable_and_opaque() {
        let h1 = hash_refresh_token("raw-token");
        let h2 = hash_refresh_token("raw-token");
        assert_eq!(h1, h2);
        assert!(!h1.contains("raw-token"));
        assert_eq!(h1.len(), 43);
    }
}
