use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AppError {
    /// Store, signing and bootstrap failures. These are logged server-side and
    /// never described to the caller.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AppError::ConfigError(_)
                | AppError::InternalError(_)
                | AppError::DatabaseError(DatabaseError::ConnectionError(_))
                | AppError::DatabaseError(DatabaseError::QueryError(_))
        )
    }

    /// Message shown to HTTP clients.
    pub fn public_message(&self) -> String {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::InvalidCredentials => "Invalid credentials".to_string(),
                AuthError::DuplicateEmail => "Email already registered".to_string(),
                // Absent, mismatched and revoked refresh tokens look the same from outside.
                AuthError::InvalidToken | AuthError::RevokedToken => "Invalid token".to_string(),
                AuthError::ExpiredToken => "Token expired".to_string(),
                AuthError::Unauthorized => "Unauthorized".to_string(),
                AuthError::Forbidden => "Forbidden".to_string(),
            },
            AppError::ValidationError(msg) => msg.clone(),
            AppError::DatabaseError(DatabaseError::NotFound) => "Record not found".to_string(),
            AppError::DatabaseError(DatabaseError::Duplicate) => "Duplicate record".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseError(DatabaseError::ConnectionError(err.to_string()))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

// Any decode/signature failure is reported as a bad token; expiry is checked separately.
impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::AuthError(AuthError::InvalidToken)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if self.is_infrastructure() {
            error!("Request failed: {}", self);
        }
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": self.public_message()
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::DuplicateEmail => StatusCode::CONFLICT,
                AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
                AuthError::ExpiredToken => StatusCode::UNAUTHORIZED,
                AuthError::RevokedToken => StatusCode::UNAUTHORIZED,
                AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
                AuthError::Forbidden => StatusCode::FORBIDDEN,
            },
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DatabaseError(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(DatabaseError::Duplicate) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Token revoked")]
    RevokedToken,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => DatabaseError::Duplicate,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionError(err.to_string())
            }
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}
