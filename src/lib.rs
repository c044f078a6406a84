pub mod auth;
pub mod config;
pub mod db;
pub mod error;

use std::sync::Arc;
use std::time::Duration;
use sqlx::PgPool;
use actix_web::HttpResponse;
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use crate::config::Settings;

pub use auth::{AuthService, TokenService};
pub use db::{RefreshTokenStore, User, UserStore};

use auth::{Argon2Hasher, AuthPolicy};
use db::{MemoryRefreshTokenStore, MemoryUserStore, PgRefreshTokenStore, PgUserStore};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all workers. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pub db_pool: Option<Arc<PgPool>>,
}

impl AppState {
    /// Composition root: validates settings and wires stores, token service and
    /// hasher for the configured storage backend.
    pub async fn new(config: Settings) -> Result<Self> {
        config.validate()?;

        match config.storage.backend.as_str() {
            crate::config::STORAGE_MEMORY => {
                info!("Using in-memory storage");
                Self::from_parts(
                    config,
                    Arc::new(MemoryUserStore::new()),
                    Arc::new(MemoryRefreshTokenStore::new()),
                )
            }
            _ => {
                let pool = db::postgres::connect(
                    &config.database.url,
                    config.database.max_connections,
                    Duration::from_secs(config.database.acquire_timeout_secs),
                )
                .await?;
                db::postgres::run_migrations(&pool).await?;
                info!("Connected to Postgres and applied migrations");

                let pool = Arc::new(pool);
                let mut state = Self::from_parts(
                    config,
                    Arc::new(PgUserStore::new(pool.clone())),
                    Arc::new(PgRefreshTokenStore::new(pool.clone())),
                )?;
                state.db_pool = Some(pool);
                Ok(state)
            }
        }
    }

    /// Wires explicit store implementations, e.g. in tests.
    pub fn from_parts(
        config: Settings,
        users: Arc<dyn UserStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> Result<Self> {
        config.validate()?;

        let tokens = Arc::new(TokenService::new(&config.auth)?);
        let hasher = Arc::new(Argon2Hasher::from_config(&config.auth)?);
        let auth_service = AuthService::new(
            users,
            refresh_tokens,
            tokens,
            hasher,
            AuthPolicy::from(&config.auth),
        );

        Ok(Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            db_pool: None,
        })
    }

    pub fn tokens(&self) -> Arc<TokenService> {
        self.auth_service.tokens().clone()
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(pool) = &self.db_pool {
            pool.close().await;
        }
        Ok(())
    }
}
