//! Persistence layer: store contracts plus Postgres and in-memory backends.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::{MemoryRefreshTokenStore, MemoryTable, MemoryUserStore};
pub use models::{NewRefreshToken, NewUser, RefreshTokenRecord, Role, RotationOutcome, User};
pub use postgres::{PgRefreshTokenStore, PgUserStore};
pub use store::{RefreshTokenStore, UserStore};
