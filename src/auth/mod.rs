//! Authentication module
//!
//! Credential verification, token issuance and verification, refresh-token
//! rotation, and the request gates that sit in front of handlers.

pub mod handlers;
pub mod middleware;
pub mod password;
mod service;
pub mod token;

pub use middleware::{authenticate, authorize, Authenticate, Identity, RoleGate};
pub use password::{Argon2Hasher, CredentialHasher};
pub use service::{AuthPolicy, AuthService};
pub use token::{hash_refresh_token, Claims, TokenPair, TokenPayload, TokenService};
