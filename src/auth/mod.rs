//! Authentication against the backend's auth service
//!
//! Email/password sign-in returns a JWT access token plus a refresh token.
//! The user id and marketplace role are read from the token's claims.

pub mod claims;
pub mod password;
pub mod tokens;

pub use password::{login, logout, refresh, status};
pub use tokens::{StoredToken, TokenStore};

/// Environment variable read for the password before prompting
pub const PASSWORD_ENV: &str = "MARKETCHAT_PASSWORD";
