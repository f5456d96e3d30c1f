//! Access token claims
//!
//! The payload is read without verifying the signature; the backend does
//! that on every request. We only need the user id, role and expiry.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::models::UserRole;

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    user_metadata: Option<RoleMetadata>,
    #[serde(default)]
    app_metadata: Option<RoleMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RoleMetadata {
    #[serde(default)]
    role: Option<String>,
}

impl Claims {
    /// Marketplace role, from `user_metadata.role` or else
    /// `app_metadata.role`.
    pub fn role(&self) -> Option<UserRole> {
        [&self.user_metadata, &self.app_metadata]
            .into_iter()
            .flatten()
            .filter_map(|m| m.role.as_deref())
            .find_map(|r| r.parse().ok())
    }
}

/// Decode the payload segment of a JWT.
pub fn decode(token: &str) -> Result<Claims> {
    let payload = token
        .split('.')
        .nth(1)
        .context("Malformed access token: missing payload")?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("Malformed access token: payload is not base64url")?;
    serde_json::from_slice(&bytes).context("Malformed access token: invalid claims")
}
