//! Token storage and management

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Stored access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    /// Unix seconds
    pub expires_at: Option<i64>,
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| Utc::now().timestamp() + secs as i64);
        Self { token, expires_at }
    }

    /// Token with an absolute expiry (e.g. the JWT `exp` claim).
    pub fn expiring_at(token: String, expires_at: Option<i64>) -> Self {
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    fn is_expired_at(&self, now: i64) -> bool {
        match self.expires_at {
            Some(exp) => now + EXPIRY_MARGIN_SECS >= exp,
            None => false,
        }
    }
}

/// Token store trait for different storage backends
pub trait TokenStore {
    fn get_access_token(&self) -> Option<StoredToken>;
    fn set_access_token(&mut self, token: String, expires_in: Option<u64>);
    fn get_refresh_token(&self) -> Option<String>;
    fn set_refresh_token(&mut self, token: String);
    fn clear_tokens(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_margin() {
        let token = StoredToken::expiring_at("t".to_string(), Some(1_000));
        assert!(!token.is_expired_at(900));
        assert!(token.is_expired_at(940));
        assert!(token.is_expired_at(2_000));

        let forever = StoredToken::expiring_at("t".to_string(), None);
        assert!(!forever.is_expired_at(i64::MAX - EXPIRY_MARGIN_SECS));
    }

    #[test]
    fn test_new_token_is_fresh() {
        assert!(!StoredToken::new("t".to_string(), Some(3600)).is_expired());
        assert!(StoredToken::new("t".to_string(), Some(0)).is_expired());
    }
}
