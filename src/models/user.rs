//! User-related models

use serde::{Deserialize, Serialize};

/// Marketplace role of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Advertiser,
    Influencer,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Advertiser => "advertiser",
            UserRole::Influencer => "influencer",
            UserRole::Admin => "admin",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "advertiser" => Ok(UserRole::Advertiser),
            "influencer" => Ok(UserRole::Influencer),
            "admin" => Ok(UserRole::Admin),
            other => anyhow::bail!("unknown user role '{}'", other),
        }
    }
}

/// Who the local user is. Supplied by the auth layer and trusted for
/// deciding whether a message is "mine".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub role: UserRole,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_me(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}
