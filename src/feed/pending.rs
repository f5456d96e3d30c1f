//! Temporary identifiers for optimistic sends

use std::fmt;

use chrono::{DateTime, Utc};

/// Prefix shared by every locally generated message id.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Client-assigned id of a message the server has not confirmed yet.
///
/// Format: `tmp-<unix millis>-<8 hex chars>`. The random suffix keeps ids
/// unique when several sends happen within the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempId(String);

impl TempId {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}{}-{}",
            TEMP_ID_PREFIX,
            now.timestamp_millis(),
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `id` looks like a temporary id rather than a server id.
    pub fn is_temp(id: &str) -> bool {
        id.starts_with(TEMP_ID_PREFIX)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TempId> for String {
    fn from(id: TempId) -> Self {
        id.0
    }
}

impl PartialEq<str> for TempId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}
