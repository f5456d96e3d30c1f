//! Data models for marketplace chat entities

mod conversation;
mod message;
mod user;

pub use conversation::*;
pub use message::*;
pub use user::*;

use serde::{Deserialize, Deserializer};

/// Deserialize a nullable column, mapping `null` to the type's default.
pub(crate) fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}
