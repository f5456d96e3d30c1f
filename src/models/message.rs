//! Message-related models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{null_as_default, UserRole};

/// Role of the author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    /// Initiating party (the advertiser that opened the campaign chat)
    Advertiser,
    /// Responding party
    Influencer,
    System,
}

impl From<UserRole> for SenderRole {
    fn from(role: UserRole) -> Self {
        match role {
            UserRole::Advertiser => SenderRole::Advertiser,
            UserRole::Influencer => SenderRole::Influencer,
            UserRole::Admin => SenderRole::System,
        }
    }
}

/// File attached to a message (stored externally, referenced by URL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Structured content carried alongside the message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    #[default]
    Text,
    /// Price/deadline offer made during negotiation. `amount` is in minor
    /// currency units.
    Proposal {
        amount: u64,
        currency: String,
        #[serde(default)]
        deadline: Option<NaiveDate>,
        #[serde(default)]
        note: Option<String>,
    },
    System {
        notice: String,
    },
}

/// A row of the messages table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_read: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payload: MessagePayload,
}

impl Message {
    /// Natural identity of a message independent of its id: same sender,
    /// same body and creation times no further apart than `window`.
    pub fn same_natural_key(&self, other: &Message, window: chrono::Duration) -> bool {
        self.sender_id == other.sender_id
            && self.body == other.body
            && (self.created_at - other.created_at).num_milliseconds().abs()
                <= window.num_milliseconds()
    }
}

/// Insert body for the messages table. The server assigns `id` and
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub payload: MessagePayload,
}

impl NewMessage {
    /// Local placeholder for this message, shown until the server confirms it.
    pub fn to_placeholder(&self, id: String, created_at: DateTime<Utc>) -> Message {
        Message {
            id,
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            sender_role: self.sender_role,
            body: self.body.clone(),
            attachments: self.attachments.clone(),
            created_at,
            is_read: true,
            payload: self.payload.clone(),
        }
    }
}
