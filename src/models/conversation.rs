//! Conversation (chat room) models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{null_as_default, UserRole};

/// A two-party chat room, optionally scoped to one campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub advertiser_id: String,
    pub influencer_id: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "advertiser_unread_count",
        default,
        deserialize_with = "null_as_default"
    )]
    pub advertiser_unread: u32,
    #[serde(
        rename = "influencer_unread_count",
        default,
        deserialize_with = "null_as_default"
    )]
    pub influencer_unread: u32,
}

/// Unread counter column kept for participants with `role`.
pub fn unread_column(role: UserRole) -> Option<&'static str> {
    match role {
        UserRole::Advertiser => Some("advertiser_unread_count"),
        UserRole::Influencer => Some("influencer_unread_count"),
        UserRole::Admin => None,
    }
}

impl Conversation {
    /// Which side of the room `user_id` is on, if a participant.
    pub fn role_of(&self, user_id: &str) -> Option<UserRole> {
        if self.advertiser_id == user_id {
            Some(UserRole::Advertiser)
        } else if self.influencer_id == user_id {
            Some(UserRole::Influencer)
        } else {
            None
        }
    }

    /// The other participant.
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        match self.role_of(user_id)? {
            UserRole::Advertiser => Some(&self.influencer_id),
            UserRole::Influencer => Some(&self.advertiser_id),
            UserRole::Admin => None,
        }
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        match self.role_of(user_id) {
            Some(UserRole::Advertiser) => self.advertiser_unread,
            Some(UserRole::Influencer) => self.influencer_unread,
            _ => 0,
        }
    }

    /// Name of the unread counter column belonging to `user_id`.
    pub fn unread_column_for(&self, user_id: &str) -> Option<&'static str> {
        unread_column(self.role_of(user_id)?)
    }

    /// Account for a new message: bump activity and the recipient's counter.
    /// System messages (non-participant senders) count as unread for both.
    pub fn record_message(&mut self, sender_id: &str, at: DateTime<Utc>) {
        if self.last_message_at.map_or(true, |last| at > last) {
            self.last_message_at = Some(at);
        }
        match self.role_of(sender_id) {
            Some(UserRole::Advertiser) => self.influencer_unread += 1,
            Some(UserRole::Influencer) => self.advertiser_unread += 1,
            _ => {
                self.advertiser_unread += 1;
                self.influencer_unread += 1;
            }
        }
    }

    /// Reset the reader's own counter. Never touches the other side.
    pub fn reset_unread(&mut self, reader_id: &str) {
        match self.role_of(reader_id) {
            Some(UserRole::Advertiser) => self.advertiser_unread = 0,
            Some(UserRole::Influencer) => self.influencer_unread = 0,
            _ => {}
        }
    }
}
