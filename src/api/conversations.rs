//! Conversations (chat rooms) of the signed-in user

use anyhow::{Context, Result};

use super::client::BackendClient;
use crate::models::Conversation;

impl BackendClient {
    /// Rooms the user takes part in, most recently active first.
    pub async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>> {
        let me = &self.me().user_id;
        let resp = self
            .rest_get(
                &self.tables().conversations,
                &[
                    ("select", "*".to_string()),
                    (
                        "or",
                        format!("(advertiser_id.eq.{},influencer_id.eq.{})", me, me),
                    ),
                    ("order", "last_message_at.desc.nullslast".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        resp.json().await.context("Failed to parse conversations")
    }
}
