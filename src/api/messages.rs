//! Messages table: the authoritative store behind a conversation view

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::client::{eq, BackendClient};
use crate::feed::MessageBackend;
use crate::models::{unread_column, AuthContext, Conversation, Message, NewMessage};

impl BackendClient {
    /// The latest `limit` messages of a conversation, oldest first.
    pub async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let resp = self
            .rest_get(
                &self.tables().messages,
                &[
                    ("select", "*".to_string()),
                    ("conversation_id", eq(conversation_id)),
                    ("order", "created_at.desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let mut messages: Vec<Message> = resp
            .json()
            .await
            .context("Failed to parse messages")?;
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl MessageBackend for BackendClient {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let resp = self
            .rest_get(
                &self.tables().messages,
                &[
                    ("select", "*".to_string()),
                    ("conversation_id", eq(conversation_id)),
                    ("order", "created_at.asc".to_string()),
                ],
            )
            .await?;
        resp.json().await.context("Failed to parse messages")
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let resp = self.rest_post(&self.tables().messages, message).await?;
        let mut rows: Vec<Message> = resp
            .json()
            .await
            .context("Failed to parse inserted message")?;
        let record = rows.pop().context("Insert returned no row")?;
        tracing::debug!("Inserted message {}", record.id);
        Ok(record)
    }

    async fn mark_read(&self, conversation_id: &str, reader: &AuthContext) -> Result<()> {
        self.rest_patch(
            &self.tables().messages,
            &[
                ("conversation_id", eq(conversation_id)),
                ("sender_id", format!("neq.{}", reader.user_id)),
                ("is_read", "eq.false".to_string()),
            ],
            &serde_json::json!({ "is_read": true }),
        )
        .await
        .context("Failed to mark messages read")?;

        if let Some(column) = unread_column(reader.role) {
            self.rest_patch(
                &self.tables().conversations,
                &[("id", eq(conversation_id))],
                &serde_json::json!({ column: 0 }),
            )
            .await
            .context("Failed to reset unread counter")?;
        }
        Ok(())
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let resp = self
            .rest_get(
                &self.tables().conversations,
                &[("select", "*".to_string()), ("id", eq(conversation_id))],
            )
            .await?;
        let mut rows: Vec<Conversation> = resp
            .json()
            .await
            .context("Failed to parse conversation")?;
        rows.pop()
            .with_context(|| format!("Conversation {} not found", conversation_id))
    }
}
