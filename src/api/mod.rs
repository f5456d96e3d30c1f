//! REST client for the marketplace backend

pub mod client;
mod conversations;
mod messages;

pub use client::BackendClient;

use anyhow::Result;

use crate::console::render;
use crate::feed::FeedEntry;

/// List the user's conversations
pub async fn list_conversations(limit: usize) -> Result<()> {
    let client = BackendClient::new().await?;
    let conversations = client.list_conversations(limit).await?;

    println!("\nConversations:");
    println!("{:-<60}", "");

    if conversations.is_empty() {
        println!("  (no conversations found)");
        return Ok(());
    }

    for conversation in &conversations {
        println!("{}", render::conversation_line(conversation, client.me()));
    }

    Ok(())
}

/// Print the latest messages of a conversation
pub async fn read_history(conversation_id: &str, limit: usize) -> Result<()> {
    let client = BackendClient::new().await?;
    let messages = client.recent_messages(conversation_id, limit).await?;

    if messages.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    for message in messages {
        println!(
            "{}",
            render::entry_line(&FeedEntry::confirmed(message), client.me())
        );
    }

    Ok(())
}
