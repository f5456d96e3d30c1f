//! Terminal front end for a conversation view

pub mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::api::BackendClient;
use crate::config::Config;
use crate::feed::{ConversationView, FeedDeps, FeedUpdate, Notifier, SilentNotifier};
use crate::models::{AuthContext, Message};
use crate::realtime::RealtimeClient;
use render::Printer;

/// Rings the terminal bell for incoming messages.
pub struct BellNotifier;

#[async_trait]
impl Notifier for BellNotifier {
    async fn notify(&self, _message: &Message) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"\x07").await?;
        stdout.flush().await?;
        Ok(())
    }
}

struct OpenView {
    view: ConversationView,
    updates: mpsc::UnboundedReceiver<FeedUpdate>,
    me: AuthContext,
    send_timeout: Duration,
}

/// Mount a view wired to the real backend and realtime service.
async fn open_view(conversation_id: &str) -> Result<OpenView> {
    let client = BackendClient::new().await?;
    // Reload: the client may have refreshed tokens.
    let config = Config::load()?;
    let changes = RealtimeClient::for_client(&client)?;
    let me = client.me().clone();

    let notifier: Arc<dyn Notifier> = if config.feed.notify_bell {
        Arc::new(BellNotifier)
    } else {
        Arc::new(SilentNotifier)
    };
    let (tx, updates) = mpsc::unbounded_channel();
    let deps = FeedDeps {
        backend: Arc::new(client),
        changes: Arc::new(changes),
        notifier,
        observer: Arc::new(tx),
    };
    let feed_config = config.feed.to_feed_config();
    let send_timeout = feed_config.send_timeout;

    Ok(OpenView {
        view: ConversationView::mount(conversation_id, me.clone(), deps, feed_config),
        updates,
        me,
        send_timeout,
    })
}

/// Send one message and wait until the server confirms or rejects it.
pub async fn send_once(conversation_id: &str, text: &str) -> Result<()> {
    let OpenView {
        view,
        mut updates,
        send_timeout,
        ..
    } = open_view(conversation_id).await?;

    let temp_id = view.send(text).await?;
    let wait = async {
        // Updates queued before the send do not contain the temp id.
        let mut seen_pending = false;
        while let Some(update) = updates.recv().await {
            match update {
                FeedUpdate::SendFailed { temp_id: id, error, .. } if id == temp_id.as_str() => {
                    return Err(anyhow::Error::from(error));
                }
                FeedUpdate::Messages(entries) => {
                    let pending = entries.iter().any(|e| e.id() == temp_id.as_str());
                    if pending {
                        seen_pending = true;
                    } else if seen_pending {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(anyhow!("Conversation view stopped before the send completed"))
    };

    let result: Result<()> = tokio::time::timeout(send_timeout + Duration::from_secs(5), wait)
        .await
        .context("Timed out waiting for the send to complete")
        .and_then(|r| r);
    view.unmount().await;

    result?;
    println!("Message sent.");
    Ok(())
}

/// Interactive console: print the feed and send stdin lines.
pub async fn watch(conversation_id: &str) -> Result<()> {
    let OpenView {
        view,
        mut updates,
        me,
        ..
    } = open_view(conversation_id).await?;
    let mut printer = Printer::new(me);
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());

    println!(
        "Conversation {}. Type to send; /read, /retry, /resend, /quit.",
        conversation_id
    );

    loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line {
                    Some(line) => line.context("Failed to read stdin")?,
                    None => break,
                };
                if !handle_input(&view, line.trim()).await? {
                    break;
                }
            }
            update = updates.recv() => match update {
                Some(update) => {
                    for line in printer.apply(&update) {
                        println!("{}", line);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    view.unmount().await;
    println!("Bye.");
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_input(view: &ConversationView, input: &str) -> Result<bool> {
    match input {
        "" => {}
        "/quit" | "/q" => return Ok(false),
        "/read" => view.mark_read().await?,
        "/retry" => view.retry().await?,
        "/resend" => match view.take_draft().await? {
            Some(draft) => {
                view.send(draft).await?;
            }
            None => println!("Nothing to resend."),
        },
        text if text.starts_with('/') => {
            println!("Unknown command {}", text);
        }
        text => {
            if let Err(e) = view.send(text).await {
                println!("! {}", e);
            }
        }
    }
    Ok(true)
}
