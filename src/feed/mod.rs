//! Realtime message feed for one conversation view.
//!
//! A mounted [`ConversationView`] owns a [`MessageStore`], appends sent
//! messages optimistically, reconciles them with the authoritative store and
//! merges pushes from a [`ChangeFeed`] subscription. Collaborators are
//! injected through [`FeedDeps`] so tests can substitute fakes.

pub mod pending;
pub mod store;
pub mod view;

#[cfg(test)]
mod fakes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::models::{AuthContext, Conversation, Message, NewMessage};

pub use pending::TempId;
pub use store::{AppendOutcome, Delivery, FeedEntry, MessageStore};
pub use view::{ConversationView, FeedSnapshot, LinkStatus};

/// Errors surfaced by a conversation view. None of them are fatal to the
/// view; they reach the UI as [`FeedUpdate`]s or as command results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("failed to load messages: {0}")]
    Load(String),
    #[error("failed to send message: {0}")]
    Send(String),
    #[error("send timed out after {}s", .0.as_secs())]
    SendTimeout(Duration),
    #[error("realtime subscription failed: {0}")]
    Subscription(String),
    #[error("connection lost after {0} reconnect attempts")]
    ConnectionLost(u32),
    #[error("message is empty")]
    EmptyMessage,
    #[error("conversation view is not mounted")]
    Unmounted,
}

impl FeedError {
    /// Whether retrying the same action can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FeedError::EmptyMessage | FeedError::Unmounted)
    }
}

/// The authoritative message store.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// All messages of a conversation, ordered by creation time.
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Insert one message and return the stored row (canonical id and
    /// timestamp).
    async fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    /// Set the read flag on messages not sent by the reader and reset the
    /// reader's unread counter.
    async fn mark_read(&self, conversation_id: &str, reader: &AuthContext) -> Result<()>;

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation>;
}

/// A change pushed by the realtime service
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(Message),
    Update(Message),
}

/// One live subscription to a conversation's change feed.
///
/// The event stream ends when the remote side drops. Dropping the
/// subscription tears the remote channel down.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    _teardown: Option<oneshot::Sender<()>>,
}

impl Subscription {
    /// `teardown` is signalled (by being dropped) when the subscription is
    /// dropped.
    pub fn new(events: mpsc::Receiver<ChangeEvent>, teardown: Option<oneshot::Sender<()>>) -> Self {
        Self {
            events,
            _teardown: teardown,
        }
    }

    /// Next event, or `None` once the subscription has dropped.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

/// Push subscription primitive filtered by conversation id.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription>;
}

/// Optional side channel for sound or desktop notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &Message) -> Result<()>;
}

/// Notifier that does nothing.
pub struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn notify(&self, _message: &Message) -> Result<()> {
        Ok(())
    }
}

/// Something a view tells its UI
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// The rendered list changed
    Messages(Vec<FeedEntry>),
    Conversation(Conversation),
    /// A new message from the other party arrived
    ScrollToLatest,
    /// Send failed and the optimistic entry is being removed (a
    /// `Messages` update follows). `draft` should go back into the compose
    /// box
    SendFailed {
        temp_id: String,
        draft: String,
        error: FeedError,
    },
    LoadFailed(FeedError),
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected,
    /// Retries are exhausted; show a "connection lost" banner
    ConnectionLost(FeedError),
}

/// Receives view updates. Called from the view task only while mounted.
pub trait FeedObserver: Send + Sync {
    fn on_update(&self, update: FeedUpdate);
}

impl FeedObserver for mpsc::UnboundedSender<FeedUpdate> {
    fn on_update(&self, update: FeedUpdate) {
        // The receiver going away just means nobody is rendering.
        let _ = self.send(update);
    }
}

/// Collaborators of a view
#[derive(Clone)]
pub struct FeedDeps {
    pub backend: Arc<dyn MessageBackend>,
    pub changes: Arc<dyn ChangeFeed>,
    pub notifier: Arc<dyn Notifier>,
    pub observer: Arc<dyn FeedObserver>,
}

/// Tunables for a view
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Upper bound for one authoritative send before it counts as failed
    pub send_timeout: Duration,
    /// Timestamp tolerance for recognising an echo of a pending send
    pub echo_window: Duration,
    /// Consecutive failed re-subscribes before giving up
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(15),
            echo_window: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl FeedConfig {
    /// Delay before reconnect attempt `attempt` (1-based): doubles from
    /// `initial_backoff`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}
