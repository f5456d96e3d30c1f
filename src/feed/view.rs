//! Conversation view: the task that owns one conversation's message store.
//!
//! Mounting spawns the task; every interaction goes through its command
//! channel. Network work (history load, conversation load, subscribe,
//! sends) runs in `JoinSet`s owned by the task, so a result can only be
//! applied while the task is alive. Unmounting ends the task and with it
//! the store and the subscription.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant};

use super::store::MessageStore;
use super::{
    AppendOutcome, ChangeEvent, FeedConfig, FeedDeps, FeedEntry, FeedError, FeedUpdate,
    Subscription, TempId,
};
use crate::models::{Attachment, AuthContext, Conversation, Message, MessagePayload, NewMessage};

const COMMAND_QUEUE: usize = 64;

/// State of the realtime link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Subscribed,
    Reconnecting { attempt: u32 },
    /// Retries exhausted; waits for [`ConversationView::retry`]
    Lost,
}

/// Point-in-time copy of a view's state
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub entries: Vec<FeedEntry>,
    pub conversation: Option<Conversation>,
    /// Text of the last failed send, to put back into the compose box
    pub draft: Option<String>,
    pub link: LinkStatus,
    /// Whether a history load has completed
    pub loaded: bool,
}

enum Command {
    Send {
        body: String,
        payload: MessagePayload,
        attachments: Vec<Attachment>,
        reply: oneshot::Sender<Result<TempId, FeedError>>,
    },
    MarkRead,
    Retry,
    Snapshot(oneshot::Sender<FeedSnapshot>),
    TakeDraft(oneshot::Sender<Option<String>>),
    Unmount,
}

enum Job {
    History {
        generation: u64,
        result: anyhow::Result<Vec<Message>>,
    },
    Conversation(anyhow::Result<Conversation>),
    Subscribed {
        attempt: u32,
        result: anyhow::Result<Subscription>,
    },
}

struct SendOutcome {
    temp_id: TempId,
    /// Local time the insert was issued
    sent_at: DateTime<Utc>,
    draft: String,
    result: Result<Message, FeedError>,
}

/// Handle to a mounted conversation view.
///
/// Dropping the handle without [`unmount`](Self::unmount) aborts the task.
pub struct ConversationView {
    conversation_id: String,
    commands: mpsc::Sender<Command>,
    task: Option<JoinHandle<()>>,
}

impl ConversationView {
    /// Mount a view: subscribe to the conversation's change feed and load
    /// its history and metadata. Must be called within a tokio runtime.
    pub fn mount(
        conversation_id: impl Into<String>,
        me: AuthContext,
        deps: FeedDeps,
        config: FeedConfig,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        let task = FeedTask::new(conversation_id.clone(), me, deps, config);
        let task = tokio::spawn(task.run(rx));

        Self {
            conversation_id,
            commands,
            task: Some(task),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, FeedError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| FeedError::Unmounted)?;
        rx.await.map_err(|_| FeedError::Unmounted)
    }

    /// Send a plain text message. Returns once the optimistic entry is in
    /// the store; the outcome arrives later as a store change or a
    /// [`FeedUpdate::SendFailed`].
    pub async fn send(&self, body: impl Into<String>) -> Result<TempId, FeedError> {
        self.send_message(body, MessagePayload::Text, Vec::new())
            .await
    }

    pub async fn send_message(
        &self,
        body: impl Into<String>,
        payload: MessagePayload,
        attachments: Vec<Attachment>,
    ) -> Result<TempId, FeedError> {
        let body = body.into();
        self.request(|reply| Command::Send {
            body,
            payload,
            attachments,
            reply,
        })
        .await?
    }

    /// Mark everything from the other party as read.
    pub async fn mark_read(&self) -> Result<(), FeedError> {
        self.commands
            .send(Command::MarkRead)
            .await
            .map_err(|_| FeedError::Unmounted)
    }

    /// Re-subscribe (if needed) and reload the history.
    pub async fn retry(&self) -> Result<(), FeedError> {
        self.commands
            .send(Command::Retry)
            .await
            .map_err(|_| FeedError::Unmounted)
    }

    pub async fn snapshot(&self) -> Result<FeedSnapshot, FeedError> {
        self.request(Command::Snapshot).await
    }

    /// Take the restored draft, leaving none behind.
    pub async fn take_draft(&self) -> Result<Option<String>, FeedError> {
        self.request(Command::TakeDraft).await
    }

    /// Stop the view and wait for its task to finish. Responses still in
    /// flight are discarded.
    pub async fn unmount(mut self) {
        let _ = self.commands.send(Command::Unmount).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!("Conversation view task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct FeedTask {
    me: AuthContext,
    store: MessageStore,
    conversation: Option<Conversation>,
    deps: FeedDeps,
    config: FeedConfig,
    draft: Option<String>,
    link: LinkStatus,
    subscription: Option<Subscription>,
    subscribing: bool,
    reconnect_at: Option<(u32, Instant)>,
    /// Server clock minus local clock, as last measured by a confirmed send
    clock_skew: chrono::Duration,
    /// Temp ids whose confirmed copy arrived over the feed before the send
    /// returned
    absorbed: HashSet<String>,
    history_generation: u64,
    applied_generation: u64,
    loaded: bool,
    jobs: JoinSet<Job>,
    sends: JoinSet<SendOutcome>,
}

impl FeedTask {
    fn new(conversation_id: String, me: AuthContext, deps: FeedDeps, config: FeedConfig) -> Self {
        let echo_window =
            chrono::Duration::from_std(config.echo_window).unwrap_or(chrono::Duration::seconds(1));
        Self {
            me,
            store: MessageStore::new(conversation_id, echo_window),
            conversation: None,
            deps,
            config,
            draft: None,
            link: LinkStatus::Connecting,
            subscription: None,
            subscribing: false,
            reconnect_at: None,
            clock_skew: chrono::Duration::zero(),
            absorbed: HashSet::new(),
            history_generation: 0,
            applied_generation: 0,
            loaded: false,
            jobs: JoinSet::new(),
            sends: JoinSet::new(),
        }
    }

    fn conversation_id(&self) -> String {
        self.store.conversation_id().to_string()
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!("Mounting conversation {}", self.store.conversation_id());

        // History loads once the first subscribe attempt settles.
        self.spawn_subscribe(0);
        self.spawn_conversation();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Unmount) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(joined) = self.jobs.join_next() => match joined {
                    Ok(job) => self.handle_job(job),
                    Err(e) => tracing::warn!("Feed job failed: {}", e),
                },
                Some(joined) = self.sends.join_next() => match joined {
                    Ok(outcome) => self.handle_send_outcome(outcome),
                    Err(e) => tracing::warn!("Send task failed: {}", e),
                },
                event = next_event(&mut self.subscription) => self.handle_event(event),
                attempt = reconnect_due(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.spawn_subscribe(attempt);
                }
            }
        }

        // Sends may still land server-side; their results are dropped.
        self.sends.detach_all();
        self.jobs.abort_all();
        self.subscription = None;
        tracing::info!("Unmounted conversation {}", self.store.conversation_id());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                body,
                payload,
                attachments,
                reply,
            } => {
                let _ = reply.send(self.send(body, payload, attachments));
            }
            Command::MarkRead => self.mark_read(true),
            Command::Retry => self.retry(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::TakeDraft(reply) => {
                let _ = reply.send(self.draft.take());
            }
            Command::Unmount => {}
        }
    }

    fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            entries: self.store.entries().to_vec(),
            conversation: self.conversation.clone(),
            draft: self.draft.clone(),
            link: self.link,
            loaded: self.loaded,
        }
    }

    fn publish_messages(&self) {
        self.deps
            .observer
            .on_update(FeedUpdate::Messages(self.store.entries().to_vec()));
    }

    fn publish_conversation(&self) {
        if let Some(ref conversation) = self.conversation {
            self.deps
                .observer
                .on_update(FeedUpdate::Conversation(conversation.clone()));
        }
    }

    // -- Optimistic send --

    fn send(
        &mut self,
        body: String,
        payload: MessagePayload,
        attachments: Vec<Attachment>,
    ) -> Result<TempId, FeedError> {
        let draft = body;
        let body = draft.trim().to_string();
        if body.is_empty() && attachments.is_empty() && payload == MessagePayload::Text {
            return Err(FeedError::EmptyMessage);
        }

        let now = Utc::now();
        let temp_id = TempId::generate(now);
        let new = NewMessage {
            conversation_id: self.conversation_id(),
            sender_id: self.me.user_id.clone(),
            sender_role: self.me.role.into(),
            body,
            attachments,
            payload,
        };

        self.store
            .push_pending(new.to_placeholder(temp_id.to_string(), now + self.clock_skew));
        self.draft = None;
        self.publish_messages();

        tracing::debug!("Sending {} to {}", temp_id, new.conversation_id);

        let backend = self.deps.backend.clone();
        let timeout = self.config.send_timeout;
        let id = temp_id.clone();
        self.sends.spawn(async move {
            let result = match time::timeout(timeout, backend.insert_message(&new)).await {
                Ok(Ok(record)) => Ok(record),
                Ok(Err(e)) => Err(FeedError::Send(format!("{:#}", e))),
                Err(_) => Err(FeedError::SendTimeout(timeout)),
            };
            SendOutcome {
                temp_id: id,
                sent_at: now,
                draft,
                result,
            }
        });

        Ok(temp_id)
    }

    fn handle_send_outcome(&mut self, outcome: SendOutcome) {
        let temp_id = outcome.temp_id.to_string();
        let was_absorbed = self.absorbed.remove(&temp_id);

        match outcome.result {
            Ok(record) => {
                tracing::debug!("Send {} confirmed as {}", temp_id, record.id);
                let round_trip = Utc::now() - outcome.sent_at;
                self.clock_skew = record.created_at - (outcome.sent_at + round_trip / 2);
                if !was_absorbed {
                    self.record_activity(&record);
                }
                self.store.confirm(&temp_id, record);
                self.publish_messages();
            }
            Err(error) => {
                if self.store.rollback(&temp_id).is_none() {
                    // The confirmed copy already came in over the feed or
                    // with a history reload.
                    tracing::info!(
                        "Send {} reported failure but the message was delivered",
                        temp_id
                    );
                    return;
                }
                tracing::warn!("Send {} failed: {}", temp_id, error);
                self.draft = Some(outcome.draft.clone());
                self.deps.observer.on_update(FeedUpdate::SendFailed {
                    temp_id,
                    draft: outcome.draft,
                    error,
                });
                self.publish_messages();
            }
        }
    }

    fn record_activity(&mut self, message: &Message) {
        if let Some(ref mut conversation) = self.conversation {
            conversation.record_message(&message.sender_id, message.created_at);
        }
    }

    // -- Remote change listener --

    fn handle_event(&mut self, event: Option<ChangeEvent>) {
        match event {
            Some(ChangeEvent::Insert(message)) => self.on_remote_insert(message),
            Some(ChangeEvent::Update(message)) => {
                if message.conversation_id != self.store.conversation_id() {
                    return;
                }
                if self.store.apply_update(message) {
                    self.publish_messages();
                }
            }
            None => {
                tracing::warn!(
                    "Realtime subscription for {} dropped",
                    self.store.conversation_id()
                );
                self.subscription = None;
                self.schedule_reconnect(1);
            }
        }
    }

    fn on_remote_insert(&mut self, message: Message) {
        if message.conversation_id != self.store.conversation_id() {
            tracing::debug!(
                "Ignoring message {} for conversation {}",
                message.id,
                message.conversation_id
            );
            return;
        }

        let from_other = !self.me.is_me(&message.sender_id);
        let outcome = self.store.append(message.clone());

        match outcome {
            AppendOutcome::Inserted => self.record_activity(&message),
            AppendOutcome::Absorbed { ref temp_id } => {
                self.absorbed.insert(temp_id.clone());
                self.record_activity(&message);
            }
            AppendOutcome::Replaced => {
                tracing::debug!("Duplicate delivery of {}", message.id);
            }
        }
        self.publish_messages();

        if from_other && outcome.is_new() {
            self.deps.observer.on_update(FeedUpdate::ScrollToLatest);
            self.mark_read(false);
            self.spawn_notify(message);
        }
    }

    fn spawn_notify(&self, message: Message) {
        let notifier = self.deps.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&message).await {
                tracing::warn!("Notification for {} failed: {:#}", message.id, e);
            }
        });
    }

    /// Mark the other party's messages read locally, reset our counter and
    /// tell the backend. `force` writes to the backend even when nothing
    /// changed locally.
    fn mark_read(&mut self, force: bool) {
        let changed = self.store.mark_read(&self.me.user_id);
        let mut counter_reset = false;
        if let Some(ref mut conversation) = self.conversation {
            counter_reset = conversation.unread_for(&self.me.user_id) > 0;
            conversation.reset_unread(&self.me.user_id);
        }

        if changed > 0 {
            self.publish_messages();
        }
        if counter_reset {
            self.publish_conversation();
        }
        if changed == 0 && !counter_reset && !force {
            return;
        }

        // Read state is advisory: a failed write is logged, not rolled back.
        let backend = self.deps.backend.clone();
        let conversation_id = self.conversation_id();
        let me = self.me.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.mark_read(&conversation_id, &me).await {
                tracing::warn!("Failed to mark {} read: {:#}", conversation_id, e);
            }
        });
    }

    // -- Loads and subscription lifecycle --

    fn spawn_history(&mut self) {
        self.history_generation += 1;
        let generation = self.history_generation;
        let backend = self.deps.backend.clone();
        let conversation_id = self.conversation_id();
        self.jobs.spawn(async move {
            Job::History {
                generation,
                result: backend.fetch_messages(&conversation_id).await,
            }
        });
    }

    fn spawn_conversation(&mut self) {
        let backend = self.deps.backend.clone();
        let conversation_id = self.conversation_id();
        self.jobs.spawn(async move {
            Job::Conversation(backend.fetch_conversation(&conversation_id).await)
        });
    }

    fn spawn_subscribe(&mut self, attempt: u32) {
        self.subscribing = true;
        let changes = self.deps.changes.clone();
        let conversation_id = self.conversation_id();
        self.jobs.spawn(async move {
            Job::Subscribed {
                attempt,
                result: changes.subscribe(&conversation_id).await,
            }
        });
    }

    fn schedule_reconnect(&mut self, attempt: u32) {
        if attempt > self.config.max_reconnect_attempts {
            let error = FeedError::ConnectionLost(self.config.max_reconnect_attempts);
            tracing::warn!("{} ({})", error, self.store.conversation_id());
            self.link = LinkStatus::Lost;
            self.reconnect_at = None;
            self.deps
                .observer
                .on_update(FeedUpdate::ConnectionLost(error));
            return;
        }

        let delay = self.config.backoff(attempt);
        tracing::info!(
            "Reconnecting {} in {}ms (attempt {})",
            self.store.conversation_id(),
            delay.as_millis(),
            attempt
        );
        self.link = LinkStatus::Reconnecting { attempt };
        self.reconnect_at = Some((attempt, Instant::now() + delay));
        self.deps
            .observer
            .on_update(FeedUpdate::Reconnecting { attempt, delay });
    }

    fn retry(&mut self) {
        if self.subscription.is_none() && !self.subscribing {
            self.reconnect_at = None;
            self.link = LinkStatus::Connecting;
            self.spawn_subscribe(1);
        }
        self.spawn_history();
        if self.conversation.is_none() {
            self.spawn_conversation();
        }
    }

    fn handle_job(&mut self, job: Job) {
        match job {
            Job::History { generation, result } => self.on_history(generation, result),
            Job::Conversation(Ok(conversation)) => {
                self.conversation = Some(conversation);
                self.publish_conversation();
                if self.loaded {
                    self.mark_read(false);
                }
            }
            Job::Conversation(Err(e)) => {
                tracing::warn!(
                    "Failed to load conversation {}: {:#}",
                    self.store.conversation_id(),
                    e
                );
            }
            Job::Subscribed { attempt, result } => {
                self.subscribing = false;
                match result {
                    Ok(subscription) => {
                        tracing::info!("Subscribed to {}", self.store.conversation_id());
                        self.subscription = Some(subscription);
                        self.link = LinkStatus::Subscribed;
                        if attempt > 0 {
                            self.deps.observer.on_update(FeedUpdate::Reconnected);
                        }
                        // Covers anything inserted before the subscription
                        // came up.
                        self.spawn_history();
                    }
                    Err(e) => {
                        let error = FeedError::Subscription(format!("{:#}", e));
                        tracing::warn!("{} ({})", error, self.store.conversation_id());
                        if attempt == 0 {
                            // Show the history while reconnecting.
                            self.spawn_history();
                        }
                        self.schedule_reconnect(attempt + 1);
                    }
                }
            }
        }
    }

    fn on_history(&mut self, generation: u64, result: anyhow::Result<Vec<Message>>) {
        if generation < self.applied_generation {
            tracing::debug!("Dropping stale history load {}", generation);
            return;
        }

        match result {
            Ok(history) => {
                self.applied_generation = generation;
                tracing::debug!(
                    "Loaded {} messages for {}",
                    history.len(),
                    self.store.conversation_id()
                );
                self.store.merge_history(history);
                self.loaded = true;
                self.publish_messages();
                self.mark_read(false);
            }
            Err(e) => {
                let error = FeedError::Load(format!("{:#}", e));
                tracing::warn!("{} ({})", error, self.store.conversation_id());
                self.deps.observer.on_update(FeedUpdate::LoadFailed(error));
            }
        }
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(reconnect_at: Option<(u32, Instant)>) -> u32 {
    match reconnect_at {
        Some((attempt, at)) => {
            time::sleep_until(at).await;
            attempt
        }
        None => std::future::pending().await,
    }
}
