//! In-memory collaborators for view tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, oneshot, Semaphore};

use super::{
    ChangeEvent, ChangeFeed, FeedObserver, FeedUpdate, MessageBackend, Notifier, Subscription,
};
use crate::models::{
    AuthContext, Conversation, Message, MessagePayload, NewMessage, SenderRole, UserRole,
};

pub const ROOM: &str = "room-1";
pub const ADV: &str = "adv-1";
pub const INF: &str = "inf-1";

/// Confirmed, unread message in [`ROOM`] at `millis` after the epoch.
pub fn message(id: &str, sender: &str, body: &str, millis: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: ROOM.to_string(),
        sender_id: sender.to_string(),
        sender_role: if sender == ADV {
            SenderRole::Advertiser
        } else {
            SenderRole::Influencer
        },
        body: body.to_string(),
        attachments: Vec::new(),
        created_at: at(millis),
        is_read: false,
        payload: MessagePayload::Text,
    }
}

pub fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

#[derive(Default)]
pub struct FakeBackend {
    history: Mutex<Vec<Message>>,
    unread: Mutex<(u32, u32)>,
    inserted: Mutex<Vec<Message>>,
    last_reader: Mutex<Option<String>>,
    insert_delay: Mutex<Option<Duration>>,
    server_skew: Mutex<Option<chrono::Duration>>,
    insert_gate: Option<Arc<Semaphore>>,
    fetch_gate: Option<Arc<Semaphore>>,
    fail_inserts: AtomicBool,
    fail_fetches: AtomicBool,
    fail_mark_read: AtomicBool,
    mark_read_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeBackend {
    pub fn with_history(history: Vec<Message>) -> Self {
        Self {
            history: Mutex::new(history),
            next_id: AtomicUsize::new(101),
            ..Default::default()
        }
    }

    /// Inserts wait for [`release`](Self::release).
    pub fn gated(mut self) -> Self {
        self.insert_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// History loads wait for [`release_fetch`](Self::release_fetch).
    pub fn gated_fetch(mut self) -> Self {
        self.fetch_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release(&self, n: usize) {
        if let Some(ref gate) = self.insert_gate {
            gate.add_permits(n);
        }
    }

    pub fn release_fetch(&self, n: usize) {
        if let Some(ref gate) = self.fetch_gate {
            gate.add_permits(n);
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mark_read(&self, fail: bool) {
        self.fail_mark_read.store(fail, Ordering::SeqCst);
    }

    pub fn delay_inserts(&self, delay: Duration) {
        *self.insert_delay.lock().unwrap() = Some(delay);
    }

    /// Inserts are stamped `by` off the local clock.
    pub fn server_skew(&self, by: chrono::Duration) {
        *self.server_skew.lock().unwrap() = Some(by);
    }

    fn server_now(&self) -> DateTime<Utc> {
        let skew = *self.server_skew.lock().unwrap();
        Utc::now() + skew.unwrap_or_else(chrono::Duration::zero)
    }

    pub fn set_unread(&self, advertiser: u32, influencer: u32) {
        *self.unread.lock().unwrap() = (advertiser, influencer);
    }

    pub fn add_history(&self, message: Message) {
        self.history.lock().unwrap().push(message);
    }

    pub fn inserted_records(&self) -> Vec<Message> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn mark_read_calls(&self) -> usize {
        self.mark_read_calls.load(Ordering::SeqCst)
    }

    pub fn last_reader(&self) -> Option<String> {
        self.last_reader.lock().unwrap().clone()
    }

    /// The row the next insert of `body` by `sender` will produce, as the
    /// change feed would push it.
    pub fn next_record_for(&self, sender: &str, body: &str) -> Message {
        let id = format!("msg-{}", self.next_id.load(Ordering::SeqCst));
        let mut record = message(&id, sender, body, 0);
        record.created_at = self.server_now();
        record
    }
}

#[async_trait]
impl MessageBackend for FakeBackend {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.fetch_gate {
            gate.acquire().await?.forget();
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            bail!("500 Internal Server Error");
        }
        let mut history: Vec<Message> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        history.sort_by_key(|m| m.created_at);
        Ok(history)
    }

    async fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        if let Some(ref gate) = self.insert_gate {
            gate.acquire().await?.forget();
        }
        let delay = *self.insert_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("insert rejected");
        }

        let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = new.to_placeholder(id, self.server_now());
        let record = Message {
            is_read: false,
            ..record
        };
        self.history.lock().unwrap().push(record.clone());
        self.inserted.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn mark_read(&self, _conversation_id: &str, reader: &AuthContext) -> Result<()> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_reader.lock().unwrap() = Some(reader.user_id.clone());
        if self.fail_mark_read.load(Ordering::SeqCst) {
            bail!("permission denied");
        }
        for m in self.history.lock().unwrap().iter_mut() {
            if m.sender_id != reader.user_id {
                m.is_read = true;
            }
        }
        let mut unread = self.unread.lock().unwrap();
        match reader.role {
            UserRole::Advertiser => unread.0 = 0,
            UserRole::Influencer => unread.1 = 0,
            UserRole::Admin => {}
        }
        Ok(())
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let (advertiser_unread, influencer_unread) = *self.unread.lock().unwrap();
        Ok(Conversation {
            id: conversation_id.to_string(),
            advertiser_id: ADV.to_string(),
            influencer_id: INF.to_string(),
            campaign_id: None,
            last_message_at: None,
            advertiser_unread,
            influencer_unread,
        })
    }
}

/// Change feed whose pushes the test drives.
#[derive(Default)]
pub struct FakeChangeFeed {
    senders: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
    teardowns: Mutex<Vec<oneshot::Receiver<()>>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeChangeFeed {
    pub fn push(&self, event: ChangeEvent) {
        let senders = self.senders.lock().unwrap();
        if let Some(tx) = senders.last() {
            tx.try_send(event).unwrap();
        }
    }

    /// Simulate the subscription dropping on the remote side.
    pub fn drop_all(&self) {
        self.senders.lock().unwrap().clear();
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn subscribe_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Subscriptions handed out and not yet dropped by the view.
    pub fn active(&self) -> usize {
        let mut teardowns = self.teardowns.lock().unwrap();
        teardowns.retain_mut(|rx| matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
        teardowns.len()
    }
}

#[async_trait]
impl ChangeFeed for FakeChangeFeed {
    async fn subscribe(&self, _conversation_id: &str) -> Result<Subscription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("channel join refused");
        }
        let (tx, rx) = mpsc::channel(32);
        let (teardown_tx, teardown_rx) = oneshot::channel();
        self.senders.lock().unwrap().push(tx);
        self.teardowns.lock().unwrap().push(teardown_rx);
        Ok(Subscription::new(rx, Some(teardown_tx)))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    count: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _message: &Message) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("no audio device");
        }
        Ok(())
    }
}

/// Records updates and counts any that arrive after the test declared the
/// view gone.
#[derive(Default)]
pub struct SpyObserver {
    updates: Mutex<Vec<FeedUpdate>>,
    torn_down: AtomicBool,
    violations: AtomicUsize,
}

impl SpyObserver {
    pub fn updates(&self) -> Vec<FeedUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn mark_torn_down(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }
}

impl FeedObserver for SpyObserver {
    fn on_update(&self, update: FeedUpdate) {
        if self.torn_down.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.updates.lock().unwrap().push(update);
    }
}
