//! Plain-text rendering of feed state for the terminal

use std::collections::HashSet;

use chrono::{DateTime, Local, Utc};

use crate::feed::{FeedEntry, FeedUpdate};
use crate::models::{AuthContext, Conversation, Message, MessagePayload, SenderRole};

pub fn clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

pub fn stamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Amount in minor units, e.g. `150000` -> `1500.00 USD`.
pub fn money(amount: u64, currency: &str) -> String {
    format!("{}.{:02} {}", amount / 100, amount % 100, currency)
}

fn author(message: &Message, me: &AuthContext) -> &'static str {
    if me.is_me(&message.sender_id) {
        return "you";
    }
    match message.sender_role {
        SenderRole::Advertiser => "advertiser",
        SenderRole::Influencer => "influencer",
        SenderRole::System => "system",
    }
}

/// Body plus structured payload and attachments.
pub fn content(message: &Message) -> String {
    let mut text = match message.payload {
        MessagePayload::Text => message.body.clone(),
        MessagePayload::Proposal {
            amount,
            ref currency,
            deadline,
            ref note,
        } => {
            let mut offer = format!("[proposal] {}", money(amount, currency));
            if let Some(deadline) = deadline {
                offer.push_str(&format!(" by {}", deadline));
            }
            if let Some(note) = note {
                offer.push_str(&format!(" ({})", note));
            }
            if !message.body.is_empty() {
                offer.push_str(&format!(" {}", message.body));
            }
            offer
        }
        MessagePayload::System { ref notice } => format!("* {}", notice),
    };

    if !message.attachments.is_empty() {
        let names: Vec<&str> = message.attachments.iter().map(|a| a.name.as_str()).collect();
        text.push_str(&format!(" [attached: {}]", names.join(", ")));
    }
    text
}

pub fn entry_line(entry: &FeedEntry, me: &AuthContext) -> String {
    let message = &entry.message;
    let status = if entry.is_pending() {
        " (sending...)"
    } else if me.is_me(&message.sender_id) && message.is_read {
        " (seen)"
    } else {
        ""
    };
    format!(
        "[{}] {}: {}{}",
        clock(message.created_at),
        author(message, me),
        content(message),
        status
    )
}

pub fn conversation_line(conversation: &Conversation, me: &AuthContext) -> String {
    let with = conversation
        .counterpart_of(&me.user_id)
        .unwrap_or("?");
    let last = conversation
        .last_message_at
        .map(stamp)
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!("{}  with {}  last {}", conversation.id, with, last);
    let unread = conversation.unread_for(&me.user_id);
    if unread > 0 {
        line.push_str(&format!("  ({} unread)", unread));
    }
    if let Some(ref campaign) = conversation.campaign_id {
        line.push_str(&format!("  campaign {}", campaign));
    }
    line
}

/// Turns feed updates into lines for an append-only terminal.
///
/// Each message is printed once. A confirmed copy of a message already
/// printed as pending is not printed again.
pub struct Printer {
    me: AuthContext,
    shown: HashSet<String>,
    awaiting: Vec<String>,
}

impl Printer {
    pub fn new(me: AuthContext) -> Self {
        Self {
            me,
            shown: HashSet::new(),
            awaiting: Vec::new(),
        }
    }

    pub fn apply(&mut self, update: &FeedUpdate) -> Vec<String> {
        match update {
            FeedUpdate::Messages(entries) => self.entries(entries),
            FeedUpdate::SendFailed { draft, error, .. } => {
                if let Some(pos) = self.awaiting.iter().position(|b| b == draft) {
                    self.awaiting.remove(pos);
                }
                vec![format!(
                    "! not sent ({}): \"{}\" -- /resend to try again",
                    error, draft
                )]
            }
            FeedUpdate::LoadFailed(error) => vec![format!("! {} -- /retry to reload", error)],
            FeedUpdate::Reconnecting { attempt, delay } => vec![format!(
                "~ connection dropped, reconnecting in {}s (attempt {})",
                delay.as_secs_f32(),
                attempt
            )],
            FeedUpdate::Reconnected => vec!["~ reconnected".to_string()],
            FeedUpdate::ConnectionLost(error) => {
                vec![format!("! {} -- messages may be stale, /retry to reconnect", error)]
            }
            FeedUpdate::Conversation(_) | FeedUpdate::ScrollToLatest => Vec::new(),
        }
    }

    fn entries(&mut self, entries: &[FeedEntry]) -> Vec<String> {
        let mut lines = Vec::new();
        for entry in entries {
            if !self.shown.insert(entry.id().to_string()) {
                continue;
            }
            if entry.is_pending() {
                self.awaiting.push(entry.message.body.clone());
            } else if self.me.is_me(&entry.message.sender_id) {
                if let Some(pos) = self
                    .awaiting
                    .iter()
                    .position(|b| *b == entry.message.body)
                {
                    self.awaiting.remove(pos);
                    continue;
                }
            }
            lines.push(entry_line(entry, &self.me));
        }
        lines
    }
}
