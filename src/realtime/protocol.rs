//! Phoenix channel frames (serializer vsn 1.0.0)
//!
//! Every frame is a JSON object `{topic, event, payload, ref}`. Database
//! changes arrive as `postgres_changes` events on the joined topic.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::feed::ChangeEvent;
use crate::models::Message;

pub const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// A frame as the subscription pump sees it
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply {
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    Change(ChangeEvent),
    /// The server closed or errored the channel
    Closed(String),
    Other,
}

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    status: String,
    #[serde(default)]
    response: Value,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type", alias = "eventType")]
    kind: String,
    #[serde(alias = "new", default)]
    record: Option<Value>,
}

/// Channel topic for one conversation's messages.
pub fn topic_for(conversation_id: &str) -> String {
    format!("realtime:messages:{}", conversation_id)
}

pub fn join(
    topic: &str,
    table: &str,
    conversation_id: &str,
    access_token: &str,
    reference: &str,
) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": table,
                    "filter": format!("conversation_id=eq.{}", conversation_id),
                }],
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat(reference: &str) -> Frame {
    Frame {
        topic: PHOENIX_TOPIC.to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

pub fn leave(topic: &str, reference: &str) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

pub fn parse(text: &str) -> Result<Frame> {
    serde_json::from_str(text).context("Invalid realtime frame")
}

impl Frame {
    pub fn classify(self) -> Result<Inbound> {
        match self.event.as_str() {
            "phx_reply" => {
                let reply: ReplyPayload =
                    serde_json::from_value(self.payload).context("Invalid phx_reply payload")?;
                Ok(Inbound::Reply {
                    reference: self.reference,
                    ok: reply.status == "ok",
                    response: reply.response,
                })
            }
            "phx_close" | "phx_error" => Ok(Inbound::Closed(self.event)),
            "postgres_changes" => {
                let change: ChangePayload = serde_json::from_value(self.payload)
                    .context("Invalid postgres_changes payload")?;
                let record = match change.data.record {
                    Some(record) if !record.is_null() => record,
                    _ => return Ok(Inbound::Other),
                };
                let parse = |record: Value| -> Result<Message> {
                    serde_json::from_value(record).context("Invalid message record")
                };
                match change.data.kind.as_str() {
                    "INSERT" => Ok(Inbound::Change(ChangeEvent::Insert(parse(record)?))),
                    "UPDATE" => Ok(Inbound::Change(ChangeEvent::Update(parse(record)?))),
                    _ => Ok(Inbound::Other),
                }
            }
            _ => Ok(Inbound::Other),
        }
    }
}

/// Monotonic message references
#[derive(Debug, Default)]
pub struct Refs(u64);

impl Refs {
    pub fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}
