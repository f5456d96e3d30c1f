//! Realtime change feed over the backend's Phoenix channel socket
//!
//! Each subscription owns one WebSocket joined to one conversation topic.
//! A pump task forwards database changes to the subscriber and keeps the
//! socket alive with heartbeats until either side goes away.

pub mod protocol;
pub mod socket;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use crate::api::BackendClient;
use crate::feed::{ChangeFeed, Subscription};
use protocol::{Inbound, Refs};
use socket::RealtimeSocket;

const EVENT_BUFFER: usize = 256;

pub struct RealtimeClient {
    socket_url: String,
    access_token: String,
    messages_table: String,
    join_timeout: Duration,
    heartbeat_interval: Duration,
}

impl RealtimeClient {
    pub fn new(
        backend_url: &str,
        api_key: &str,
        access_token: &str,
        messages_table: &str,
    ) -> Result<Self> {
        Ok(Self {
            socket_url: socket_url(backend_url, api_key)?,
            access_token: access_token.to_string(),
            messages_table: messages_table.to_string(),
            join_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        })
    }

    /// Realtime client for the user signed in on `client`.
    pub fn for_client(client: &BackendClient) -> Result<Self> {
        Self::new(
            client.base_url(),
            client.api_key(),
            client.access_token(),
            &client.tables().messages,
        )
    }
}

/// WebSocket endpoint for a backend: same host, ws scheme.
fn socket_url(backend_url: &str, api_key: &str) -> Result<String> {
    let mut url = url::Url::parse(backend_url)
        .with_context(|| format!("Invalid backend URL {}", backend_url))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => bail!("Unsupported backend URL scheme '{}'", other),
    };
    // Infallible between these special schemes.
    let _ = url.set_scheme(scheme);
    url.set_path(&format!(
        "{}/realtime/v1/websocket",
        url.path().trim_end_matches('/')
    ));
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", "1.0.0");
    Ok(url.to_string())
}

#[async_trait]
impl ChangeFeed for RealtimeClient {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription> {
        let mut socket = RealtimeSocket::connect(&self.socket_url).await?;
        let topic = protocol::topic_for(conversation_id);
        let mut refs = Refs::default();

        let join_ref = refs.next();
        socket
            .send_frame(&protocol::join(
                &topic,
                &self.messages_table,
                conversation_id,
                &self.access_token,
                &join_ref,
            ))
            .await?;

        time::timeout(self.join_timeout, wait_for_join(&mut socket, &topic, &join_ref))
            .await
            .with_context(|| format!("Timed out joining {}", topic))??;
        tracing::info!("Joined {}", topic);

        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let (teardown, teardown_rx) = oneshot::channel();
        tokio::spawn(pump(
            socket,
            topic,
            refs,
            events,
            teardown_rx,
            self.heartbeat_interval,
        ));

        Ok(Subscription::new(rx, Some(teardown)))
    }
}

async fn wait_for_join(socket: &mut RealtimeSocket, topic: &str, join_ref: &str) -> Result<()> {
    loop {
        let frame = socket
            .recv_frame()
            .await?
            .context("Socket closed before the join was acknowledged")?;
        if frame.topic != topic {
            continue;
        }
        match frame.classify()? {
            Inbound::Reply {
                reference,
                ok,
                response,
            } if reference.as_deref() == Some(join_ref) => {
                if ok {
                    return Ok(());
                }
                bail!("Join of {} rejected: {}", topic, response);
            }
            Inbound::Closed(event) => bail!("Channel {} closed during join ({})", topic, event),
            _ => {}
        }
    }
}

/// Forward changes until the socket or the subscriber goes away.
async fn pump(
    mut socket: RealtimeSocket,
    topic: String,
    mut refs: Refs,
    events: mpsc::Sender<crate::feed::ChangeEvent>,
    mut teardown: oneshot::Receiver<()>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = time::interval(heartbeat_interval);
    heartbeat.tick().await; // skip first immediate tick

    let reason = loop {
        tokio::select! {
            frame = socket.recv_frame() => {
                let frame = match frame {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break "socket closed by server".to_string(),
                    Err(e) => break format!("{:#}", e),
                };
                if frame.topic != topic && frame.topic != protocol::PHOENIX_TOPIC {
                    continue;
                }
                match frame.classify() {
                    Ok(Inbound::Change(event)) => {
                        if events.send(event).await.is_err() {
                            break "subscriber gone".to_string();
                        }
                    }
                    Ok(Inbound::Closed(event)) => break format!("server sent {}", event),
                    Ok(Inbound::Reply { ok: false, response, .. }) => {
                        tracing::warn!("Realtime error reply on {}: {}", topic, response);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Skipping frame on {}: {:#}", topic, e),
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = socket.send_frame(&protocol::heartbeat(&refs.next())).await {
                    break format!("heartbeat failed: {:#}", e);
                }
            }
            _ = &mut teardown => {
                if let Err(e) = socket.send_frame(&protocol::leave(&topic, &refs.next())).await {
                    tracing::debug!("Leave of {} failed: {:#}", topic, e);
                }
                socket.close().await;
                break "unsubscribed".to_string();
            }
        }
    };

    tracing::info!("Realtime channel {} ended: {}", topic, reason);
}
