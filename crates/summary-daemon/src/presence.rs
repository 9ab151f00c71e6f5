//! WebSocket presence transport.
//!
//! Connects to the presence hub, including:
//! - A read task forwarding parsed envelopes to the session's inbox
//! - Channel subscribe/unsubscribe control frames
//! - Redialing with exponential backoff after the socket drops

use crate::message::{parse_envelope, ControlMessage, MAX_MESSAGE_SIZE};
use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use crate::config::ReconnectSettings;
use std::sync::Arc;
use summary_core::presence;
use summary_core::{PresenceEnvelope, PresenceError, PresenceEvent, PresenceTransport};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// The daemon's link to the presence hub: dials it and, after a failed
/// dial or a dropped socket, schedules the next attempt with exponential
/// backoff.
#[derive(Debug)]
pub struct HubLink {
    url: String,
    settings: ReconnectSettings,
    /// Consecutive failures since the last successful join
    failures: u32,
    retry_at: Option<Instant>,
}

impl HubLink {
    pub fn new(url: impl Into<String>, settings: ReconnectSettings) -> Self {
        Self {
            url: url.into(),
            settings,
            failures: 0,
            retry_at: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// When to dial again, if a retry is scheduled.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Connect to the hub. A failure is logged and schedules a retry.
    pub async fn dial(&mut self, inbox: mpsc::UnboundedSender<PresenceEvent>) -> Option<WsPresence> {
        self.retry_at = None;
        match WsPresence::connect(&self.url, inbox).await {
            Ok(presence) => Some(presence),
            Err(e) => {
                warn!("Failed to connect to presence hub {}: {}", self.url, e);
                self.lost(Instant::now());
                None
            }
        }
    }

    /// The session joined its channel over the new connection.
    pub fn established(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    /// The connection failed or dropped. Schedules the next dial and
    /// returns false once `max_attempts` retries have been used up.
    pub fn lost(&mut self, now: Instant) -> bool {
        if self
            .settings
            .max_attempts
            .is_some_and(|max| self.failures >= max)
        {
            warn!(
                "Giving up on presence hub {} after {} attempts",
                self.url, self.failures
            );
            self.retry_at = None;
            return false;
        }
        self.failures += 1;
        let delay = self.settings.delay_before(self.failures);
        self.retry_at = Some(now + delay);
        info!(
            "Reconnecting to presence hub in {:?} (attempt {})",
            delay, self.failures
        );
        true
    }
}

/// WebSocket connection to the presence hub.
pub struct WsPresence {
    write: Arc<Mutex<WsSink>>,
    read_task: Option<JoinHandle<()>>,
}

impl WsPresence {
    /// Connect to the hub at `url`.
    ///
    /// Envelopes received on joined channels are forwarded to `inbox`,
    /// followed by `PresenceEvent::Closed` when the socket ends.
    pub async fn connect(url: &str, inbox: mpsc::UnboundedSender<PresenceEvent>) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (write, read) = ws_stream.split();

        let read_url = url.to_string();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_url, read, inbox).await;
        });

        info!("Connected to presence hub at {}", url);
        Ok(Self {
            write: Arc::new(Mutex::new(write)),
            read_task: Some(read_task),
        })
    }

    /// Read loop that forwards envelopes to the inbox.
    async fn read_loop(
        url: String,
        mut read: WsSource,
        inbox: mpsc::UnboundedSender<PresenceEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let text = match msg {
                        Message::Text(text) => text.to_string(),
                        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                debug!("Dropping non-UTF-8 frame from {}", url);
                                continue;
                            }
                        },
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", url);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    if text.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Frame from {} exceeds max size ({} > {}), dropping",
                            url,
                            text.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    match parse_envelope(&text) {
                        Some(envelope) => {
                            if inbox.send(PresenceEvent::Message(envelope)).is_err() {
                                // Session gone
                                return;
                            }
                        }
                        None => debug!("Ignoring unrecognized frame from {}", url),
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection to {} closed", url);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", url, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection to {} ended", url);
                    break;
                }
            }
        }

        let _ = inbox.send(PresenceEvent::Closed);
    }

    async fn send_text(&self, text: String) -> presence::Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| PresenceError::SendFailed(e.to_string()))
    }

}

#[async_trait]
impl PresenceTransport for WsPresence {
    async fn join(&self, channel: &str) -> presence::Result<()> {
        self.send_text(ControlMessage::subscribe(channel).to_text())
            .await
    }

    async fn leave(&self, channel: &str) -> presence::Result<()> {
        self.send_text(ControlMessage::unsubscribe(channel).to_text())
            .await
    }

    async fn publish(&self, envelope: &PresenceEnvelope) -> presence::Result<()> {
        self.send_text(envelope.to_json()?).await
    }
}

impl Drop for WsPresence {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
