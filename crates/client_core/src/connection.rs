use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use shared::protocol::{ClientFrame, ClientRequest, SendAck, ServerEvent, ServerFrame};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{broadcast, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{info, warn};

pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1500);

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What the session controller observes from the persistent channel: a
/// connectivity flip or a passed-through server event.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    ConnectError,
    Server(ServerEvent),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("persistent channel is not connected")]
    NotConnected,
    #[error("acknowledgement timed out after {0:?}")]
    AckTimeout(Duration),
    #[error("persistent channel closed while waiting for acknowledgement")]
    Closed,
    #[error("persistent channel send failed: {0}")]
    Send(String),
}

/// The persistent bidirectional channel. The transport owns reconnection;
/// callers only observe the flag and the event stream, and connect failures
/// are never surfaced as errors to them.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Establish the session. Returns once the supervising task is running,
    /// not once the socket is up.
    async fn open(&self, auth_token: &str) -> Result<()>;
    /// Tear the session down. Idempotent; nothing survives into the next
    /// session.
    async fn close(&self);
    fn is_connected(&self) -> bool;
    /// Send a request and wait for its acknowledgement, with a
    /// transport-owned timeout.
    async fn send_with_ack(&self, request: ClientRequest) -> Result<SendAck, TransportError>;
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

pub struct MissingEventTransport {
    events: broadcast::Sender<TransportEvent>,
}

impl MissingEventTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(8);
        Self { events }
    }
}

impl Default for MissingEventTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for MissingEventTransport {
    async fn open(&self, _auth_token: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}

    fn is_connected(&self) -> bool {
        false
    }

    async fn send_with_ack(&self, _request: ClientRequest) -> Result<SendAck, TransportError> {
        Err(TransportError::NotConnected)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

struct WsShared {
    connected: AtomicBool,
    writer: Mutex<Option<WsSink>>,
    pending_acks: Mutex<HashMap<u64, oneshot::Sender<SendAck>>>,
    events: broadcast::Sender<TransportEvent>,
}

impl WsShared {
    /// Lock order is writer before pending_acks everywhere both are held.
    async fn drop_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
        // Dropping the senders resolves every waiter with a channel error,
        // which send_with_ack reports as Closed.
        self.pending_acks.lock().await.clear();
    }
}

/// Websocket implementation of [`EventTransport`]. A supervising task keeps
/// reconnecting with a fixed delay until `close` is called.
pub struct WsTransport {
    ws_url: String,
    ack_timeout: Duration,
    reconnect_delay: Duration,
    next_request_id: AtomicU64,
    shared: Arc<WsShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    pub fn new(server_url: &str) -> Result<Self> {
        let ws_url = websocket_url(server_url)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            ws_url,
            ack_timeout: ACK_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
            next_request_id: AtomicU64::new(1),
            shared: Arc::new(WsShared {
                connected: AtomicBool::new(false),
                writer: Mutex::new(None),
                pending_acks: Mutex::new(HashMap::new()),
                events,
            }),
            supervisor: Mutex::new(None),
        })
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }
}

pub(crate) fn websocket_url(server_url: &str) -> Result<String> {
    let base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        bail!("server url must start with http:// or https://");
    };
    Ok(format!("{}/ws", base.trim_end_matches('/')))
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn open(&self, auth_token: &str) -> Result<()> {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() {
            return Ok(());
        }
        let url = format!("{}?token={}", self.ws_url, auth_token);
        let shared = Arc::clone(&self.shared);
        let reconnect_delay = self.reconnect_delay;
        *supervisor = Some(tokio::spawn(async move {
            run_connection_loop(shared, url, reconnect_delay).await;
        }));
        Ok(())
    }

    async fn close(&self) {
        if let Some(task) = self.supervisor.lock().await.take() {
            task.abort();
        }
        self.shared.drop_session().await;
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn send_with_ack(&self, request: ClientRequest) -> Result<SendAck, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = ClientFrame {
            request_id,
            request,
        };
        let text =
            serde_json::to_string(&frame).map_err(|err| TransportError::Send(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending_acks.lock().await.insert(request_id, tx);

        let send_result = {
            let mut writer = self.shared.writer.lock().await;
            match writer.as_mut() {
                Some(sink) => sink
                    .send(WsMessage::Text(text))
                    .await
                    .map_err(|err| TransportError::Send(err.to_string())),
                None => Err(TransportError::NotConnected),
            }
        };
        if let Err(err) = send_result {
            self.shared.pending_acks.lock().await.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.shared.pending_acks.lock().await.remove(&request_id);
                Err(TransportError::AckTimeout(self.ack_timeout))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }
}

async fn run_connection_loop(shared: Arc<WsShared>, url: String, reconnect_delay: Duration) {
    loop {
        match connect_async(&url).await {
            Ok((stream, _)) => {
                let (sink, mut reader) = stream.split();
                *shared.writer.lock().await = Some(sink);
                shared.connected.store(true, Ordering::SeqCst);
                let _ = shared.events.send(TransportEvent::Connected);
                info!("persistent channel connected");

                while let Some(frame) = reader.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => {
                            match serde_json::from_str::<ServerFrame>(&text) {
                                Ok(ServerFrame::Ack { request_id, ack }) => {
                                    let waiter =
                                        shared.pending_acks.lock().await.remove(&request_id);
                                    match waiter {
                                        Some(tx) => {
                                            let _ = tx.send(ack);
                                        }
                                        None => {
                                            warn!(
                                                request_id,
                                                "acknowledgement for unknown request"
                                            );
                                        }
                                    }
                                }
                                Ok(ServerFrame::Event { event }) => {
                                    let _ = shared.events.send(TransportEvent::Server(event));
                                }
                                Err(err) => {
                                    warn!("dropping malformed server frame: {err}");
                                }
                            }
                        }
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!("persistent channel receive failed: {err}");
                            break;
                        }
                    }
                }

                shared.drop_session().await;
                let _ = shared.events.send(TransportEvent::Disconnected);
                info!("persistent channel disconnected");
            }
            Err(err) => {
                shared.connected.store(false, Ordering::SeqCst);
                let _ = shared.events.send(TransportEvent::ConnectError);
                warn!("persistent channel connect failed: {err}");
            }
        }

        tokio::time::sleep(reconnect_delay).await;
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
