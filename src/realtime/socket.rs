//! Websocket transport for realtime events
//!
//! Frames are JSON text `{ "event": <name>, "data": <payload> }` in both
//! directions. The reader task owns the receiving half and reconnects after
//! the socket drops, re-joining the last joined room.

use crate::config::RealtimeConfig;
use crate::realtime::{RealtimeChannel, RealtimeError};
use crate::whatsapp::events::RealtimeEvent;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest_websocket::{Message as WsMessage, RequestBuilderExt, WebSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

const JOIN_ROOM: &str = "join-room";
const LEAVE_ROOM: &str = "leave-room";

fn encode_frame(event: &str, number_id: &str) -> String {
    serde_json::json!({ "event": event, "data": number_id }).to_string()
}

struct Shared {
    config: RealtimeConfig,
    client: reqwest::Client,
    auth_token: Option<String>,
    sink: tokio::sync::Mutex<Option<SplitSink<WebSocket, WsMessage>>>,
    room: Mutex<Option<String>>,
    closing: AtomicBool,
}

impl Shared {
    async fn open(&self) -> Result<SplitStream<WebSocket>, RealtimeError> {
        tracing::debug!("Connecting to realtime socket: {}", self.config.url);

        let mut request = self.client.get(&self.config.url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .upgrade()
            .send()
            .await
            .map_err(|e| RealtimeError::Connect(format!("Upgrade request failed: {}", e)))?;

        let ws = response
            .into_websocket()
            .await
            .map_err(|e| RealtimeError::Connect(format!("WebSocket handshake failed: {}", e)))?;

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        tracing::info!("Realtime socket connected");
        Ok(stream)
    }

    async fn send_frame(&self, event: &str, number_id: &str) -> Result<(), RealtimeError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(RealtimeError::Closed)?;
        sink.send(WsMessage::Text(encode_frame(event, number_id).into()))
            .await
            .map_err(|e| RealtimeError::Send(e.to_string()))
    }

    async fn rejoin(&self) {
        let room = self.room.lock().clone();
        if let Some(room) = room {
            match self.send_frame(JOIN_ROOM, &room).await {
                Ok(()) => tracing::info!("Re-joined room {}", room),
                Err(e) => tracing::warn!("Failed to re-join room {}: {}", room, e),
            }
        }
    }

    /// Forward frames until the socket drops. Returns `false` once nobody
    /// listens for events anymore.
    async fn pump<T>(&self, mut stream: SplitStream<WebSocket>, events: &UnboundedSender<T>) -> bool
    where
        T: From<RealtimeEvent>,
    {
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Realtime socket error: {}", e);
                    break;
                }
            };

            match message {
                WsMessage::Text(text) => match RealtimeEvent::from_frame(&text) {
                    Ok(Some(event)) => {
                        tracing::debug!("Realtime event: {}", event.name());
                        if events.send(T::from(event)).is_err() {
                            return false;
                        }
                    }
                    Ok(None) => tracing::debug!("Ignoring realtime frame: {}", text),
                    Err(e) => tracing::warn!("{}", RealtimeError::Frame(e.to_string())),
                },
                WsMessage::Close { .. } => {
                    tracing::info!("Realtime socket closed by server");
                    break;
                }
                _ => {}
            }
        }
        true
    }

    async fn run<T>(self: Arc<Self>, events: UnboundedSender<T>)
    where
        T: From<RealtimeEvent>,
    {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);

        while !self.closing.load(Ordering::SeqCst) && !events.is_closed() {
            let stream = match self.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("{}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            self.rejoin().await;

            if !self.pump(stream, &events).await {
                break;
            }
            *self.sink.lock().await = None;

            if self.closing.load(Ordering::SeqCst) {
                break;
            }
            tracing::info!("Realtime socket dropped, reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }

        *self.sink.lock().await = None;
        tracing::info!("Realtime reader stopped");
    }
}

/// Realtime channel over a reconnecting websocket
#[derive(Clone)]
pub struct SocketChannel {
    shared: Arc<Shared>,
}

impl SocketChannel {
    /// Start the reader task. The socket connects in the background; rooms
    /// joined before it is up are joined as soon as it connects.
    pub fn spawn<T>(
        config: &RealtimeConfig,
        auth_token: Option<String>,
        events: UnboundedSender<T>,
    ) -> Result<(Self, JoinHandle<()>), RealtimeError>
    where
        T: From<RealtimeEvent> + Send + 'static,
    {
        let client = reqwest::Client::builder()
            .user_agent(concat!("whatsapp-dashboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RealtimeError::Connect(format!("Failed to build client: {}", e)))?;

        let shared = Arc::new(Shared {
            config: config.clone(),
            client,
            auth_token,
            sink: tokio::sync::Mutex::new(None),
            room: Mutex::new(None),
            closing: AtomicBool::new(false),
        });

        let task = tokio::spawn(shared.clone().run(events));
        Ok((Self { shared }, task))
    }

    pub fn current_room(&self) -> Option<String> {
        self.shared.room.lock().clone()
    }

    /// Close the socket and stop reconnecting
    pub async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!("Error closing realtime socket: {}", e);
            }
        }
    }
}

#[async_trait]
impl RealtimeChannel for SocketChannel {
    async fn join_room(&self, number_id: &str) -> Result<(), RealtimeError> {
        *self.shared.room.lock() = Some(number_id.to_string());
        match self.shared.send_frame(JOIN_ROOM, number_id).await {
            Ok(()) => {
                tracing::info!("Joined room {}", number_id);
                Ok(())
            }
            Err(RealtimeError::Closed) => {
                tracing::debug!("Socket not connected, {} is joined on connect", number_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn leave_room(&self, number_id: &str) -> Result<(), RealtimeError> {
        {
            let mut room = self.shared.room.lock();
            if room.as_deref() == Some(number_id) {
                *room = None;
            }
        }
        match self.shared.send_frame(LEAVE_ROOM, number_id).await {
            Ok(()) => {
                tracing::info!("Left room {}", number_id);
                Ok(())
            }
            // nothing to leave on a dead socket
            Err(RealtimeError::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
