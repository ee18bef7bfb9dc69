//! WebSocket client for the hub's event API.
//!
//! The `HubApi` trait is the seam the session is written against, with the
//! real `WsHubClient` on one side and a mock on the other. The real client
//! performs the token handshake, then moves the read half of the socket into
//! a background task that feeds parsed events through a channel; `next_event`
//! returning `None` means the connection is gone and the caller owns the
//! reconnect.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::HubError;
use crate::config::HubConfig;
use crate::translate::HubEvent;
use crate::translate::ServiceCall;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Hub transport operations the session depends on.
#[async_trait]
pub trait HubApi: Send + Sync {
    /// Establish the connection and authenticate. An authentication
    /// rejection is terminal and must not be retried by callers.
    async fn connect(&mut self) -> Result<(), HubError>;

    /// Subscribe to state-change events. Must be re-issued after every
    /// reconnect.
    async fn subscribe_events(&mut self) -> Result<(), HubError>;

    /// Next state-change event; `None` once the connection is lost.
    async fn next_event(&mut self) -> Option<HubEvent>;

    /// Invoke a hub service.
    async fn call_service(&mut self, call: &ServiceCall) -> Result<(), HubError>;
}

/// Suppresses identical service calls repeated within a cooldown window.
///
/// The key is a hash of the call's arguments; a collision only suppresses an
/// unrelated call for the length of the window, which is acceptable.
pub struct CallGuard {
    cooldown: Duration,
    recent: HashMap<u64, Instant>,
}

impl CallGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            recent: HashMap::new(),
        }
    }

    /// Err with `TooRecent` when the identical call is still inside the
    /// window; otherwise records the call and lets it pass.
    pub fn check(&mut self, call: &ServiceCall) -> Result<(), HubError> {
        let key = Self::key(call);
        let now = Instant::now();
        self.recent.retain(|_, at| now.duration_since(*at) < self.cooldown);

        if self.recent.contains_key(&key) {
            return Err(HubError::TooRecent {
                domain: call.domain.clone(),
                service: call.service.clone(),
            });
        }
        self.recent.insert(key, now);
        Ok(())
    }

    fn key(call: &ServiceCall) -> u64 {
        use std::hash::Hash;
        use std::hash::Hasher;

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        call.domain.hash(&mut hasher);
        call.service.hash(&mut hasher);
        call.target.entity_id.hash(&mut hasher);
        if let Some(data) = &call.service_data {
            data.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Real hub client speaking the WebSocket event protocol.
pub struct WsHubClient {
    config: HubConfig,
    guard: CallGuard,

    /// Write half of the socket (present once connected)
    writer: Option<WsWriter>,

    /// Parsed events from the background read task
    event_rx: Option<mpsc::UnboundedReceiver<HubEvent>>,

    /// Background read task handle
    read_task: Option<JoinHandle<()>>,

    /// Monotonic message id required by the hub protocol
    next_id: u64,
}

impl WsHubClient {
    pub fn new(config: &HubConfig) -> Self {
        let guard = CallGuard::new(Duration::from_secs(config.command_cooldown_secs));
        Self {
            config: config.clone(),
            guard,
            writer: None,
            event_rx: None,
            read_task: None,
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn send_json(&mut self, message: serde_json::Value) -> Result<(), HubError> {
        let writer = self.writer.as_mut().ok_or(HubError::NotConnected)?;
        writer.send(Message::Text(message.to_string())).await?;
        Ok(())
    }

    /// Parse one socket frame into a state-change event, if it is one.
    fn parse_event(text: &str) -> Option<HubEvent> {
        let json: serde_json::Value = match serde_json::from_str(text) {
            Ok(json) => json,
            Err(e) => {
                warn!("bad message; skip: {}", e);
                return None;
            }
        };
        if json["type"] != "event" {
            trace!("ignoring hub frame type {}", json["type"]);
            return None;
        }

        let event = &json["event"];
        let kind = event["event_type"].as_str().unwrap_or_default().to_string();
        let data = &event["data"];

        // A removed entity has no new_state; there is nothing to translate.
        let new_state = data.get("new_state")?.as_object()?;
        let entity_id = new_state.get("entity_id")?.as_str()?.to_string();

        Some(HubEvent {
            kind,
            entity_id,
            old_state: data["old_state"]["state"].as_str().map(str::to_string),
            new_state: new_state
                .get("state")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            attributes: new_state
                .get("attributes")
                .and_then(serde_json::Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl HubApi for WsHubClient {
    async fn connect(&mut self) -> Result<(), HubError> {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        self.writer = None;
        self.event_rx = None;

        let url = self.config.websocket_url();
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| HubError::Connection(e.to_string()))?;
        let (mut writer, mut reader) = stream.split();

        // Handshake: auth_required -> auth -> auth_ok | auth_invalid
        let greeting = reader
            .next()
            .await
            .ok_or_else(|| HubError::Connection("closed during handshake".to_string()))??;
        let greeting: serde_json::Value = serde_json::from_str(greeting.to_text()?)?;
        if greeting["type"] != "auth_required" {
            return Err(HubError::Protocol(greeting.to_string()));
        }

        let auth = serde_json::json!({
            "type": "auth",
            "access_token": self.config.token,
        });
        writer.send(Message::Text(auth.to_string())).await?;

        let verdict = reader
            .next()
            .await
            .ok_or_else(|| HubError::Connection("closed during handshake".to_string()))??;
        let verdict: serde_json::Value = serde_json::from_str(verdict.to_text()?)?;
        match verdict["type"].as_str() {
            Some("auth_ok") => {}
            Some("auth_invalid") => return Err(HubError::AuthenticationFailed),
            _ => return Err(HubError::Protocol(verdict.to_string())),
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("hub socket error: {}", e);
                        break;
                    }
                };
                match frame {
                    Message::Text(text) => {
                        if let Some(event) = WsHubClient::parse_event(&text) {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            debug!("hub read task exiting");
        });

        self.writer = Some(writer);
        self.event_rx = Some(event_rx);
        self.read_task = Some(task);

        Ok(())
    }

    async fn subscribe_events(&mut self) -> Result<(), HubError> {
        let id = self.next_id();
        self.send_json(serde_json::json!({
            "id": id,
            "type": "subscribe_events",
            "event_type": "state_changed",
        }))
        .await
    }

    async fn next_event(&mut self) -> Option<HubEvent> {
        match &mut self.event_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn call_service(&mut self, call: &ServiceCall) -> Result<(), HubError> {
        self.guard.check(call)?;

        let id = self.next_id();
        let mut message = serde_json::to_value(call)?;
        message["id"] = serde_json::json!(id);
        message["type"] = serde_json::json!("call_service");
        self.send_json(message).await
    }
}

impl Drop for WsHubClient {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

/// Mock hub for exercising the session without a socket.
#[cfg(test)]
#[derive(Default)]
pub struct MockHubApi {
    pub events: std::collections::VecDeque<HubEvent>,
    pub calls: Vec<ServiceCall>,
    pub connected: bool,
    pub subscriptions: usize,
}

#[cfg(test)]
#[async_trait]
impl HubApi for MockHubApi {
    async fn connect(&mut self) -> Result<(), HubError> {
        self.connected = true;
        Ok(())
    }

    async fn subscribe_events(&mut self) -> Result<(), HubError> {
        self.subscriptions += 1;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<HubEvent> {
        self.events.pop_front()
    }

    async fn call_service(&mut self, call: &ServiceCall) -> Result<(), HubError> {
        self.calls.push(call.clone());
        Ok(())
    }
}
