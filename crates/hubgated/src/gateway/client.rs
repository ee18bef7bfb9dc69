//! MQTT client for the gateway connection.
//!
//! rumqttc drives the network in a background task that forwards connection
//! acknowledgements and publishes through a channel; the session resubscribes
//! whenever it sees a fresh acknowledgement, since the broker does not keep
//! subscriptions across the automatic reconnects.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use rumqttc::TlsConfiguration;
use rumqttc::Transport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use super::GatewayError;
use crate::config::GatewayConfig;

/// Message received from a gateway subscription
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Connection-level event surfaced to the session
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A (re)connection was acknowledged; subscriptions must be re-issued
    Connected,

    /// An inbound publish on a subscribed topic
    Message(GatewayMessage),
}

/// Trait for gateway transport operations
///
/// This trait allows for mocking the MQTT client for testing purposes
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Start the connection machinery
    async fn connect(&mut self) -> Result<(), GatewayError>;

    /// Subscribe to a topic filter
    async fn subscribe(&mut self, topic: &str) -> Result<(), GatewayError>;

    /// Publish a message
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), GatewayError>;

    /// Poll for the next connection event
    ///
    /// Returns None if the client has stopped for good
    async fn poll_event(&mut self) -> Option<GatewayEvent>;
}

/// Real gateway client implementation using rumqttc
pub struct MqttGatewayClient {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Event receiver (created in connect())
    event_rx: Option<mpsc::UnboundedReceiver<GatewayEvent>>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl MqttGatewayClient {
    /// Create a new client from configuration
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client_id = format!("hubgated-{}", config.username);
        let mut mqtt_options = MqttOptions::new(client_id, config.broker.clone(), config.port);

        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_credentials(&config.username, &config.password);

        if config.tls {
            let ca = match &config.ca_file {
                Some(path) => std::fs::read(path)
                    .map_err(|e| GatewayError::Ca(path.clone(), e))?,
                None => Vec::new(),
            };
            mqtt_options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }

        Ok(Self {
            mqtt_options,
            client: None,
            event_rx: None,
            event_loop_task: None,
        })
    }
}

#[async_trait]
impl GatewayClient for MqttGatewayClient {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // rumqttc reconnects by itself on the next poll; surfacing the
        // ConnAck lets the session re-subscribe each time.
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if event_tx.send(GatewayEvent::Connected).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = GatewayMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                        };
                        if event_tx.send(GatewayEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {
                        // Ignore other events (suback, puback, etc.)
                    }
                    Err(e) => {
                        warn!("gateway connection lost, reconnecting in 5 seconds: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
            info!("gateway event loop task exiting");
        });

        self.client = Some(client);
        self.event_rx = Some(event_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), GatewayError> {
        let client = self.client.as_ref().ok_or(GatewayError::NotConnected)?;
        client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), GatewayError> {
        let client = self.client.as_ref().ok_or(GatewayError::NotConnected)?;
        client.publish(topic, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<GatewayEvent> {
        match &mut self.event_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for MqttGatewayClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

/// Mock gateway client for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockGatewayClient {
    pub events: std::collections::VecDeque<GatewayEvent>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub is_connected: bool,
}

#[cfg(test)]
#[async_trait]
impl GatewayClient for MockGatewayClient {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        self.is_connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), GatewayError> {
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), GatewayError> {
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<GatewayEvent> {
        self.events.pop_front()
    }
}
