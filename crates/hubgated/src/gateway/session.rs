//! Gateway session: inbound message dispatch and the gateway-bound queue
//! consumer.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::GatewayClient;
use super::client::GatewayEvent;
use super::client::GatewayMessage;
use super::Topics;
use crate::catalog::CategoryCatalog;
use crate::config::EndpointStore;
use crate::config::GatewayConfig;
use crate::device::DeviceRegistry;
use crate::queue::GatewayJob;
use crate::queue::GatewayRx;
use crate::queue::GatewayTx;
use crate::queue::HubTx;
use crate::translate;
use crate::translate::CommandPayload;

/// Status request body: ids to report, empty meaning everything enabled.
#[derive(Debug, Deserialize)]
struct StatusRequest {
    #[serde(default)]
    devices: Vec<String>,
}

/// Broadcast reconfiguration body.
#[derive(Debug, Deserialize)]
struct BroadcastConfig {
    #[serde(default)]
    http_api_endpoint: String,
}

pub struct GatewaySession<C: GatewayClient> {
    client: Arc<Mutex<C>>,
    registry: Arc<DeviceRegistry>,
    catalog: Arc<CategoryCatalog>,
    topics: Topics,
    endpoint: Arc<EndpointStore>,
    gateway_tx: GatewayTx,
    hub_tx: HubTx,
}

impl<C: GatewayClient> GatewaySession<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: C,
        config: &GatewayConfig,
        registry: Arc<DeviceRegistry>,
        catalog: Arc<CategoryCatalog>,
        endpoint: Arc<EndpointStore>,
        gateway_tx: GatewayTx,
        hub_tx: HubTx,
    ) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            registry,
            catalog,
            topics: Topics::new(&config.topic_prefix, &config.username),
            endpoint,
            gateway_tx,
            hub_tx,
        }
    }

    /// Drive the inbound half: start the connection, resubscribe on every
    /// acknowledgement, dispatch messages by topic.
    pub async fn run_listen(&self) {
        {
            let mut client = self.client.lock().await;
            if let Err(e) = client.connect().await {
                warn!("gateway connect failed: {}", e);
                return;
            }
        }

        loop {
            // Short lock hold so the push consumer can publish in between.
            let polled = {
                let mut client = self.client.lock().await;
                tokio::time::timeout(Duration::from_millis(100), client.poll_event()).await
            };
            match polled {
                Ok(Some(GatewayEvent::Connected)) => {
                    info!("gateway session connected, subscribing");
                    let mut client = self.client.lock().await;
                    for topic in [self.topics.down_wildcard(), self.topics.broadcast_config()] {
                        if let Err(e) = client.subscribe(&topic).await {
                            warn!("gateway subscribe to {} failed: {}", topic, e);
                        }
                    }
                }
                Ok(Some(GatewayEvent::Message(msg))) => self.dispatch(&msg),
                Ok(None) => {
                    warn!("gateway client stopped");
                    return;
                }
                Err(_) => tokio::task::yield_now().await,
            }
        }
    }

    /// Route one inbound message by topic.
    fn dispatch(&self, msg: &GatewayMessage) {
        let topic = msg.topic.as_str();
        if topic == self.topics.commands() {
            self.on_commands(&msg.payload);
        } else if topic == self.topics.status_request() {
            self.on_status_request(&msg.payload);
        } else if topic == self.topics.config_request() {
            info!("gateway requested a config push");
            if self.gateway_tx.send(GatewayJob::Config).is_err() {
                warn!("gateway queue closed");
            }
        } else if topic == self.topics.errors() {
            info!(
                "gateway reported an error: {}",
                String::from_utf8_lossy(&msg.payload)
            );
        } else if topic == self.topics.broadcast_config() {
            self.on_broadcast_config(&msg.payload);
        } else {
            debug!("unhandled gateway message on {}", topic);
        }
    }

    /// Apply a command document: registry mutation plus a hub-bound job per
    /// addressed device. One bad device never blocks the rest.
    fn on_commands(&self, payload: &[u8]) {
        let payload: CommandPayload = match serde_json::from_slice(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("bad command payload; skip: {}", e);
                return;
            }
        };
        info!("gateway command for {} device(s)", payload.devices.len());

        for (entity_id, command) in &payload.devices {
            if let Some(entity_id) =
                translate::apply_command(&self.registry, entity_id, &command.states)
            {
                if self.hub_tx.send(entity_id).is_err() {
                    warn!("hub queue closed");
                }
            }
        }
    }

    fn on_status_request(&self, payload: &[u8]) {
        let request: StatusRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("bad status request; skip: {}", e);
                return;
            }
        };
        info!("gateway requested status for {:?}", request.devices);
        if self
            .gateway_tx
            .send(GatewayJob::Status(request.devices))
            .is_err()
        {
            warn!("gateway queue closed");
        }
    }

    fn on_broadcast_config(&self, payload: &[u8]) {
        match serde_json::from_slice::<BroadcastConfig>(payload) {
            Ok(config) => self.endpoint.set(&config.http_api_endpoint),
            Err(e) => warn!("bad broadcast config; skip: {}", e),
        }
    }

    /// Drain the gateway-bound queue, translating each job into a publish.
    ///
    /// A failed publish is logged and the next item proceeds; items simply
    /// accumulate while the broker is unreachable.
    pub async fn run_push(&self, mut gateway_rx: GatewayRx) {
        while let Some(job) = gateway_rx.recv().await {
            let (topic, document) = match &job {
                GatewayJob::Status(entity_ids) => {
                    let payload =
                        translate::status_payload(&self.registry, &self.catalog, entity_ids);
                    (self.topics.up_status(), serde_json::to_vec(&payload))
                }
                GatewayJob::Config => {
                    let payload = translate::config_payload(&self.registry, &self.catalog);
                    (self.topics.up_config(), serde_json::to_vec(&payload))
                }
            };
            let document = match document {
                Ok(document) => document,
                Err(e) => {
                    warn!("failed to serialize gateway document: {}", e);
                    continue;
                }
            };

            debug!("publishing {} bytes to {}", document.len(), topic);
            let mut client = self.client.lock().await;
            if let Err(e) = client.publish(&topic, &document).await {
                warn!("gateway publish to {} failed: {}", topic, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_catalog;
    use crate::device::AttributeKey;
    use crate::device::DevicePatch;
    use crate::gateway::client::MockGatewayClient;
    use crate::queue;

    struct Fixture {
        _dir: tempfile::TempDir,
        session: GatewaySession<MockGatewayClient>,
        gateway_rx: GatewayRx,
        hub_rx: queue::HubRx,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DeviceRegistry::open(dir.path().join("devices.json")));
        registry.update(
            "light.kitchen",
            DevicePatch {
                enabled: Some(true),
                name: Some("Kitchen".to_string()),
                state: Some("on".to_string()),
                attributes: Some(
                    [(AttributeKey::Brightness, serde_json::json!(128))]
                        .into_iter()
                        .collect(),
                ),
                features: Some(["light_brightness".to_string()].into_iter().collect()),
                ..DevicePatch::default()
            },
        );

        let config = GatewayConfig {
            broker: "mqtt.example.com".to_string(),
            port: 8883,
            username: "bridge-1".to_string(),
            password: "hunter2".to_string(),
            endpoint: "https://gate.example.com".to_string(),
            topic_prefix: "gateway/v1".to_string(),
            tls: true,
            ca_file: None,
            heartbeat_secs: 300,
        };
        let (gateway_tx, gateway_rx) = queue::gateway_queue();
        let (hub_tx, hub_rx) = queue::hub_queue();
        let session = GatewaySession::new(
            MockGatewayClient::default(),
            &config,
            registry,
            Arc::new(test_catalog()),
            Arc::new(EndpointStore::new("https://gate.example.com")),
            gateway_tx,
            hub_tx,
        );

        Fixture {
            _dir: dir,
            session,
            gateway_rx,
            hub_rx,
        }
    }

    fn message(topic: &str, payload: serde_json::Value) -> GatewayMessage {
        GatewayMessage {
            topic: topic.to_string(),
            payload: payload.to_string().into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_command_mutates_and_enqueues_hub_job() {
        let mut fx = fixture();

        fx.session.dispatch(&message(
            "gateway/v1/bridge-1/down/commands",
            serde_json::json!({
                "devices": {
                    "light.kitchen": {
                        "states": [{"key": "on_off", "value": {"type": "BOOL", "bool_value": false}}]
                    }
                }
            }),
        ));

        assert_eq!(fx.hub_rx.recv().await, Some("light.kitchen".to_string()));
        assert_eq!(
            fx.session.registry.get("light.kitchen").unwrap().state,
            "off"
        );
    }

    #[tokio::test]
    async fn test_command_for_unknown_device_is_skipped() {
        let mut fx = fixture();

        fx.session.dispatch(&message(
            "gateway/v1/bridge-1/down/commands",
            serde_json::json!({
                "devices": {
                    "light.ghost": {
                        "states": [{"key": "on_off", "value": {"type": "BOOL", "bool_value": true}}]
                    }
                }
            }),
        ));

        assert!(fx.hub_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_request_enqueues_status_job() {
        let mut fx = fixture();

        fx.session.dispatch(&message(
            "gateway/v1/bridge-1/down/status_request",
            serde_json::json!({"devices": ["light.kitchen"]}),
        ));

        assert_eq!(
            fx.gateway_rx.recv().await,
            Some(GatewayJob::Status(vec!["light.kitchen".to_string()]))
        );
    }

    #[tokio::test]
    async fn test_broadcast_config_updates_endpoint() {
        let fx = fixture();

        fx.session.dispatch(&message(
            "gateway/v1/__config",
            serde_json::json!({"http_api_endpoint": "https://gate2.example.com"}),
        ));

        assert_eq!(
            fx.session.endpoint.current(),
            "https://gate2.example.com"
        );
    }

    #[tokio::test]
    async fn test_push_publishes_status_document() {
        let fx = fixture();
        let (gateway_tx, gateway_rx) = queue::gateway_queue();
        gateway_tx
            .send(GatewayJob::Status(vec!["light.kitchen".to_string()]))
            .unwrap();
        drop(gateway_tx);

        fx.session.run_push(gateway_rx).await;

        let client = fx.session.client.lock().await;
        let (topic, payload) = &client.published[0];
        assert_eq!(topic, "gateway/v1/bridge-1/up/status");

        let document: serde_json::Value = serde_json::from_slice(payload).unwrap();
        let states = document["devices"]["light.kitchen"]["states"]
            .as_array()
            .unwrap();
        assert!(states.contains(&serde_json::json!({
            "key": "on_off", "value": {"type": "BOOL", "bool_value": true}
        })));
        assert!(states.contains(&serde_json::json!({
            "key": "light_brightness", "value": {"type": "INTEGER", "integer_value": 502}
        })));
    }

    #[tokio::test]
    async fn test_push_publishes_config_document() {
        let fx = fixture();
        let (gateway_tx, gateway_rx) = queue::gateway_queue();
        gateway_tx.send(GatewayJob::Config).unwrap();
        drop(gateway_tx);

        fx.session.run_push(gateway_rx).await;

        let client = fx.session.client.lock().await;
        let (topic, payload) = &client.published[0];
        assert_eq!(topic, "gateway/v1/bridge-1/up/config");

        let document: serde_json::Value = serde_json::from_slice(payload).unwrap();
        let devices = document["devices"].as_array().unwrap();
        assert_eq!(devices[0]["id"], "root");
        assert_eq!(devices[1]["id"], "light.kitchen");
        assert_eq!(devices[1]["model"]["category"], "light");
    }

    #[tokio::test]
    async fn test_bad_payload_does_not_panic() {
        let fx = fixture();
        fx.session.dispatch(&GatewayMessage {
            topic: "gateway/v1/bridge-1/down/commands".to_string(),
            payload: b"{not json".to_vec(),
        });
    }
}
