//! Hub session: inventory load, the event stream task, and the hub-bound
//! queue consumer.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::client::HubApi;
use super::HubError;
use crate::config::HubConfig;
use crate::device::Category;
use crate::device::DevicePatch;
use crate::device::DeviceRegistry;
use crate::queue::GatewayJob;
use crate::queue::GatewayTx;
use crate::queue::HubRx;
use crate::translate;

/// Fixed back-off between reconnect attempts
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Attempts to fetch the inventory before starting with whatever is persisted
const INVENTORY_ATTEMPTS: u32 = 10;

/// One entity as returned by the hub's REST inventory endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryEntity {
    pub entity_id: String,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Decide whether an inventory entity becomes a registry record.
///
/// Only categories the gateway taxonomy can express are admitted; sensors
/// additionally need a temperature device class since that is the only
/// sensor model the gateway knows.
pub fn discover(entity: &InventoryEntity) -> Option<DevicePatch> {
    let category = Category::from_entity_id(&entity.entity_id);
    match category {
        Category::Light | Category::Switch | Category::Script | Category::InputBoolean => {}
        Category::Sensor | Category::HvacRadiator => {
            let device_class = entity
                .attributes
                .get("device_class")
                .and_then(serde_json::Value::as_str);
            if device_class != Some("temperature") {
                trace!("skipping {}: unsupported device class", entity.entity_id);
                return None;
            }
        }
        Category::Other(_) => {
            trace!("skipping {}: unsupported domain", entity.entity_id);
            return None;
        }
    }

    let name = entity
        .attributes
        .get("friendly_name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(&entity.entity_id)
        .to_string();

    Some(DevicePatch {
        category: Some(category),
        name: Some(name),
        state: Some(entity.state.clone()),
        attributes: Some(translate::inbound::extract_attributes(&entity.attributes)),
        ..DevicePatch::default()
    })
}

/// Merge a fetched inventory into the registry. Returns how many entities
/// were admitted.
pub fn seed_inventory(registry: &DeviceRegistry, entities: &[InventoryEntity]) -> usize {
    let mut admitted = 0;
    for entity in entities {
        if let Some(patch) = discover(entity) {
            registry.update(&entity.entity_id, patch);
            admitted += 1;
        }
    }
    admitted
}

pub struct HubSession<C: HubApi> {
    client: Arc<Mutex<C>>,
    registry: Arc<DeviceRegistry>,
    gateway_tx: GatewayTx,
    config: HubConfig,
}

impl<C: HubApi> HubSession<C> {
    pub fn new(
        client: C,
        config: &HubConfig,
        registry: Arc<DeviceRegistry>,
        gateway_tx: GatewayTx,
    ) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            registry,
            gateway_tx,
            config: config.clone(),
        }
    }

    /// Fetch the hub inventory over REST and seed the registry.
    ///
    /// Retries a bounded number of times; when the hub stays unreachable the
    /// bridge starts from the persisted registry alone. Always announces the
    /// (possibly unchanged) device list afterwards.
    pub async fn startup_load(&self) {
        let client = reqwest::Client::new();
        let url = format!("{}/states", self.config.api_url());

        for attempt in 1..=INVENTORY_ATTEMPTS {
            match self.fetch_inventory(&client, &url).await {
                Ok(entities) => {
                    let admitted = seed_inventory(&self.registry, &entities);
                    info!(
                        "hub inventory loaded: {} entities, {} admitted",
                        entities.len(),
                        admitted
                    );
                    self.registry.save_logged();
                    break;
                }
                Err(e) => {
                    error!(
                        "hub inventory fetch failed (attempt {}/{}): {}",
                        attempt, INVENTORY_ATTEMPTS, e
                    );
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }

        if self.gateway_tx.send(GatewayJob::Config).is_err() {
            warn!("gateway queue closed during startup");
        }
    }

    async fn fetch_inventory(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<Vec<InventoryEntity>, HubError> {
        let entities = client
            .get(url)
            .bearer_auth(&self.config.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entities)
    }

    /// Drive the event stream: connect, subscribe, translate events into
    /// registry mutations and status jobs, reconnect on loss.
    ///
    /// Returns only on authentication failure, which is terminal for the
    /// session.
    pub async fn run_events(&self) {
        loop {
            {
                let mut client = self.client.lock().await;
                match client.connect().await {
                    Ok(()) => {}
                    Err(HubError::AuthenticationFailed) => {
                        error!("hub authentication failed, giving up on the event stream");
                        return;
                    }
                    Err(e) => {
                        error!("hub connect failed, retrying in 5 seconds: {}", e);
                        drop(client);
                        tokio::time::sleep(RETRY_INTERVAL).await;
                        continue;
                    }
                }
                if let Err(e) = client.subscribe_events().await {
                    error!("hub event subscription failed: {}", e);
                    drop(client);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                    continue;
                }
            }
            info!("hub event stream connected");

            // Poll with a short lock hold so the command consumer can use the
            // client in between events.
            loop {
                let polled = {
                    let mut client = self.client.lock().await;
                    tokio::time::timeout(Duration::from_millis(100), client.next_event()).await
                };
                match polled {
                    Ok(Some(event)) => {
                        if let Some(entity_id) =
                            translate::apply_state_change(&self.registry, &event)
                        {
                            if self
                                .gateway_tx
                                .send(GatewayJob::Status(vec![entity_id]))
                                .is_err()
                            {
                                warn!("gateway queue closed, stopping hub event stream");
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        warn!("hub connection lost, reconnecting in 5 seconds");
                        tokio::time::sleep(RETRY_INTERVAL).await;
                        break;
                    }
                    Err(_) => tokio::task::yield_now().await,
                }
            }
        }
    }

    /// Drain the hub-bound queue, turning each entity id into a service call.
    ///
    /// A failed or suppressed call never stalls the queue.
    pub async fn run_commands(&self, mut hub_rx: HubRx) {
        while let Some(entity_id) = hub_rx.recv().await {
            let device = match self.registry.get(&entity_id) {
                Some(device) => device,
                None => {
                    warn!("hub command for unknown device {}", entity_id);
                    continue;
                }
            };
            let call = match translate::service_call(&device) {
                Some(call) => call,
                None => {
                    debug!(
                        "no hub command handler for {} (category {})",
                        entity_id, device.category
                    );
                    continue;
                }
            };

            debug!(
                "hub service call: {}.{} for {}",
                call.domain, call.service, entity_id
            );
            let mut client = self.client.lock().await;
            match client.call_service(&call).await {
                Ok(()) => {}
                Err(HubError::TooRecent { domain, service }) => {
                    debug!("suppressed duplicate call {}.{}", domain, service);
                }
                Err(e) => warn!("hub service call failed for {}: {}", entity_id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::client::MockHubApi;
    use crate::queue;

    fn inventory(entity_id: &str, state: &str, attributes: serde_json::Value) -> InventoryEntity {
        let attributes = match attributes {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        InventoryEntity {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes,
        }
    }

    fn config() -> HubConfig {
        HubConfig {
            url: "http://hub.local:8123".to_string(),
            token: "secret".to_string(),
            command_cooldown_secs: 3,
        }
    }

    #[test]
    fn test_discover_admits_supported_domains() {
        let patch = discover(&inventory(
            "light.kitchen",
            "on",
            serde_json::json!({"friendly_name": "Kitchen", "brightness": 128}),
        ))
        .unwrap();
        assert_eq!(patch.category, Some(Category::Light));
        assert_eq!(patch.name.as_deref(), Some("Kitchen"));
        assert_eq!(patch.state.as_deref(), Some("on"));

        assert!(discover(&inventory("switch.heater", "off", serde_json::json!({}))).is_some());
        assert!(discover(&inventory("vacuum.hallway", "docked", serde_json::json!({}))).is_none());
    }

    #[test]
    fn test_discover_filters_sensors_by_device_class() {
        assert!(discover(&inventory(
            "sensor.bedroom",
            "21.5",
            serde_json::json!({"device_class": "temperature"}),
        ))
        .is_some());

        assert!(discover(&inventory(
            "sensor.power",
            "42",
            serde_json::json!({"device_class": "power"}),
        ))
        .is_none());
    }

    #[test]
    fn test_seed_inventory_keeps_enable_flag() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::open(dir.path().join("devices.json"));
        registry.update(
            "light.kitchen",
            DevicePatch {
                enabled: Some(true),
                ..DevicePatch::default()
            },
        );

        let admitted = seed_inventory(
            &registry,
            &[
                inventory("light.kitchen", "on", serde_json::json!({})),
                inventory("vacuum.hallway", "docked", serde_json::json!({})),
            ],
        );

        assert_eq!(admitted, 1);
        let device = registry.get("light.kitchen").unwrap();
        // Re-discovery refreshes state but must not flip the opt-in.
        assert!(device.enabled);
        assert_eq!(device.state, "on");
    }

    #[tokio::test]
    async fn test_run_commands_dispatches_service_calls() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DeviceRegistry::open(dir.path().join("devices.json")));
        registry.update(
            "switch.x",
            DevicePatch {
                enabled: Some(true),
                state: Some("on".to_string()),
                ..DevicePatch::default()
            },
        );

        let (gateway_tx, _gateway_rx) = queue::gateway_queue();
        let (hub_tx, hub_rx) = queue::hub_queue();
        let session = HubSession::new(MockHubApi::default(), &config(), registry, gateway_tx);

        hub_tx.send("switch.x".to_string()).unwrap();
        hub_tx.send("switch.ghost".to_string()).unwrap();
        drop(hub_tx);
        session.run_commands(hub_rx).await;

        let client = session.client.lock().await;
        assert_eq!(client.calls.len(), 1);
        assert_eq!(client.calls[0].domain, "switch");
        assert_eq!(client.calls[0].service, "turn_on");
        assert_eq!(client.calls[0].target.entity_id, "switch.x");
    }

    #[tokio::test]
    async fn test_run_commands_drops_read_only_categories() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DeviceRegistry::open(dir.path().join("devices.json")));
        registry.update(
            "sensor.bedroom",
            DevicePatch {
                enabled: Some(true),
                state: Some("21.5".to_string()),
                ..DevicePatch::default()
            },
        );

        let (gateway_tx, _gateway_rx) = queue::gateway_queue();
        let (hub_tx, hub_rx) = queue::hub_queue();
        let session = HubSession::new(MockHubApi::default(), &config(), registry, gateway_tx);

        hub_tx.send("sensor.bedroom".to_string()).unwrap();
        drop(hub_tx);
        session.run_commands(hub_rx).await;

        assert!(session.client.lock().await.calls.is_empty());
    }

    #[tokio::test]
    async fn test_event_flow_enqueues_status_job() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DeviceRegistry::open(dir.path().join("devices.json")));
        registry.update(
            "light.kitchen",
            DevicePatch {
                enabled: Some(true),
                ..DevicePatch::default()
            },
        );

        let (gateway_tx, mut gateway_rx) = queue::gateway_queue();
        let event = translate::HubEvent {
            kind: "state_changed".to_string(),
            entity_id: "light.kitchen".to_string(),
            old_state: Some("off".to_string()),
            new_state: "on".to_string(),
            attributes: serde_json::Map::new(),
        };

        // Exercise the translation half of the event loop directly.
        let pushed = translate::apply_state_change(&registry, &event).unwrap();
        gateway_tx.send(GatewayJob::Status(vec![pushed])).unwrap();

        assert_eq!(
            gateway_rx.recv().await,
            Some(GatewayJob::Status(vec!["light.kitchen".to_string()]))
        );
    }
}
