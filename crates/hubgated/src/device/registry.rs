//! In-memory device registry with whole-file JSON persistence.
//!
//! The registry is the single owner of canonical device state. All reads
//! return independent copies and all mutations happen inside one lock scope,
//! so callers never observe a half-applied update. The lock is a plain
//! `std::sync::Mutex` and is never held across an await point.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;
use tracing::error;
use tracing::warn;

use super::model::resolve_model;
use super::model::Category;
use super::model::Device;
use super::model::DevicePatch;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access device store {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to serialize device store: {0}")]
    Serialize(#[source] serde_json::Error),
}

pub struct DeviceRegistry {
    path: PathBuf,
    inner: Mutex<HashMap<String, Device>>,
}

impl DeviceRegistry {
    /// Open the registry backed by `path`.
    ///
    /// A missing store file is an empty registry. A malformed one is logged
    /// and replaced with an empty registry; startup never fails on it.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let devices = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, Device>>(&contents) {
                Ok(devices) => devices,
                Err(e) => {
                    error!(
                        "malformed device store {}, starting empty: {}",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                error!(
                    "failed to read device store {}, starting empty: {}",
                    path.display(),
                    e
                );
                HashMap::new()
            }
        };

        Self {
            path,
            inner: Mutex::new(devices),
        }
    }

    /// Return an independent copy of one device.
    pub fn get(&self, entity_id: &str) -> Option<Device> {
        self.lock().get(entity_id).cloned()
    }

    /// Merge a partial update into a device, inserting it if unseen.
    ///
    /// For an existing device the category is immutable and a differing
    /// patch value is ignored. For a new device the category comes from the
    /// patch or, failing that, from the entity id prefix, and the gateway
    /// model is resolved from it.
    pub fn update(&self, entity_id: &str, patch: DevicePatch) {
        let mut devices = self.lock();
        match devices.get_mut(entity_id) {
            Some(device) => {
                if let Some(category) = &patch.category {
                    if *category != device.category {
                        debug!(
                            "ignoring category change for {}: {} -> {}",
                            entity_id, device.category, category
                        );
                    }
                }
                apply_patch(device, patch);
            }
            None => {
                let category = patch
                    .category
                    .clone()
                    .unwrap_or_else(|| Category::from_entity_id(entity_id));
                let mut device = Device::new(entity_id, category);
                apply_patch(&mut device, patch);
                device.model = resolve_model(&device.category, device.model);
                devices.insert(entity_id.to_string(), device);
            }
        }
    }

    /// Overwrite only the primary state. Logged no-op for unknown ids.
    pub fn change_state(&self, entity_id: &str, state: &str) {
        let mut devices = self.lock();
        match devices.get_mut(entity_id) {
            Some(device) => device.state = state.to_string(),
            None => debug!("state change for unknown device {}", entity_id),
        }
    }

    /// Snapshot of the whole registry as independent copies.
    pub fn snapshot(&self) -> Vec<(String, Device)> {
        self.lock()
            .iter()
            .map(|(id, device)| (id.clone(), device.clone()))
            .collect()
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.lock().contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove a device. Returns whether it existed.
    pub fn remove(&self, entity_id: &str) -> bool {
        self.lock().remove(entity_id).is_some()
    }

    /// Serialize the whole registry to its backing file.
    pub fn save(&self) -> Result<(), StoreError> {
        let json = {
            let devices = self.lock();
            serde_json::to_string_pretty(&*devices).map_err(StoreError::Serialize)?
        };
        std::fs::write(&self.path, json).map_err(|e| StoreError::Io(self.path.clone(), e))
    }

    /// Save, demoting failure to a log line.
    ///
    /// Persistence losing a race with the next save is preferable to tearing
    /// down a translation task.
    pub fn save_logged(&self) {
        if let Err(e) = self.save() {
            warn!("failed to persist device registry: {}", e);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Device>> {
        // Mutations never panic while holding the lock, so poisoning is
        // unreachable in practice; recover instead of propagating.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn apply_patch(device: &mut Device, patch: DevicePatch) {
    if let Some(model) = patch.model {
        device.model = Some(model);
    }
    if let Some(enabled) = patch.enabled {
        device.enabled = enabled;
    }
    if let Some(name) = patch.name {
        device.name = name;
    }
    if let Some(state) = patch.state {
        device.state = state;
    }
    if let Some(attributes) = patch.attributes {
        device.attributes = attributes;
    }
    if let Some(features) = patch.features {
        device.features = features;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::model::AttributeKey;
    use crate::device::model::GatewayModel;

    fn scratch_registry() -> (tempfile::TempDir, DeviceRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::open(dir.path().join("devices.json"));
        (dir, registry)
    }

    #[test]
    fn test_open_missing_store_is_empty() {
        let (_dir, registry) = scratch_registry();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_open_malformed_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, "{not json").unwrap();

        let registry = DeviceRegistry::open(&path);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_inserts_with_resolved_model() {
        let (_dir, registry) = scratch_registry();
        registry.update(
            "switch.heater",
            DevicePatch {
                name: Some("Heater".to_string()),
                ..DevicePatch::default()
            },
        );

        let device = registry.get("switch.heater").unwrap();
        assert_eq!(device.category, Category::Switch);
        assert_eq!(device.model, Some(GatewayModel::Relay));
        assert_eq!(device.name, "Heater");
        assert!(!device.enabled);
    }

    #[test]
    fn test_update_merges_only_set_fields() {
        let (_dir, registry) = scratch_registry();
        registry.update(
            "light.kitchen",
            DevicePatch {
                name: Some("Kitchen".to_string()),
                state: Some("on".to_string()),
                ..DevicePatch::default()
            },
        );
        registry.update("light.kitchen", DevicePatch::state("off"));

        let device = registry.get("light.kitchen").unwrap();
        assert_eq!(device.state, "off");
        assert_eq!(device.name, "Kitchen");
    }

    #[test]
    fn test_update_ignores_category_change() {
        let (_dir, registry) = scratch_registry();
        registry.update("light.kitchen", DevicePatch::default());
        registry.update(
            "light.kitchen",
            DevicePatch {
                category: Some(Category::Switch),
                ..DevicePatch::default()
            },
        );

        let device = registry.get("light.kitchen").unwrap();
        assert_eq!(device.category, Category::Light);
    }

    #[test]
    fn test_change_state_unknown_id_is_noop() {
        let (_dir, registry) = scratch_registry();
        registry.change_state("light.ghost", "on");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_returns_independent_copy() {
        let (_dir, registry) = scratch_registry();
        registry.update("light.kitchen", DevicePatch::state("on"));

        let mut copy = registry.get("light.kitchen").unwrap();
        copy.state = "off".to_string();
        assert_eq!(registry.get("light.kitchen").unwrap().state, "on");
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let registry = DeviceRegistry::open(&path);
        registry.update(
            "light.kitchen",
            DevicePatch {
                enabled: Some(true),
                name: Some("Kitchen".to_string()),
                state: Some("on".to_string()),
                attributes: Some(
                    [(AttributeKey::Brightness, serde_json::json!(200))]
                        .into_iter()
                        .collect(),
                ),
                ..DevicePatch::default()
            },
        );
        registry.save().unwrap();

        let reloaded = DeviceRegistry::open(&path);
        assert_eq!(reloaded.snapshot(), registry.snapshot());
    }
}
