//! Hub event to canonical device translation.
//!
//! Events for devices the operator has not opted in are dropped on purpose:
//! the bridge never surfaces state for an unknown or disabled entity, and an
//! unknown entity id must not create a registry record.

use std::collections::BTreeMap;

use tracing::debug;
use tracing::trace;

use crate::device::AttributeKey;
use crate::device::DevicePatch;
use crate::device::DeviceRegistry;

/// A state-change event as delivered by the hub's event API.
#[derive(Debug, Clone)]
pub struct HubEvent {
    pub kind: String,
    pub entity_id: String,
    pub old_state: Option<String>,
    pub new_state: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Copy the allowlisted attribute keys out of a hub attribute document.
///
/// Null values count as absent; the hub reports `brightness: null` for a
/// light that is off or unreachable, and carrying that forward would emit a
/// ghost value later.
pub fn extract_attributes(
    attributes: &serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<AttributeKey, serde_json::Value> {
    let mut out = BTreeMap::new();
    for key in AttributeKey::ALL {
        match attributes.get(key.as_ref()) {
            Some(serde_json::Value::Null) | None => {}
            Some(value) => {
                out.insert(key, value.clone());
            }
        }
    }
    out
}

/// Apply a hub event to the registry.
///
/// Returns the entity id when the mutation should be propagated to the
/// gateway, `None` when the event was dropped. The stored attribute set is
/// replaced wholesale so keys from a previous state cannot linger.
pub fn apply_state_change(registry: &DeviceRegistry, event: &HubEvent) -> Option<String> {
    if event.kind != "state_changed" {
        trace!("ignoring hub event kind {}", event.kind);
        return None;
    }

    let device = match registry.get(&event.entity_id) {
        Some(device) => device,
        None => {
            trace!("dropping event for unknown device {}", event.entity_id);
            return None;
        }
    };
    if !device.enabled {
        trace!("dropping event for disabled device {}", event.entity_id);
        return None;
    }

    debug!(
        "hub event: {}: {:?} -> {}",
        event.entity_id, event.old_state, event.new_state
    );

    registry.update(
        &event.entity_id,
        DevicePatch {
            state: Some(event.new_state.clone()),
            attributes: Some(extract_attributes(&event.attributes)),
            ..DevicePatch::default()
        },
    );

    Some(event.entity_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(entity_id: &str, new_state: &str, attributes: serde_json::Value) -> HubEvent {
        let attributes = match attributes {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        HubEvent {
            kind: "state_changed".to_string(),
            entity_id: entity_id.to_string(),
            old_state: Some("off".to_string()),
            new_state: new_state.to_string(),
            attributes,
        }
    }

    fn registry_with_enabled_light() -> (tempfile::TempDir, DeviceRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::open(dir.path().join("devices.json"));
        registry.update(
            "light.kitchen",
            DevicePatch {
                enabled: Some(true),
                ..DevicePatch::default()
            },
        );
        (dir, registry)
    }

    #[test]
    fn test_unknown_entity_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::open(dir.path().join("devices.json"));

        let pushed = apply_state_change(
            &registry,
            &event("light.ghost", "on", serde_json::json!({})),
        );

        assert_eq!(pushed, None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disabled_device_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::open(dir.path().join("devices.json"));
        registry.update("light.kitchen", DevicePatch::default());

        let pushed = apply_state_change(
            &registry,
            &event("light.kitchen", "on", serde_json::json!({})),
        );

        assert_eq!(pushed, None);
        assert_eq!(registry.get("light.kitchen").unwrap().state, "");
    }

    #[test]
    fn test_non_state_change_kind_is_ignored() {
        let (_dir, registry) = registry_with_enabled_light();
        let mut ev = event("light.kitchen", "on", serde_json::json!({}));
        ev.kind = "service_registered".to_string();

        assert_eq!(apply_state_change(&registry, &ev), None);
    }

    #[test]
    fn test_enabled_device_state_and_attributes_applied() {
        let (_dir, registry) = registry_with_enabled_light();

        let pushed = apply_state_change(
            &registry,
            &event(
                "light.kitchen",
                "on",
                serde_json::json!({"brightness": 128, "color_temp": 370}),
            ),
        );

        assert_eq!(pushed, Some("light.kitchen".to_string()));
        let device = registry.get("light.kitchen").unwrap();
        assert_eq!(device.state, "on");
        assert_eq!(
            device.attributes.get(&AttributeKey::Brightness),
            Some(&serde_json::json!(128))
        );
        // color_temp is not on the allowlist
        assert_eq!(device.attributes.len(), 1);
    }

    #[test]
    fn test_attribute_set_replaced_not_merged() {
        let (_dir, registry) = registry_with_enabled_light();

        apply_state_change(
            &registry,
            &event("light.kitchen", "on", serde_json::json!({"brightness": 128})),
        );
        // Light becomes unreachable; brightness must not linger.
        apply_state_change(
            &registry,
            &event("light.kitchen", "unavailable", serde_json::json!({})),
        );

        let device = registry.get("light.kitchen").unwrap();
        assert_eq!(device.state, "unavailable");
        assert!(device.attributes.is_empty());
    }

    #[test]
    fn test_null_attribute_counts_as_absent() {
        let (_dir, registry) = registry_with_enabled_light();

        apply_state_change(
            &registry,
            &event("light.kitchen", "off", serde_json::json!({"brightness": null})),
        );

        assert!(registry.get("light.kitchen").unwrap().attributes.is_empty());
    }
}
