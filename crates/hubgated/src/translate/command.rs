//! Gateway command to canonical device translation, and from there to hub
//! service calls.
//!
//! The inverse of the status translator: typed feature values are decoded
//! and folded back into the device record, then the device's category
//! decides which hub service call (if any) carries the change out. Read-only
//! categories have no handler and their jobs evaporate at dispatch time.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::device::AttributeKey;
use crate::device::Category;
use crate::device::Device;
use crate::device::DevicePatch;
use crate::device::DeviceRegistry;

use super::value::brightness_to_hub;
use super::value::DecodedValue;
use super::value::StateValue;

/// Command document as delivered on the gateway's command topic.
#[derive(Debug, Deserialize)]
pub struct CommandPayload {
    pub devices: HashMap<String, CommandStates>,
}

#[derive(Debug, Deserialize)]
pub struct CommandStates {
    pub states: Vec<StateValue>,
}

/// A hub service invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub target: ServiceTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceTarget {
    pub entity_id: String,
}

/// Fold a list of feature values into the stored device.
///
/// Returns the entity id when something was applied and a hub command job
/// should be enqueued. Unknown devices and undecodable values are logged
/// and skipped without failing the rest of the batch.
pub fn apply_command(
    registry: &DeviceRegistry,
    entity_id: &str,
    states: &[StateValue],
) -> Option<String> {
    let device = match registry.get(entity_id) {
        Some(device) => device,
        None => {
            warn!("command for unknown device {}", entity_id);
            return None;
        }
    };

    let mut patch = DevicePatch::default();
    let mut attributes = device.attributes.clone();

    for state in states {
        let decoded = match state.decode() {
            Some(decoded) => decoded,
            None => continue,
        };
        match (state.key.as_str(), decoded) {
            ("on_off", DecodedValue::Bool(on)) => {
                patch.state = Some(if on { "on" } else { "off" }.to_string());
            }
            ("light_brightness", DecodedValue::Integer(value)) => {
                attributes.insert(
                    AttributeKey::Brightness,
                    serde_json::json!(brightness_to_hub(value)),
                );
                patch.attributes = Some(attributes.clone());
            }
            ("button_event", DecodedValue::Enum(event)) => {
                patch.state = Some(if event == "click" { "on" } else { "off" }.to_string());
            }
            (key, decoded) => {
                debug!("no command rule for {} = {:?} on {}", key, decoded, entity_id);
            }
        }
    }

    registry.update(entity_id, patch);
    Some(entity_id.to_string())
}

/// Translate a device's current state into the hub service call that
/// realizes it.
///
/// Only categories with a hub-side write surface produce a call; sensors
/// and other read-only categories return `None`.
pub fn service_call(device: &Device) -> Option<ServiceCall> {
    let service = if device.is_on() { "turn_on" } else { "turn_off" };
    match device.category {
        Category::Light => {
            let service_data = device
                .attributes
                .get(&AttributeKey::Brightness)
                .and_then(serde_json::Value::as_i64)
                .map(|brightness| serde_json::json!({ "brightness": brightness }));
            Some(ServiceCall {
                domain: "light".to_string(),
                service: service.to_string(),
                target: ServiceTarget {
                    entity_id: device.entity_id.clone(),
                },
                service_data,
            })
        }
        Category::Switch | Category::Script | Category::InputBoolean => Some(ServiceCall {
            domain: device.category.to_string(),
            service: service.to_string(),
            target: ServiceTarget {
                entity_id: device.entity_id.clone(),
            },
            service_data: None,
        }),
        _ => None,
    }
}
