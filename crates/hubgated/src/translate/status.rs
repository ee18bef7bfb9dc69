//! Canonical device to gateway status translation.
//!
//! Required catalog features are emitted for every category from fixed
//! rules. Optional features are emitted only when the operator enabled them
//! for the device, and only when the backing value actually exists: an
//! absent attribute is omitted, never sent as a default.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::catalog::CategoryCatalog;
use crate::device::resolve_model;
use crate::device::AttributeKey;
use crate::device::Device;
use crate::device::DeviceRegistry;

use super::value::brightness_to_gateway;
use super::value::temperature_to_gateway;
use super::value::StateValue;

/// Status document published to the gateway.
#[derive(Debug, Serialize)]
pub struct StatusPayload {
    pub devices: BTreeMap<String, DeviceStates>,
}

#[derive(Debug, Serialize)]
pub struct DeviceStates {
    pub states: Vec<StateValue>,
}

/// Feature values for one device, in catalog order.
pub fn device_states(device: &Device, catalog: &CategoryCatalog) -> Vec<StateValue> {
    let model = match resolve_model(&device.category, device.model) {
        Some(model) => model,
        None => {
            warn!(
                "no gateway model for {} (category {})",
                device.entity_id, device.category
            );
            return Vec::new();
        }
    };
    let features = match catalog.features(model) {
        Some(features) => features,
        None => {
            warn!("gateway category {} missing from catalog", model);
            return Vec::new();
        }
    };

    let mut states = Vec::new();
    for feature in features {
        let value = if feature.required {
            required_value(device, &feature.name)
        } else if device.features.contains(&feature.name) {
            optional_value(device, &feature.name)
        } else {
            None
        };
        if let Some(value) = value {
            states.push(value);
        }
    }
    states
}

/// Build the status document for the given ids, or for every enabled device
/// when `entity_ids` is empty.
///
/// Disabled and unknown devices never contribute an entry. An empty result
/// still carries the root hub heartbeat so the gateway sees the bridge as
/// alive.
pub fn status_payload(
    registry: &DeviceRegistry,
    catalog: &CategoryCatalog,
    entity_ids: &[String],
) -> StatusPayload {
    let mut devices = BTreeMap::new();

    let selected: Vec<(String, Device)> = if entity_ids.is_empty() {
        registry.snapshot()
    } else {
        entity_ids
            .iter()
            .filter_map(|id| registry.get(id).map(|device| (id.clone(), device)))
            .collect()
    };

    for (entity_id, device) in selected {
        if !device.enabled {
            continue;
        }
        devices.insert(
            entity_id,
            DeviceStates {
                states: device_states(&device, catalog),
            },
        );
    }

    if devices.is_empty() {
        devices.insert(
            "root".to_string(),
            DeviceStates {
                states: vec![StateValue::bool("online", true)],
            },
        );
    }

    StatusPayload { devices }
}

fn required_value(device: &Device, name: &str) -> Option<StateValue> {
    match name {
        "online" => Some(StateValue::bool("online", device.is_online())),
        "on_off" => Some(StateValue::bool("on_off", device.is_on())),
        "temperature" => {
            temperature_reading(device).map(|t| StateValue::integer("temperature", t))
        }
        other => {
            debug!(
                "no rule for required feature {} on {}",
                other, device.entity_id
            );
            None
        }
    }
}

fn optional_value(device: &Device, name: &str) -> Option<StateValue> {
    match name {
        "light_brightness" => attribute_integer(device, AttributeKey::Brightness)
            .map(|v| StateValue::integer("light_brightness", brightness_to_gateway(v))),
        "button_event" => {
            let event = if device.is_on() { "click" } else { "double_click" };
            Some(StateValue::enumeration("button_event", event))
        }
        "temperature" => {
            temperature_reading(device).map(|t| StateValue::integer("temperature", t))
        }
        "hvac_temp_set" => attribute_float(device, AttributeKey::Temperature)
            .map(|v| StateValue::integer("hvac_temp_set", temperature_to_gateway(v))),
        other => {
            debug!(
                "no rule for optional feature {} on {}",
                other, device.entity_id
            );
            None
        }
    }
}

/// Current temperature: the attribute when present, otherwise the primary
/// state for sensors whose state is the reading itself.
fn temperature_reading(device: &Device) -> Option<i64> {
    attribute_float(device, AttributeKey::CurrentTemperature)
        .or_else(|| device.state.parse::<f64>().ok())
        .map(temperature_to_gateway)
}

fn attribute_integer(device: &Device, key: AttributeKey) -> Option<i64> {
    device.attributes.get(&key).and_then(serde_json::Value::as_i64)
}

fn attribute_float(device: &Device, key: AttributeKey) -> Option<f64> {
    device.attributes.get(&key).and_then(serde_json::Value::as_f64)
}
