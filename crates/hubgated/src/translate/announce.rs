//! Gateway device-list (config) translation.
//!
//! The advertised list is always regenerated from scratch: a synthetic root
//! hub device plus one entry per enabled device. The gateway diffs on its
//! side, so incremental updates are not worth the bookkeeping.

use serde::Serialize;
use tracing::debug;

use crate::catalog::CategoryCatalog;
use crate::device::resolve_model;
use crate::device::DeviceRegistry;

pub const MANUFACTURER: &str = "hubgated";
const ROOT_MODEL: &str = "HGHub";

/// Config document published to the gateway.
#[derive(Debug, Serialize)]
pub struct ConfigPayload {
    pub devices: Vec<AnnouncedDevice>,
}

#[derive(Debug, Serialize)]
pub struct AnnouncedDevice {
    pub id: String,
    pub name: String,
    pub model: ModelInfo,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: String,
    pub features: Vec<String>,
}

/// Build the full advertised device list.
pub fn config_payload(registry: &DeviceRegistry, catalog: &CategoryCatalog) -> ConfigPayload {
    let mut devices = vec![AnnouncedDevice {
        id: "root".to_string(),
        name: "Hub bridge".to_string(),
        model: ModelInfo {
            id: "ID_root_hub".to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: ROOT_MODEL.to_string(),
            description: Some("Home automation hub bridge".to_string()),
            category: "hub".to_string(),
            features: vec!["online".to_string()],
        },
    }];

    let mut snapshot = registry.snapshot();
    snapshot.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (entity_id, device) in snapshot {
        if !device.enabled {
            continue;
        }
        let model = match resolve_model(&device.category, device.model) {
            Some(model) => model,
            None => {
                debug!(
                    "not advertising {}: no gateway model for category {}",
                    entity_id, device.category
                );
                continue;
            }
        };
        let descriptors = match catalog.features(model) {
            Some(descriptors) => descriptors,
            None => {
                debug!(
                    "not advertising {}: category {} missing from catalog",
                    entity_id, model
                );
                continue;
            }
        };

        // Required features are always advertised; optional ones only once
        // the operator has switched them on for this device.
        let features = descriptors
            .iter()
            .filter(|d| d.required || device.features.contains(&d.name))
            .map(|d| d.name.clone())
            .collect();

        devices.push(AnnouncedDevice {
            id: entity_id.clone(),
            name: device.name.clone(),
            model: ModelInfo {
                id: format!("ID_{entity_id}"),
                manufacturer: MANUFACTURER.to_string(),
                model: format!("Model_{model}"),
                description: None,
                category: model.to_string(),
                features,
            },
        });
    }

    ConfigPayload { devices }
}
