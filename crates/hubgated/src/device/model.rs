//! Canonical device model shared by both sides of the bridge.
//!
//! Hub-side classification (`Category`) and gateway-side classification
//! (`GatewayModel`) are deliberately distinct types: the hub exposes an
//! open-ended set of entity domains, while the gateway speaks a fixed,
//! enumerated taxonomy. `resolve_model` is the single place the two meet.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

/// Hub-side entity domain.
///
/// Unknown domains are preserved verbatim in `Other` so a persisted registry
/// round-trips without loss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Light,
    Switch,
    Sensor,
    Script,
    InputBoolean,
    HvacRadiator,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Light => "light",
            Self::Switch => "switch",
            Self::Sensor => "sensor",
            Self::Script => "script",
            Self::InputBoolean => "input_boolean",
            Self::HvacRadiator => "hvac_radiator",
            Self::Other(s) => s,
        }
    }

    /// Derive the category from a hub entity id of the form `domain.object`.
    pub fn from_entity_id(entity_id: &str) -> Self {
        let domain = entity_id.split('.').next().unwrap_or(entity_id);
        Self::from(domain.to_string())
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.as_str() {
            "light" => Self::Light,
            "switch" => Self::Switch,
            "sensor" => Self::Sensor,
            "script" => Self::Script,
            "input_boolean" => Self::InputBoolean,
            "hvac_radiator" => Self::HvacRadiator,
            _ => Self::Other(s),
        }
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway-side device category.
///
/// This is the closed taxonomy the gateway's capability catalog is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GatewayModel {
    Light,
    LedStrip,
    Relay,
    ScenarioButton,
    SensorTemp,
    HvacRadiator,
}

/// Resolve the gateway model for a device.
///
/// An already-assigned model always wins; otherwise the hub category maps
/// through a fixed table. Categories without a gateway counterpart resolve
/// to `None` and the device is never advertised.
pub fn resolve_model(category: &Category, existing: Option<GatewayModel>) -> Option<GatewayModel> {
    if existing.is_some() {
        return existing;
    }
    match category {
        Category::Light => Some(GatewayModel::Light),
        Category::Switch | Category::Script => Some(GatewayModel::Relay),
        Category::InputBoolean => Some(GatewayModel::ScenarioButton),
        Category::Sensor => Some(GatewayModel::SensorTemp),
        Category::HvacRadiator => Some(GatewayModel::HvacRadiator),
        Category::Other(_) => None,
    }
}

/// Auxiliary state keys the bridge is willing to carry.
///
/// Everything else the hub attaches to an entity is dropped at the inbound
/// boundary so the canonical model keeps a bounded shape.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttributeKey {
    Brightness,
    HvacModes,
    PresetModes,
    CurrentTemperature,
    Temperature,
    Percentage,
    PercentageStep,
}

impl AttributeKey {
    pub const ALL: [AttributeKey; 7] = [
        AttributeKey::Brightness,
        AttributeKey::HvacModes,
        AttributeKey::PresetModes,
        AttributeKey::CurrentTemperature,
        AttributeKey::Temperature,
        AttributeKey::Percentage,
        AttributeKey::PercentageStep,
    ];
}

/// One hub entity as the bridge knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Hub entity id (`light.kitchen`), the registry key.
    pub entity_id: String,

    /// Hub-side domain, fixed at discovery time.
    pub category: Category,

    /// Gateway-side model, resolved lazily from the category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<GatewayModel>,

    /// Devices start hidden; the operator opts them in explicitly.
    #[serde(default)]
    pub enabled: bool,

    /// Display name, seeded from the hub's friendly name.
    #[serde(default)]
    pub name: String,

    /// Last observed primary state ("on", "off", "21.5", "unavailable").
    #[serde(default)]
    pub state: String,

    /// Allowlisted auxiliary values, replaced wholesale on every hub event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<AttributeKey, serde_json::Value>,

    /// Optional gateway features the operator enabled for this device.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub features: BTreeSet<String>,
}

impl Device {
    pub fn new(entity_id: impl Into<String>, category: Category) -> Self {
        let entity_id = entity_id.into();
        let model = resolve_model(&category, None);
        Self {
            entity_id,
            category,
            model,
            enabled: false,
            name: String::new(),
            state: String::new(),
            attributes: BTreeMap::new(),
            features: BTreeSet::new(),
        }
    }

    /// Whether the device is reachable from the hub's point of view.
    pub fn is_online(&self) -> bool {
        self.state != "unavailable"
    }

    pub fn is_on(&self) -> bool {
        self.state == "on"
    }
}

/// Partial device update.
///
/// Only fields that are `Some` are applied; everything else keeps its stored
/// value. This is the merge unit used by the registry, the translators, and
/// the HTTP configuration surface alike.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevicePatch {
    pub category: Option<Category>,
    pub model: Option<GatewayModel>,
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub state: Option<String>,
    pub attributes: Option<BTreeMap<AttributeKey, serde_json::Value>>,
    pub features: Option<BTreeSet<String>>,
}

impl DevicePatch {
    pub fn state(value: impl Into<String>) -> Self {
        Self {
            state: Some(value.into()),
            ..Self::default()
        }
    }
}
