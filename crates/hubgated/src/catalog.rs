//! Gateway category capability catalog.
//!
//! The gateway defines, per device category, an ordered list of typed
//! features. The catalog is fetched once from the gateway's HTTP API and
//! cached to disk; deleting the cache file and restarting is the only
//! refresh mechanism.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::device::GatewayModel;

/// Wire type of a single feature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeatureKind {
    Bool,
    Integer,
    Enum,
}

/// One feature slot of a gateway category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub name: String,
    pub data_type: FeatureKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to access category catalog {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("malformed category catalog: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to fetch category catalog: {0}")]
    Fetch(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct CategoriesResponse {
    categories: Vec<String>,
}

#[derive(Deserialize)]
struct FeaturesResponse {
    features: Vec<FeatureDescriptor>,
}

/// Read-mostly map from gateway category name to its feature list.
#[derive(Debug, Clone, Default)]
pub struct CategoryCatalog {
    categories: HashMap<String, Vec<FeatureDescriptor>>,
}

impl CategoryCatalog {
    pub fn from_map(categories: HashMap<String, Vec<FeatureDescriptor>>) -> Self {
        Self { categories }
    }

    /// Load the cached catalog, or fetch it from the gateway and cache it.
    pub async fn load_or_fetch(
        path: impl AsRef<Path>,
        endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(categories) => {
                    info!("category catalog loaded from {}", path.display());
                    Ok(Self { categories })
                }
                Err(e) => {
                    error!("malformed category catalog cache, refetching: {}", e);
                    let catalog = Self::fetch(endpoint, username, password).await?;
                    catalog.save(path)?;
                    Ok(catalog)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("category catalog cache missing, fetching from gateway");
                let catalog = Self::fetch(endpoint, username, password).await?;
                catalog.save(path)?;
                Ok(catalog)
            }
            Err(e) => Err(CatalogError::Io(path.to_path_buf(), e)),
        }
    }

    /// Fetch every category and its feature list from the gateway API.
    async fn fetch(endpoint: &str, username: &str, password: &str) -> Result<Self, CatalogError> {
        let client = reqwest::Client::new();
        let base = format!("{}/v1/mqtt-gate/categories", endpoint.trim_end_matches('/'));

        let listing: CategoriesResponse = client
            .get(&base)
            .basic_auth(username, Some(password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut categories = HashMap::new();
        for id in listing.categories {
            debug!("fetching features for category {}", id);
            let features: FeaturesResponse = client
                .get(format!("{}/{}/features", base, id))
                .basic_auth(username, Some(password))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            categories.insert(id, features.features);
        }

        info!("fetched {} gateway categories", categories.len());
        Ok(Self { categories })
    }

    fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let json = serde_json::to_string_pretty(&self.categories)
            .map_err(CatalogError::Malformed)?;
        std::fs::write(path, json).map_err(|e| CatalogError::Io(path.to_path_buf(), e))
    }

    /// Feature list for a resolved gateway model.
    pub fn features(&self, model: GatewayModel) -> Option<&[FeatureDescriptor]> {
        self.categories
            .get(&model.to_string())
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Catalog mirroring the gateway's stock categories, shared by the
/// translator tests.
#[cfg(test)]
pub(crate) fn test_catalog() -> CategoryCatalog {
    fn feature(name: &str, data_type: FeatureKind, required: bool) -> FeatureDescriptor {
        FeatureDescriptor {
            name: name.to_string(),
            data_type,
            required,
        }
    }

    let mut categories = HashMap::new();
    categories.insert(
        "light".to_string(),
        vec![
            feature("online", FeatureKind::Bool, true),
            feature("on_off", FeatureKind::Bool, true),
            feature("light_brightness", FeatureKind::Integer, false),
        ],
    );
    categories.insert(
        "relay".to_string(),
        vec![
            feature("online", FeatureKind::Bool, true),
            feature("on_off", FeatureKind::Bool, true),
        ],
    );
    categories.insert(
        "scenario_button".to_string(),
        vec![
            feature("online", FeatureKind::Bool, true),
            feature("button_event", FeatureKind::Enum, false),
        ],
    );
    categories.insert(
        "sensor_temp".to_string(),
        vec![
            feature("online", FeatureKind::Bool, true),
            feature("temperature", FeatureKind::Integer, false),
        ],
    );
    categories.insert(
        "hvac_radiator".to_string(),
        vec![
            feature("online", FeatureKind::Bool, true),
            feature("on_off", FeatureKind::Bool, true),
            feature("temperature", FeatureKind::Integer, false),
            feature("hvac_temp_set", FeatureKind::Integer, false),
        ],
    );
    CategoryCatalog::from_map(categories)
}
