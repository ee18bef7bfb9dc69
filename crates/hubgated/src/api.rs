//! HTTP configuration surface.
//!
//! The operator manages the registry here: which devices are exposed to the
//! gateway and which optional features each one carries. Every mutation
//! persists the registry and triggers a fresh config announcement so the
//! gateway's view never drifts.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::device::Device;
use crate::device::DevicePatch;
use crate::device::DeviceRegistry;
use crate::queue::GatewayJob;
use crate::queue::GatewayTx;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

#[derive(Serialize)]
struct DevicesResponse {
    devices: BTreeMap<String, Device>,
}

/// Bulk partial update: a list of `{id, ...fields}` records
#[derive(Deserialize)]
struct DevicesEdit {
    devices: Vec<DeviceEdit>,
}

#[derive(Deserialize)]
struct DeviceEdit {
    id: String,
    #[serde(flatten)]
    patch: DevicePatch,
}

/// Toggle one optional feature flag for one device
#[derive(Deserialize)]
struct FeatureToggle {
    feature: String,
    enabled: bool,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    registry: Arc<DeviceRegistry>,
    gateway_tx: GatewayTx,
    version: &'static str,
}

impl AppState {
    /// Persist and re-announce after a registry mutation.
    fn commit(&self) {
        self.registry.save_logged();
        if self.gateway_tx.send(GatewayJob::Config).is_err() {
            warn!("gateway queue closed, config push dropped");
        }
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /api/v1/devices
#[tracing::instrument(skip(state))]
async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices = state.registry.snapshot().into_iter().collect();
    (StatusCode::OK, Json(DevicesResponse { devices }))
}

/// Handler for POST /api/v1/devices
#[tracing::instrument(skip(state, edit))]
async fn update_devices(
    State(state): State<Arc<AppState>>,
    Json(edit): Json<DevicesEdit>,
) -> StatusCode {
    for entry in edit.devices {
        tracing::debug!("updating device {}", entry.id);
        state.registry.update(&entry.id, entry.patch);
    }
    state.commit();
    StatusCode::NO_CONTENT
}

/// Handler for POST /api/v1/devices/:id/features
#[tracing::instrument(skip(state, toggle))]
async fn toggle_feature(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(toggle): Json<FeatureToggle>,
) -> StatusCode {
    let Some(device) = state.registry.get(&id) else {
        return StatusCode::NOT_FOUND;
    };

    let mut features = device.features;
    if toggle.enabled {
        features.insert(toggle.feature);
    } else {
        features.remove(&toggle.feature);
    }
    state.registry.update(
        &id,
        DevicePatch {
            features: Some(features),
            ..DevicePatch::default()
        },
    );
    state.commit();
    StatusCode::NO_CONTENT
}

/// Handler for DELETE /api/v1/devices/:id
#[tracing::instrument(skip(state))]
async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    if !state.registry.remove(&id) {
        return StatusCode::NOT_FOUND;
    }
    state.commit();
    StatusCode::NO_CONTENT
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/api/v1/devices", get(list_devices).post(update_devices))
        .route("/api/v1/devices/:id/features", post(toggle_feature))
        .route(
            "/api/v1/devices/:id",
            axum::routing::delete(delete_device),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP configuration server
///
/// Binds to the given address and serves until the shutdown signal fires.
pub async fn serve(
    listen: String,
    port: u16,
    registry: Arc<DeviceRegistry>,
    gateway_tx: GatewayTx,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        registry,
        gateway_tx,
        version: env!("CARGO_PKG_VERSION"),
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP configuration server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP configuration server shutting down gracefully");
        })
        .await?;

    Ok(())
}
