//! Home-automation hub transport: WebSocket event API plus REST inventory.

mod client;
mod session;

pub use client::CallGuard;
pub use client::HubApi;
pub use client::WsHubClient;
pub use session::HubSession;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub connection failed: {0}")]
    Connection(String),

    #[error("hub rejected the access token")]
    AuthenticationFailed,

    #[error("not connected to the hub")]
    NotConnected,

    #[error("service {domain}.{service} was called too recently")]
    TooRecent { domain: String, service: String },

    #[error("unexpected hub message: {0}")]
    Protocol(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
