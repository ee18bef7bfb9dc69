//! Voice-assistant gateway transport: publish-subscribe over MQTT/TLS.

mod client;
mod session;

pub use client::GatewayClient;
pub use client::GatewayEvent;
pub use client::GatewayMessage;
pub use client::MqttGatewayClient;
pub use session::GatewaySession;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("not connected to the gateway")]
    NotConnected,

    #[error("failed to read CA bundle {0}: {1}")]
    Ca(PathBuf, #[source] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Topic layout of the gateway's MQTT tree.
///
/// Per-account traffic lives under `{prefix}/{username}`: the gateway talks
/// to the bridge on `down/...`, the bridge answers on `up/...`. One shared
/// broadcast topic under the bare prefix carries endpoint reconfiguration.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
    root: String,
}

impl Topics {
    pub fn new(prefix: &str, username: &str) -> Self {
        let prefix = prefix.trim_end_matches('/').to_string();
        let root = format!("{prefix}/{username}");
        Self { prefix, root }
    }

    pub fn down_wildcard(&self) -> String {
        format!("{}/down/#", self.root)
    }

    pub fn commands(&self) -> String {
        format!("{}/down/commands", self.root)
    }

    pub fn status_request(&self) -> String {
        format!("{}/down/status_request", self.root)
    }

    pub fn config_request(&self) -> String {
        format!("{}/down/config_request", self.root)
    }

    pub fn errors(&self) -> String {
        format!("{}/down/errors", self.root)
    }

    pub fn up_status(&self) -> String {
        format!("{}/up/status", self.root)
    }

    pub fn up_config(&self) -> String {
        format!("{}/up/config", self.root)
    }

    pub fn broadcast_config(&self) -> String {
        format!("{}/__config", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = Topics::new("gateway/v1", "bridge-1");
        assert_eq!(topics.down_wildcard(), "gateway/v1/bridge-1/down/#");
        assert_eq!(topics.commands(), "gateway/v1/bridge-1/down/commands");
        assert_eq!(topics.up_status(), "gateway/v1/bridge-1/up/status");
        assert_eq!(topics.up_config(), "gateway/v1/bridge-1/up/config");
        assert_eq!(topics.broadcast_config(), "gateway/v1/__config");
    }

    #[test]
    fn test_topic_prefix_trailing_slash() {
        let topics = Topics::new("gateway/v1/", "bridge-1");
        assert_eq!(topics.commands(), "gateway/v1/bridge-1/down/commands");
    }
}
