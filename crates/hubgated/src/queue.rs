//! Dual queue router decoupling translation from transport I/O.
//!
//! Two unbounded FIFO queues, one per direction. Producers (translators, the
//! HTTP surface, the heartbeat) never block; consumers live inside the
//! transport sessions and drain items one at a time, logging failures rather
//! than stalling the queue.

use tokio::sync::mpsc;

/// Work bound for the gateway transport.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayJob {
    /// Push status for the given entity ids; empty means all enabled devices.
    Status(Vec<String>),

    /// Re-announce the full device list.
    Config,
}

/// Work bound for the hub transport: the entity id whose current state
/// should be realized as a service call.
pub type HubJob = String;

pub type GatewayTx = mpsc::UnboundedSender<GatewayJob>;
pub type GatewayRx = mpsc::UnboundedReceiver<GatewayJob>;
pub type HubTx = mpsc::UnboundedSender<HubJob>;
pub type HubRx = mpsc::UnboundedReceiver<HubJob>;

pub fn gateway_queue() -> (GatewayTx, GatewayRx) {
    mpsc::unbounded_channel()
}

pub fn hub_queue() -> (HubTx, HubRx) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_preserves_order() {
        let (tx, mut rx) = gateway_queue();
        tx.send(GatewayJob::Config).unwrap();
        tx.send(GatewayJob::Status(vec!["light.kitchen".to_string()]))
            .unwrap();

        assert_eq!(rx.recv().await, Some(GatewayJob::Config));
        assert_eq!(
            rx.recv().await,
            Some(GatewayJob::Status(vec!["light.kitchen".to_string()]))
        );
    }

    #[tokio::test]
    async fn test_send_never_blocks_without_consumer() {
        let (tx, _rx) = hub_queue();
        for i in 0..10_000 {
            tx.send(format!("switch.unit_{i}")).unwrap();
        }
    }
}
