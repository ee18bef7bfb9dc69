use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use hubgated::api;
use hubgated::catalog::CategoryCatalog;
use hubgated::config::Config;
use hubgated::config::EndpointStore;
use hubgated::device::DeviceRegistry;
use hubgated::gateway::GatewaySession;
use hubgated::gateway::MqttGatewayClient;
use hubgated::hub::HubSession;
use hubgated::hub::WsHubClient;
use hubgated::queue;
use hubgated::queue::GatewayJob;

/// Bridge between a home-automation hub and a voice-assistant gateway
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "hubgated.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;

    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::from(
            config.logging.level,
        ))
        .init();

    tracing::info!("hubgated starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let registry = Arc::new(DeviceRegistry::open(&config.store.devices_file));
    tracing::info!("device registry loaded: {} device(s)", registry.len());

    let endpoint = Arc::new(EndpointStore::new(config.gateway.endpoint.clone()));
    let catalog = CategoryCatalog::load_or_fetch(
        &config.store.categories_file,
        &endpoint.current(),
        &config.gateway.username,
        &config.gateway.password,
    )
    .await
    .context("failed to load the gateway category catalog")?;
    let catalog = Arc::new(catalog);

    let (gateway_tx, gateway_rx) = queue::gateway_queue();
    let (hub_tx, hub_rx) = queue::hub_queue();

    // Hub side: inventory load first, then the event stream and the
    // hub-bound queue consumer.
    let hub_session = Arc::new(HubSession::new(
        WsHubClient::new(&config.hub),
        &config.hub,
        registry.clone(),
        gateway_tx.clone(),
    ));
    hub_session.startup_load().await;

    {
        let session = hub_session.clone();
        tokio::spawn(async move { session.run_events().await });
    }
    {
        let session = hub_session.clone();
        tokio::spawn(async move { session.run_commands(hub_rx).await });
    }

    // Gateway side: inbound dispatch and the gateway-bound queue consumer.
    let gateway_client =
        MqttGatewayClient::new(&config.gateway).context("failed to set up the gateway client")?;
    let gateway_session = Arc::new(GatewaySession::new(
        gateway_client,
        &config.gateway,
        registry.clone(),
        catalog,
        endpoint.clone(),
        gateway_tx.clone(),
        hub_tx,
    ));
    {
        let session = gateway_session.clone();
        tokio::spawn(async move { session.run_listen().await });
    }
    {
        let session = gateway_session.clone();
        tokio::spawn(async move { session.run_push(gateway_rx).await });
    }

    // Low-frequency heartbeat: a full status push keeps the gateway's view
    // fresh even when the hub is quiet. Re-sends are idempotent.
    {
        let gateway_tx = gateway_tx.clone();
        let interval = Duration::from_secs(config.gateway.heartbeat_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if gateway_tx.send(GatewayJob::Status(Vec::new())).is_err() {
                    break;
                }
            }
        });
    }

    // Surface gateway-pushed endpoint changes; the catalog fetcher reads the
    // store on the next start.
    {
        let mut endpoint_rx = endpoint.subscribe();
        tokio::spawn(async move {
            while endpoint_rx.changed().await.is_ok() {
                let current = endpoint_rx.borrow().clone();
                tracing::info!(
                    "gateway endpoint is now {}, effective for the next catalog fetch",
                    current
                );
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(api::serve(
        config.api.listen.clone(),
        config.api.port,
        registry.clone(),
        gateway_tx,
        shutdown_rx,
    ));

    tracing::info!("All tasks started, entering main loop");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    registry.save_logged();
    let _ = shutdown_tx.send(());
    if let Err(e) = server.await.context("HTTP server task failed")? {
        tracing::error!("HTTP server error: {}", e);
    }

    tracing::info!("hubgated shutdown complete");

    Ok(())
}
