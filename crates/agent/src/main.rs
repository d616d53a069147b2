//! SNMP agent
//!
//! Polls SNMP devices, receives traps and logs the resulting points while
//! serving health and Prometheus metrics over HTTP.

use anyhow::Result;
use snmp_agent::{api, config};
use snmp_lib::{AsyncSnmpSessionFactory, HealthRegistry, LogFeeder, SessionOpts, SnmpInput, StaticTagger};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting snmp-agent");

    let config = config::AgentConfig::load()?;
    info!(node_name = %config.node_name, "Agent configured");

    let health_registry = HealthRegistry::new();
    let session_factory = AsyncSnmpSessionFactory::new(SessionOpts::from_config(&config.snmp));

    let input = SnmpInput::builder(config.snmp.clone())
        .feeder(Arc::new(LogFeeder))
        .tagger(Arc::new(StaticTagger::with_host(&config.node_name)))
        .session_factory(Arc::new(session_factory))
        .node_name(config.node_name.clone())
        .health(health_registry.clone())
        .build()?;

    let app_state = Arc::new(api::AppState::new(health_registry));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let input_handle = tokio::spawn(async move {
        if let Err(e) = input.run(shutdown_rx).await {
            error!(error = %e, "SNMP input failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    if let Err(e) = input_handle.await {
        error!(error = %e, "SNMP input task panicked");
    }
    api_handle.abort();

    Ok(())
}
