use panel_telemetry::{
    api::create_router,
    config::Config,
    ingest::Ingestor,
    monitor::Monitor,
    mqtt,
    poll::Poller,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Starting panel-telemetry service");

    let config_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let config = Config::load(&config_path)?;
    info!(
        devices = config.devices.len(),
        circuits = config.circuits.len(),
        "Configuration loaded from: {}",
        config_path
    );

    let monitor = Arc::new(Monitor::new(config.clone()));

    if let Some(mqtt_cfg) = config.mqtt.clone() {
        let ingestor = Ingestor::new(monitor.clone(), &config.devices);
        info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, "starting MQTT subscriber");
        tokio::spawn(mqtt::run_subscriber(mqtt_cfg, ingestor, monitor.clone()));
    }

    if let Some(poll_cfg) = config.poll.clone() {
        let poller = Poller::new(poll_cfg, &config.devices, monitor.clone())?;
        tokio::spawn(poller.run());
    }

    if config.mqtt.is_none() && config.poll.is_none() {
        warn!("no transport configured; snapshot will stay empty");
    }

    let app = create_router(monitor);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
