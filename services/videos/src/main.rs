use anyhow::{Context, Result};
use azora_pipeline::{EventBus, EventGateway, InMemoryEventBus, KafkaEventBus};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use video_service::config::{BusBackend, Config};
use video_service::{
    spawn_listeners, start_api_server, AppState, BusPopulationRequester, CredentialVerifier,
    EnrichmentEngine, Guarded, PgVideoStore, RedisUserCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Azora Video Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(
        PgVideoStore::new(&config.database)
            .await
            .context("Failed to initialize video store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let cache = Arc::new(
        RedisUserCache::new(&config.redis).context("Failed to create Redis pool")?,
    );

    let bus: Arc<dyn EventBus> = match config.bus.backend {
        BusBackend::Kafka => Arc::new(
            KafkaEventBus::new(config.kafka.clone()).context("Failed to initialize Kafka bus")?,
        ),
        BusBackend::Memory => {
            info!("Using in-process event bus");
            Arc::new(InMemoryEventBus::with_retention(config.bus.memory_retention))
        }
    };
    let gateway = EventGateway::new(bus, config.kafka.topics.clone());

    let verifier = Arc::new(CredentialVerifier::new());
    let shutdown = CancellationToken::new();

    // Spawn event listeners
    let listener_handles = spawn_listeners(
        &config.listeners,
        &gateway,
        verifier.clone(),
        store.clone(),
        cache.clone(),
        shutdown.clone(),
    )
    .await
    .context("Failed to start event listeners")?;

    let engine = EnrichmentEngine::new(
        cache,
        Arc::new(BusPopulationRequester::new(gateway)),
        config.enrichment.poll_interval(),
    );

    // Create API state
    let api_state = AppState {
        store,
        enricher: Arc::new(Guarded::new(engine, config.enrichment.breaker())),
        verifier,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Video service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down video service");
    shutdown.cancel();

    for handle in listener_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Listener task failed");
        }
    }
    if let Err(e) = api_handle.await {
        error!(error = %e, "API task failed");
    }

    info!("Video service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
