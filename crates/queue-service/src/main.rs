//! Visitor Queue Service
//!
//! Entry point for the queue service binary.

use queue_service::actors::QueueControllerActorHandle;
use queue_service::config::Config;
use queue_service::observability::metrics::init_metrics_recorder;
use queue_service::repositories::{InMemoryQueueStore, PgQueueStore, QueueStore};
use queue_service::routes::{self, AppState};
use queue_service::services::QueueService;
use queue_service::tasks::channel_sweeper::{start_channel_sweeper, DEFAULT_SWEEP_INTERVAL_SECONDS};

use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "queue_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Visitor Queue Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        store_timeout_ms = config.store_timeout.as_millis() as u64,
        bus_capacity = config.bus_capacity,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let store = connect_store(&config).await?;

    let service = QueueService::new(&config, store);
    let controller = service.controller().clone();

    // Background maintenance
    let sweeper = tokio::spawn(
        start_channel_sweeper(
            service.bus().clone(),
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
            controller.child_token(),
        )
        .instrument(tracing::info_span!("queue.tasks.sweeper")),
    );

    // Parse bind address before moving config
    let bind_address = config.bind_address.clone();
    let drain_seconds = config.drain_seconds;

    let state = Arc::new(AppState { service, config });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Visitor Queue Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(drain_seconds, controller))
        .await?;

    if let Err(e) = sweeper.await {
        warn!("Channel sweeper task failed: {}", e);
    }

    info!("Visitor Queue Service shutdown complete");

    Ok(())
}

/// Connect to Postgres when `DATABASE_URL` is set, otherwise use the
/// process-local store.
async fn connect_store(config: &Config) -> Result<Arc<dyn QueueStore>, Box<dyn std::error::Error>> {
    let Some(database_url) = &config.database_url else {
        warn!("DATABASE_URL not set, using in-memory store (data is lost on restart)");
        return Ok(Arc::new(InMemoryQueueStore::new()));
    };

    info!("Connecting to database...");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(config.store_timeout)
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url.expose_secret())
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;

    info!("Database connection established");
    Ok(Arc::new(PgQueueStore::new(pool)))
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
///
/// Returns when a shutdown signal is received, the drain period is complete
/// and the actor tree has been cancelled. Open SSE streams hold child tokens
/// of the controller, so they end here and let their connections close.
async fn shutdown_signal(drain_seconds: u64, controller: QueueControllerActorHandle) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    if drain_seconds > 0 {
        warn!("Draining connections for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (QUEUE_DRAIN_SECONDS=0)");
    }

    if let Err(e) = controller.shutdown().await {
        warn!("Controller shutdown request failed: {}", e);
        controller.cancel();
    }
}
