//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use message_bus::{InMemoryMessageBus, MessageBus, connect_with_retry};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore, SubscriptionStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Tells the consumers to stop. Returns `false` when none are listening.
fn signal_consumers(shutdown_tx: &watch::Sender<bool>) -> bool {
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("no consumers left to signal");
        return false;
    }
    true
}

/// Connects the bus, starts the consumers and serves HTTP until shutdown.
async fn serve<S>(
    store: S,
    config: Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError>
where
    S: OrderStore + SubscriptionStore + 'static,
{
    let bus = connect_with_retry(&config.bus.retry, &config.bus.endpoint(), || {
        InMemoryMessageBus::connect(&config.bus)
    })
    .await?;
    let bus = Arc::new(bus);

    let state = api::create_default_state(store, bus.clone(), config.saga_config());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumers = saga::spawn_saga_consumers(
        state.orchestrator.clone(),
        state.subscriptions.clone(),
        config.max_redeliveries,
        shutdown_rx,
    )
    .await?;

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop consumers before the bus goes away
    signal_consumers(&shutdown_tx);
    for consumer in consumers {
        if let Err(err) = consumer.await {
            tracing::error!(error = %err, "consumer task ended abnormally");
        }
    }
    bus.close().await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the order store and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            let store = PostgresOrderStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL order store");
            serve(store, config, metrics_handle).await
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory order store");
            serve(InMemoryOrderStore::new(), config, metrics_handle).await
        }
    }
}
