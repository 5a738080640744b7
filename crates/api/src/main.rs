//! Order service entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use common::{Money, ProductId};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{CartStore, InMemoryCartStore, InMemoryOrderStore, OrderStore, PostgresOrderStore, Product};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Demo catalog for running without a database.
async fn seeded_memory_store(config: &Config) -> InMemoryOrderStore {
    let store = InMemoryOrderStore::new().with_lock_timeout(config.lock_timeout);
    for (id, name, cents, stock) in [
        (1, "Notebook", 450, 100),
        (2, "Fountain pen", 2_500, 20),
        (3, "Coffee mug", 999, 5),
    ] {
        store
            .insert_product(Product::new(
                ProductId::new(id),
                name,
                Money::from_cents(cents),
                stock,
            ))
            .await;
    }
    store
}

async fn serve<S>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: OrderStore + Clone + 'static,
{
    tracing::warn!(
        "cart store is in-memory: carts are local to this process and lost on restart"
    );
    let carts: Arc<dyn CartStore> = Arc::new(InMemoryCartStore::new());
    let (state, reconciler) = api::create_default_state(store, carts, config)?;
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting order service");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !reconciler.shutdown().await {
        tracing::warn!("some cart cleanups were abandoned during shutdown");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the order store and serve until a shutdown signal
    match config.database_url.as_deref() {
        Some(url) => {
            tracing::info!("using PostgreSQL order store");
            let store = PostgresOrderStore::connect(url, config.database_max_connections)
                .await?
                .with_lock_timeout(config.lock_timeout);
            store.run_migrations().await?;
            serve(store, &config, metrics_handle).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory order store");
            let store = seeded_memory_store(&config).await;
            serve(store, &config, metrics_handle).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
