use std::future::Future;
use std::sync::Arc;

use newsrec_api::{
    config::{Config, StoreBackend},
    db::{
        create_pool, create_redis_client, postgres::run_migrations, PgContentStore, PgIdentity,
        PgInteractions, RedisDerivedStore, Stores,
    },
    routes::{create_router, AppState},
    services::Engine,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsrec_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let stores = build_stores(&config).await?;

    let (engine, engine_handle) = Engine::new(config.engine(), stores);
    let app = create_router(AppState::new(Arc::new(engine)));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, backend = ?config.store_backend, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine_handle.shutdown().await;
    Ok(())
}

async fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; state is lost on restart");
            Ok(Stores::in_memory())
        }
        StoreBackend::Postgres => {
            let pool = create_pool(&config.database_url).await?;
            run_migrations(&pool).await?;
            let redis_client = create_redis_client(&config.redis_url)?;

            Ok(Stores {
                content: Arc::new(PgContentStore::new(pool.clone())),
                interactions: Arc::new(PgInteractions::new(pool.clone())),
                derived: Arc::new(RedisDerivedStore::new(redis_client)),
                identity: Arc::new(PgIdentity::new(pool)),
            })
        }
    }
}

async fn shutdown_signal() {
    wait_for_signal(tokio::signal::ctrl_c()).await
}

/// Resolves when `signal` fires; never resolves if listening for it failed
async fn wait_for_signal(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        // Without a signal handler the server runs until the process is killed
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
