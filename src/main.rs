use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use punchline_api::{
    config::{Config, StoreBackend},
    db::{self, Cache, CacheWriterHandle},
    routes::{create_router, AppState},
    services::{
        providers::{MemoryStore, PgRatingStore, PgSimilarityOracle},
        Recommender,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "punchline_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let (recommender, cache_writer) = build_recommender(&config).await?;

    let app = create_router(AppState::new(recommender));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, backend = ?config.store_backend, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = cache_writer {
        handle.shutdown().await;
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn build_recommender(
    config: &Config,
) -> anyhow::Result<(Recommender, Option<CacheWriterHandle>)> {
    let settings = config.recommender_settings();

    match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config.database_url, config.external_call_timeout()).await?;
            db::run_migrations(&pool).await?;

            let redis_client = db::create_redis_client(&config.redis_url)?;
            let (cache, handle) = Cache::new(redis_client);

            let store = Arc::new(PgRatingStore::new(pool.clone()));
            let oracle = Arc::new(PgSimilarityOracle::new(
                pool,
                cache,
                config.similarity_cache_ttl_secs,
                config.neighbor_limit,
                config.similar_jokes_limit,
            ));

            Ok((Recommender::new(store, oracle, settings), Some(handle)))
        }
        StoreBackend::Memory => {
            let store = MemoryStore::with_demo_catalogue(
                usize::try_from(config.neighbor_limit).unwrap_or(0),
                usize::try_from(config.similar_jokes_limit).unwrap_or(0),
            )
            .await;
            let auth_id = store.add_user(1).await;
            tracing::info!(%auth_id, "Seeded demo user 1");

            let store = Arc::new(store);
            Ok((Recommender::new(store.clone(), store, settings), None))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
