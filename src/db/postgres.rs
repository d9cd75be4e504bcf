use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Creates a PostgreSQL connection pool
///
/// Acquisition is bounded by the same timeout applied to every external call,
/// so a saturated pool surfaces as an error instead of a hung request.
pub async fn create_pool(database_url: &str, acquire_timeout: Duration) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
