use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Build the bounded connection pool the store runs on.
///
/// Every store operation acquires a connection for the duration of the call;
/// nothing holds a connection across handler execution, so a small pool goes
/// a long way.
pub async fn make_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(2)
        .max_connections(10)
        .idle_timeout(Duration::from_secs(30 * 60))
        .max_lifetime(Duration::from_secs(60 * 60))
        .connect(database_url)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
