mod connection;
mod user;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use abi::config::PostgresConfig;
use abi::errors::Result;

pub use connection::*;
pub use user::*;

pub async fn connect(config: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url())
        .await?;
    Ok(pool)
}

/// apply the bundled schema migrations
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database migrations applied");
    Ok(())
}
