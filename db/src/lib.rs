mod connection;
pub mod memory;
pub mod postgres;
mod user;

use std::sync::Arc;

use tracing::info;

use abi::config::{Config, StorageBackend};
use abi::errors::Result;

pub use crate::connection::{ConnectionStore, ConnectionTx};
pub use crate::user::UserRepo;

/// the repositories every service needs, built for the configured backend
#[derive(Debug, Clone)]
pub struct DbRepo {
    pub user: Arc<dyn UserRepo>,
    pub connection: Arc<dyn ConnectionStore>,
}

impl DbRepo {
    pub async fn new(config: &Config) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Postgres => {
                let pool = postgres::connect(&config.db.postgres).await?;
                postgres::migrate(&pool).await?;
                info!(
                    "using postgres storage at {}:{}",
                    config.db.postgres.host, config.db.postgres.port
                );
                Ok(Self {
                    user: Arc::new(postgres::PostgresUser::new(pool.clone())),
                    connection: Arc::new(postgres::PostgresConnection::new(pool)),
                })
            }
            StorageBackend::Memory => {
                info!("using in-memory storage");
                Ok(Self::memory())
            }
        }
    }

    pub fn memory() -> Self {
        Self {
            user: Arc::new(memory::MemoryUser::new()),
            connection: Arc::new(memory::MemoryConnection::new()),
        }
    }
}
