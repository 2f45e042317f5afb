use std::{path::Path, thread};

use sqlx::PgPool;
use tokio::runtime::Runtime;
use tracing::debug;

use abi::config::PostgresConfig;

/// A throwaway database: created with migrations applied on `new`,
/// dropped together with every open connection on `Drop`.
pub struct TestDb {
    config: PostgresConfig,
}

impl TestDb {
    /// `config.database` is ignored, a fresh `test_<uuid>` database is used instead
    pub fn new(config: &PostgresConfig, migrations: impl Into<String>) -> TestDb {
        let mut config = config.clone();
        config.database = format!("test_{}", uuid::Uuid::new_v4().simple());
        let server_url = config.server_url();
        let url = config.url();
        let dbname = config.database.clone();
        let migrations = migrations.into();
        // the caller may already be inside a runtime, so do the setup on a separate one
        thread::spawn(move || {
            Runtime::new().unwrap().block_on(async move {
                let conn = PgPool::connect(&server_url).await.unwrap();
                sqlx::query(&format!(r#"CREATE DATABASE "{}""#, dbname))
                    .execute(&conn)
                    .await
                    .unwrap();

                let conn = PgPool::connect(&url).await.unwrap();
                sqlx::migrate::Migrator::new(Path::new(&migrations))
                    .await
                    .unwrap()
                    .run(&conn)
                    .await
                    .unwrap();
            });
        })
        .join()
        .unwrap();
        debug!("created test database {}", config.database);
        TestDb { config }
    }

    pub fn url(&self) -> String {
        self.config.url()
    }

    pub async fn pool(&self) -> PgPool {
        sqlx::Pool::connect(&self.url()).await.unwrap()
    }

    pub fn dbname(&self) -> &str {
        &self.config.database
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let server_url = self.config.server_url();
        let dbname = self.config.database.clone();
        thread::spawn(move || {
            Runtime::new().unwrap().block_on(async move {
                let conn = PgPool::connect(&server_url).await.unwrap();
                sqlx::query(&format!(r#"SELECT pg_terminate_backend(pg_stat_activity.pid) FROM pg_stat_activity WHERE pg_stat_activity.datname = '{dbname}' AND pid <> pg_backend_pid();"#))
                    .execute(&conn)
                    .await
                    .unwrap();
                sqlx::query(&format!(r#"DROP DATABASE "{dbname}""#))
                    .execute(&conn)
                    .await
                    .unwrap();
            });
        }).join().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::TestDb;
    use abi::config::Config;

    #[tokio::test]
    #[ignore = "requires a running postgres"]
    async fn test_db_has_schema() {
        let config = Config::load("../abi/fixtures/social.yml").unwrap();
        let tdb = TestDb::new(&config.db.postgres, "../db/migrations");
        assert!(tdb.dbname().starts_with("test_"));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM connections")
            .fetch_one(&tdb.pool().await)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
