use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use abi::errors::Result;
use abi::types::{ConnectionRecord, MembershipKind, UserId};

use crate::connection::{ConnectionStore, ConnectionTx};

#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: PgPool,
}

impl PostgresConnection {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionStore for PostgresConnection {
    async fn begin(&self) -> Result<Box<dyn ConnectionTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTx { tx }))
    }

    async fn members(&self, owner: UserId, kind: MembershipKind) -> Result<Vec<UserId>> {
        let list = sqlx::query_scalar(
            "SELECT member FROM memberships WHERE owner = $1 AND kind = $2 ORDER BY member",
        )
        .bind(owner)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(list)
    }

    async fn get_record(&self, from: UserId, to: UserId) -> Result<Option<ConnectionRecord>> {
        let record = sqlx::query_as("SELECT * FROM connections WHERE from_user = $1 AND to_user = $2")
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}

/// one database transaction; sqlx rolls it back when dropped uncommitted
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ConnectionTx for PostgresTx {
    async fn create_record(
        &mut self,
        from: UserId,
        to: UserId,
    ) -> Result<Option<ConnectionRecord>> {
        // a concurrent insert of the same pair blocks on the primary key
        // until the other transaction ends, then sees the conflict
        let record = sqlx::query_as(
            "INSERT INTO connections (from_user, to_user, created_time, accepted)
             VALUES ($1, $2, $3, FALSE)
             ON CONFLICT (from_user, to_user) DO NOTHING
             RETURNING *",
        )
        .bind(from)
        .bind(to)
        .bind(chrono::Utc::now())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(record)
    }

    async fn find_record(&mut self, from: UserId, to: UserId) -> Result<Option<ConnectionRecord>> {
        let record = sqlx::query_as(
            "SELECT * FROM connections WHERE from_user = $1 AND to_user = $2 FOR UPDATE",
        )
        .bind(from)
        .bind(to)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(record)
    }

    async fn set_accepted(&mut self, record: &ConnectionRecord) -> Result<ConnectionRecord> {
        let record = sqlx::query_as(
            "UPDATE connections SET accepted = TRUE
             WHERE from_user = $1 AND to_user = $2
             RETURNING *",
        )
        .bind(record.from_user)
        .bind(record.to_user)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(record)
    }

    async fn delete_record(&mut self, record: &ConnectionRecord) -> Result<()> {
        sqlx::query("DELETE FROM connections WHERE from_user = $1 AND to_user = $2")
            .bind(record.from_user)
            .bind(record.to_user)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn add_member(
        &mut self,
        owner: UserId,
        kind: MembershipKind,
        other: UserId,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO memberships (owner, kind, member) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(owner)
        .bind(kind.as_str())
        .bind(other)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn remove_member(
        &mut self,
        owner: UserId,
        kind: MembershipKind,
        other: UserId,
    ) -> Result<()> {
        sqlx::query("DELETE FROM memberships WHERE owner = $1 AND kind = $2 AND member = $3")
            .bind(owner)
            .bind(kind.as_str())
            .bind(other)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn purge_user(&mut self, user: UserId) -> Result<()> {
        let records = sqlx::query("DELETE FROM connections WHERE from_user = $1 OR to_user = $1")
            .bind(user)
            .execute(&mut *self.tx)
            .await?;
        let members = sqlx::query("DELETE FROM memberships WHERE owner = $1 OR member = $1")
            .bind(user)
            .execute(&mut *self.tx)
            .await?;
        debug!(
            "purged user {user}: {} records, {} memberships",
            records.rows_affected(),
            members.rows_affected()
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PostgresTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PostgresTx { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
