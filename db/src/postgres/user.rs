use async_trait::async_trait;
use sqlx::PgPool;

use abi::errors::{Error, Result};
use abi::types::{NewUser, User, UserId};

use crate::user::UserRepo;

#[derive(Debug, Clone)]
pub struct PostgresUser {
    pool: PgPool,
}

impl PostgresUser {
    pub fn new(pool: PgPool) -> Self {
        PostgresUser { pool }
    }
}

#[async_trait]
impl UserRepo for PostgresUser {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let result = sqlx::query_as(
            "INSERT INTO users (username, email, first_name, last_name, created_time)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(chrono::Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return Error::username_taken(user.username.clone());
                }
            }
            Error::from(e)
        })?;
        Ok(result)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let users = sqlx::query_as("SELECT * FROM users WHERE id = ANY($1) ORDER BY id")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    // connections and memberships go with the row through ON DELETE CASCADE
    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
