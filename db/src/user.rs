use std::fmt::Debug;

use async_trait::async_trait;

use abi::errors::Result;
use abi::types::{NewUser, User, UserId};

/// The user directory. Identity and account data live here;
/// the connection subsystem only reads from it.
#[async_trait]
pub trait UserRepo: Sync + Send + Debug {
    /// create user, the id is assigned by the directory
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// get user by id
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// get every user whose id is in `ids`, ordered by id; unknown ids are skipped
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>>;

    /// returns whether the user existed
    async fn delete_user(&self, id: UserId) -> Result<bool>;
}
