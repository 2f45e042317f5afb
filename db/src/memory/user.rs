use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use abi::errors::{Error, Result};
use abi::types::{NewUser, User, UserId};

use crate::user::UserRepo;

#[derive(Debug)]
pub struct MemoryUser {
    users: RwLock<BTreeMap<UserId, User>>,
    next_id: AtomicI64,
}

impl Default for MemoryUser {
    fn default() -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemoryUser {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryUser {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == user.username) {
            return Err(Error::username_taken(user.username));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user = User {
            id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            created_at: chrono::Utc::now(),
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let users = self.users.read().await;
        let mut list: Vec<User> = ids.iter().filter_map(|id| users.get(id).cloned()).collect();
        list.sort_by_key(|u| u.id);
        list.dedup_by_key(|u| u.id);
        Ok(list)
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        Ok(self.users.write().await.remove(&id).is_some())
    }
}
