use std::fmt::Debug;

use async_trait::async_trait;

use abi::errors::Result;
use abi::types::{ConnectionRecord, MembershipKind, UserId};

/// Holds the connection records together with the membership index.
///
/// Every mutation goes through a [`ConnectionTx`] so that a record change and
/// the index changes of both parties land together or not at all.
#[async_trait]
pub trait ConnectionStore: Sync + Send + Debug {
    /// open a unit of work over records and memberships
    async fn begin(&self) -> Result<Box<dyn ConnectionTx>>;

    /// members of one of `owner`'s sets, ordered by id; empty when the owner has no entry
    async fn members(&self, owner: UserId, kind: MembershipKind) -> Result<Vec<UserId>>;

    /// read-only lookup outside of any transaction
    async fn get_record(&self, from: UserId, to: UserId) -> Result<Option<ConnectionRecord>>;
}

/// A unit of work. Dropping it without `commit` discards every change.
#[async_trait]
pub trait ConnectionTx: Send {
    /// insert a pending record; `None` when the ordered pair already has one
    async fn create_record(&mut self, from: UserId, to: UserId)
        -> Result<Option<ConnectionRecord>>;

    /// lookup the record of the ordered pair, locking it until the end of the unit
    async fn find_record(&mut self, from: UserId, to: UserId) -> Result<Option<ConnectionRecord>>;

    /// flip the accepted flag; the caller checks the current value first
    async fn set_accepted(&mut self, record: &ConnectionRecord) -> Result<ConnectionRecord>;

    async fn delete_record(&mut self, record: &ConnectionRecord) -> Result<()>;

    /// put `other` into `owner`'s set, creating the entry when needed
    async fn add_member(&mut self, owner: UserId, kind: MembershipKind, other: UserId)
        -> Result<()>;

    async fn remove_member(
        &mut self,
        owner: UserId,
        kind: MembershipKind,
        other: UserId,
    ) -> Result<()>;

    /// drop every record and membership that mentions `user`
    async fn purge_user(&mut self, user: UserId) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    async fn add_sent(&mut self, user: UserId, other: UserId) -> Result<()> {
        self.add_member(user, MembershipKind::Sent, other).await
    }

    async fn add_pending(&mut self, user: UserId, other: UserId) -> Result<()> {
        self.add_member(user, MembershipKind::Pending, other).await
    }

    async fn add_friend(&mut self, user: UserId, other: UserId) -> Result<()> {
        self.add_member(user, MembershipKind::Friend, other).await
    }

    async fn remove_sent(&mut self, user: UserId, other: UserId) -> Result<()> {
        self.remove_member(user, MembershipKind::Sent, other).await
    }

    async fn remove_pending(&mut self, user: UserId, other: UserId) -> Result<()> {
        self.remove_member(user, MembershipKind::Pending, other).await
    }

    async fn remove_friend(&mut self, user: UserId, other: UserId) -> Result<()> {
        self.remove_member(user, MembershipKind::Friend, other).await
    }
}
