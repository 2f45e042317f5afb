use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

use abi::errors::{Error, Result};
use abi::types::{ConnectionRecord, MembershipEntry, MembershipKind, UserId};

use crate::connection::{ConnectionStore, ConnectionTx};

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<(UserId, UserId), ConnectionRecord>,
    index: BTreeMap<UserId, MembershipEntry>,
}

/// inverse of one applied change
#[derive(Debug)]
enum Undo {
    RemoveRecord((UserId, UserId)),
    RestoreRecord(ConnectionRecord),
    RemoveMember(UserId, MembershipKind, UserId),
    InsertMember(UserId, MembershipKind, UserId),
}

/// Step at which an armed failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateRecord,
    FindRecord,
    SetAccepted,
    DeleteRecord,
    AddMember(MembershipKind),
    RemoveMember(MembershipKind),
    PurgeUser,
    Commit,
}

#[cfg(any(test, feature = "failpoints"))]
type Armed = Arc<std::sync::Mutex<Option<FailPoint>>>;

/// In-process arena. A transaction holds the write lock for its whole
/// lifetime, list reads take the read lock only while copying a set out.
#[derive(Debug, Default, Clone)]
pub struct MemoryConnection {
    state: Arc<RwLock<State>>,
    #[cfg(any(test, feature = "failpoints"))]
    armed: Armed,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// the next transaction step matching `point` fails with a storage error
    #[cfg(any(test, feature = "failpoints"))]
    pub fn fail_next(&self, point: FailPoint) {
        if let Ok(mut armed) = self.armed.lock() {
            *armed = Some(point);
        }
    }

    /// snapshot of one user's entry, for assertions
    pub async fn entry(&self, owner: UserId) -> Option<MembershipEntry> {
        self.state.read().await.index.get(&owner).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnection {
    async fn begin(&self) -> Result<Box<dyn ConnectionTx>> {
        let state = self.state.clone().write_owned().await;
        Ok(Box::new(MemoryTx {
            state,
            undo: Vec::new(),
            done: false,
            #[cfg(any(test, feature = "failpoints"))]
            armed: self.armed.clone(),
        }))
    }

    async fn members(&self, owner: UserId, kind: MembershipKind) -> Result<Vec<UserId>> {
        let state = self.state.read().await;
        Ok(state
            .index
            .get(&owner)
            .map(|entry| entry.set(kind).iter().copied().collect())
            .unwrap_or_default())
    }

    async fn get_record(&self, from: UserId, to: UserId) -> Result<Option<ConnectionRecord>> {
        Ok(self.state.read().await.records.get(&(from, to)).cloned())
    }
}

pub struct MemoryTx {
    state: OwnedRwLockWriteGuard<State>,
    undo: Vec<Undo>,
    done: bool,
    #[cfg(any(test, feature = "failpoints"))]
    armed: Armed,
}

impl MemoryTx {
    #[cfg(any(test, feature = "failpoints"))]
    fn check(&self, point: FailPoint) -> Result<()> {
        let mut armed = self
            .armed
            .lock()
            .map_err(|_| Error::storage("failpoint lock poisoned"))?;
        if *armed == Some(point) {
            *armed = None;
            return Err(Error::storage(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    #[cfg(not(any(test, feature = "failpoints")))]
    #[inline]
    fn check(&self, _point: FailPoint) -> Result<()> {
        Ok(())
    }

    fn insert_member(&mut self, owner: UserId, kind: MembershipKind, other: UserId) -> bool {
        self.state
            .index
            .entry(owner)
            .or_insert_with(|| MembershipEntry::new(owner))
            .insert(kind, other)
    }

    fn take_member(&mut self, owner: UserId, kind: MembershipKind, other: UserId) -> bool {
        self.state
            .index
            .get_mut(&owner)
            .map(|entry| entry.remove(kind, other))
            .unwrap_or(false)
    }

    fn undo_all(&mut self) {
        while let Some(change) = self.undo.pop() {
            match change {
                Undo::RemoveRecord(key) => {
                    self.state.records.remove(&key);
                }
                Undo::RestoreRecord(record) => {
                    self.state.records.insert(record.key(), record);
                }
                Undo::RemoveMember(owner, kind, other) => {
                    self.take_member(owner, kind, other);
                }
                Undo::InsertMember(owner, kind, other) => {
                    self.insert_member(owner, kind, other);
                }
            }
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.done && !self.undo.is_empty() {
            debug!("rolling back {} uncommitted changes", self.undo.len());
            self.undo_all();
        }
    }
}

#[async_trait]
impl ConnectionTx for MemoryTx {
    async fn create_record(
        &mut self,
        from: UserId,
        to: UserId,
    ) -> Result<Option<ConnectionRecord>> {
        self.check(FailPoint::CreateRecord)?;
        if self.state.records.contains_key(&(from, to)) {
            return Ok(None);
        }
        let record = ConnectionRecord::new(from, to);
        self.state.records.insert(record.key(), record.clone());
        self.undo.push(Undo::RemoveRecord(record.key()));
        Ok(Some(record))
    }

    async fn find_record(&mut self, from: UserId, to: UserId) -> Result<Option<ConnectionRecord>> {
        self.check(FailPoint::FindRecord)?;
        Ok(self.state.records.get(&(from, to)).cloned())
    }

    async fn set_accepted(&mut self, record: &ConnectionRecord) -> Result<ConnectionRecord> {
        self.check(FailPoint::SetAccepted)?;
        let stored = self
            .state
            .records
            .get_mut(&record.key())
            .ok_or_else(|| Error::storage("record vanished inside transaction"))?;
        let previous = stored.clone();
        stored.accepted = true;
        let updated = stored.clone();
        self.undo.push(Undo::RestoreRecord(previous));
        Ok(updated)
    }

    async fn delete_record(&mut self, record: &ConnectionRecord) -> Result<()> {
        self.check(FailPoint::DeleteRecord)?;
        if let Some(previous) = self.state.records.remove(&record.key()) {
            self.undo.push(Undo::RestoreRecord(previous));
        }
        Ok(())
    }

    async fn add_member(
        &mut self,
        owner: UserId,
        kind: MembershipKind,
        other: UserId,
    ) -> Result<()> {
        self.check(FailPoint::AddMember(kind))?;
        if self.insert_member(owner, kind, other) {
            self.undo.push(Undo::RemoveMember(owner, kind, other));
        }
        Ok(())
    }

    async fn remove_member(
        &mut self,
        owner: UserId,
        kind: MembershipKind,
        other: UserId,
    ) -> Result<()> {
        self.check(FailPoint::RemoveMember(kind))?;
        if self.take_member(owner, kind, other) {
            self.undo.push(Undo::InsertMember(owner, kind, other));
        }
        Ok(())
    }

    async fn purge_user(&mut self, user: UserId) -> Result<()> {
        self.check(FailPoint::PurgeUser)?;
        let keys: Vec<_> = self
            .state
            .records
            .keys()
            .filter(|(from, to)| *from == user || *to == user)
            .copied()
            .collect();
        for key in keys {
            if let Some(record) = self.state.records.remove(&key) {
                self.undo.push(Undo::RestoreRecord(record));
            }
        }

        let mut removed = Vec::new();
        for (owner, entry) in self.state.index.iter_mut() {
            for kind in MembershipKind::ALL {
                if *owner == user {
                    removed.extend(entry.set(kind).iter().map(|other| (*owner, kind, *other)));
                    entry.set_mut(kind).clear();
                } else if entry.remove(kind, user) {
                    removed.push((*owner, kind, user));
                }
            }
        }
        self.undo.extend(
            removed
                .into_iter()
                .map(|(owner, kind, other)| Undo::InsertMember(owner, kind, other)),
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.check(FailPoint::Commit)?;
        tx.done = true;
        debug!("committed {} changes", tx.undo.len());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.undo_all();
        tx.done = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::errors::ErrorKind;

    #[tokio::test]
    async fn create_rejects_existing_ordered_pair_only() {
        let store = MemoryConnection::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.create_record(1, 2).await.unwrap().is_some());
        assert!(tx.create_record(1, 2).await.unwrap().is_none());
        assert!(tx.create_record(2, 1).await.unwrap().is_some());
        tx.commit().await.unwrap();
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryConnection::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.create_record(1, 2).await.unwrap();
            tx.add_sent(1, 2).await.unwrap();
            tx.add_pending(2, 1).await.unwrap();
        }
        assert!(store.get_record(1, 2).await.unwrap().is_none());
        assert!(store.members(1, MembershipKind::Sent).await.unwrap().is_empty());
        assert!(store.members(2, MembershipKind::Pending).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_restores_accepted_flag_and_sets() {
        let store = MemoryConnection::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_record(1, 2).await.unwrap();
        tx.add_sent(1, 2).await.unwrap();
        tx.add_pending(2, 1).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let record = tx.find_record(1, 2).await.unwrap().unwrap();
        tx.set_accepted(&record).await.unwrap();
        tx.remove_pending(2, 1).await.unwrap();
        tx.remove_sent(1, 2).await.unwrap();
        tx.add_friend(2, 1).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(!store.get_record(1, 2).await.unwrap().unwrap().accepted);
        assert_eq!(store.members(1, MembershipKind::Sent).await.unwrap(), vec![2]);
        assert_eq!(store.members(2, MembershipKind::Pending).await.unwrap(), vec![1]);
        assert!(store.members(2, MembershipKind::Friend).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn members_are_sorted_by_id() {
        let store = MemoryConnection::new();
        let mut tx = store.begin().await.unwrap();
        for other in [9, 3, 5] {
            tx.add_pending(1, other).await.unwrap();
        }
        tx.commit().await.unwrap();
        assert_eq!(
            store.members(1, MembershipKind::Pending).await.unwrap(),
            vec![3, 5, 9]
        );
        assert!(store.members(42, MembershipKind::Friend).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_from_missing_entry_is_a_no_op() {
        let store = MemoryConnection::new();
        let mut tx = store.begin().await.unwrap();
        tx.remove_friend(5, 6).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.entry(5).await.is_none());
    }

    #[tokio::test]
    async fn armed_failure_fires_once() {
        let store = MemoryConnection::new();
        store.fail_next(FailPoint::AddMember(MembershipKind::Pending));
        let mut tx = store.begin().await.unwrap();
        tx.add_sent(1, 2).await.unwrap();
        let err = tx.add_pending(2, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        tx.add_pending(2, 1).await.unwrap();
    }

    #[tokio::test]
    async fn failed_commit_rolls_back() {
        let store = MemoryConnection::new();
        store.fail_next(FailPoint::Commit);
        let mut tx = store.begin().await.unwrap();
        tx.create_record(1, 2).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(store.get_record(1, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_user_removes_every_mention() {
        let store = MemoryConnection::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_record(1, 2).await.unwrap();
        tx.create_record(3, 1).await.unwrap();
        tx.add_sent(1, 2).await.unwrap();
        tx.add_pending(2, 1).await.unwrap();
        tx.add_friend(3, 1).await.unwrap();
        tx.add_friend(1, 3).await.unwrap();
        tx.add_friend(2, 3).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.purge_user(1).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.record_count().await, 0);
        assert!(store.entry(1).await.unwrap().is_empty());
        assert!(store.members(2, MembershipKind::Pending).await.unwrap().is_empty());
        assert!(store.members(3, MembershipKind::Friend).await.unwrap().is_empty());
        assert_eq!(store.members(2, MembershipKind::Friend).await.unwrap(), vec![3]);
    }
}
