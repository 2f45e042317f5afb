use std::sync::Arc;

use tracing::{debug, error, info, warn};

use abi::errors::{Error, Result};
use abi::types::{
    FriendList, MembershipKind, MessageResponse, PendingRequests, SentRequests, User, UserId,
    UserSummary, REQUEST_ACCEPTED, REQUEST_REJECTED, REQUEST_SENT,
};
use db::{ConnectionStore, ConnectionTx, DbRepo, UserRepo};

use crate::lock::PairLocks;

/// Friend request state machine: NONE -> REQUESTED -> ACCEPTED, or back to
/// NONE on reject. The only component allowed to mutate records and
/// memberships.
#[derive(Debug, Clone)]
pub struct ConnectionService {
    store: Arc<dyn ConnectionStore>,
    users: Arc<dyn UserRepo>,
    locks: PairLocks,
}

impl ConnectionService {
    pub fn new(store: Arc<dyn ConnectionStore>, users: Arc<dyn UserRepo>) -> Self {
        Self {
            store,
            users,
            locks: PairLocks::new(),
        }
    }

    pub fn from_repo(repo: &DbRepo) -> Self {
        Self::new(repo.connection.clone(), repo.user.clone())
    }

    /// resolve the caller handed over by the identity layer
    pub async fn authenticate(&self, caller: UserId) -> Result<User> {
        self.users
            .get_user(caller)
            .await?
            .ok_or_else(|| Error::unauthenticated(format!("unknown caller {caller}")))
    }

    pub async fn user(&self, id: UserId) -> Result<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| Error::user_not_found(format!("user {id}")))
    }

    pub async fn send_request(&self, caller: UserId, target: UserId) -> Result<MessageResponse> {
        if caller == target {
            return Err(Error::self_request());
        }
        if self.users.get_user(target).await?.is_none() {
            return Err(Error::target_not_found(format!("user {target}")));
        }

        let _pair = self.locks.lock(caller, target).await;
        let mut tx = self.store.begin().await?;
        // an account may have been removed while this call waited for the unit of work
        if let Err(e) = self.check_parties(caller, target).await {
            return Err(Self::abort(tx, e).await);
        }
        match Self::apply_send(tx.as_mut(), caller, target).await {
            Ok(()) => tx.commit().await?,
            Err(e) => return Err(Self::abort(tx, e).await),
        }
        info!("friend request sent: {caller} -> {target}");
        Ok(MessageResponse::new(REQUEST_SENT))
    }

    pub async fn accept_request(
        &self,
        caller: UserId,
        from_user: UserId,
    ) -> Result<MessageResponse> {
        let _pair = self.locks.lock(from_user, caller).await;
        let mut tx = self.store.begin().await?;
        match Self::apply_accept(tx.as_mut(), caller, from_user).await {
            Ok(()) => tx.commit().await?,
            Err(e) => return Err(Self::abort(tx, e).await),
        }
        info!("friend request accepted: {from_user} -> {caller}");
        Ok(MessageResponse::new(REQUEST_ACCEPTED))
    }

    pub async fn reject_request(
        &self,
        caller: UserId,
        from_user: UserId,
    ) -> Result<MessageResponse> {
        let _pair = self.locks.lock(from_user, caller).await;
        let mut tx = self.store.begin().await?;
        match Self::apply_reject(tx.as_mut(), caller, from_user).await {
            Ok(()) => tx.commit().await?,
            Err(e) => return Err(Self::abort(tx, e).await),
        }
        info!("friend request rejected: {from_user} -> {caller}");
        Ok(MessageResponse::new(REQUEST_REJECTED))
    }

    pub async fn list_pending(&self, caller: UserId) -> Result<PendingRequests> {
        Ok(PendingRequests {
            pending_requests: self.summaries(caller, MembershipKind::Pending).await?,
        })
    }

    pub async fn list_sent(&self, caller: UserId) -> Result<SentRequests> {
        Ok(SentRequests {
            sent_requests: self.summaries(caller, MembershipKind::Sent).await?,
        })
    }

    pub async fn list_friends(&self, caller: UserId) -> Result<FriendList> {
        Ok(FriendList {
            friends: self.summaries(caller, MembershipKind::Friend).await?,
        })
    }

    /// Account deletion. The account goes first so that any unit of work
    /// started afterwards sees it missing, then every record and membership
    /// mentioning the user is cleared. Calling it again for a vanished account
    /// still clears leftovers before reporting UserNotFound.
    pub async fn remove_user(&self, id: UserId) -> Result<()> {
        let existed = self.users.delete_user(id).await?;
        let mut tx = self.store.begin().await?;
        if let Err(e) = tx.purge_user(id).await {
            return Err(Self::abort(tx, e).await);
        }
        tx.commit().await?;
        if !existed {
            return Err(Error::user_not_found(format!("user {id}")));
        }
        info!("user {id} removed");
        Ok(())
    }

    async fn check_parties(&self, caller: UserId, target: UserId) -> Result<()> {
        if self.users.get_user(caller).await?.is_none() {
            return Err(Error::unauthenticated(format!("unknown caller {caller}")));
        }
        if self.users.get_user(target).await?.is_none() {
            return Err(Error::target_not_found(format!("user {target}")));
        }
        Ok(())
    }

    async fn apply_send(tx: &mut dyn ConnectionTx, caller: UserId, target: UserId) -> Result<()> {
        // an accepted reverse record already makes them friends
        if let Some(reverse) = tx.find_record(target, caller).await? {
            if reverse.accepted {
                return Err(Error::duplicate_request());
            }
        }
        // a pending target -> caller request is left alone and coexists with this one
        if tx.create_record(caller, target).await?.is_none() {
            return Err(Error::duplicate_request());
        }
        tx.add_sent(caller, target).await?;
        tx.add_pending(target, caller).await?;
        debug!("{caller} -> {target}: NONE -> REQUESTED");
        Ok(())
    }

    async fn apply_accept(tx: &mut dyn ConnectionTx, caller: UserId, from_user: UserId) -> Result<()> {
        let record = tx
            .find_record(from_user, caller)
            .await?
            .ok_or_else(|| Error::connection_not_found(format!("{from_user} -> {caller}")))?;
        if record.accepted {
            return Err(Error::already_accepted());
        }
        // the record stays as the trace of who asked whom
        tx.set_accepted(&record).await?;
        tx.remove_pending(caller, from_user).await?;
        tx.remove_sent(from_user, caller).await?;
        tx.add_friend(caller, from_user).await?;
        tx.add_friend(from_user, caller).await?;
        debug!("{from_user} -> {caller}: REQUESTED -> ACCEPTED");
        Ok(())
    }

    async fn apply_reject(tx: &mut dyn ConnectionTx, caller: UserId, from_user: UserId) -> Result<()> {
        let record = tx
            .find_record(from_user, caller)
            .await?
            .ok_or_else(|| Error::connection_not_found(format!("{from_user} -> {caller}")))?;
        if record.accepted {
            return Err(Error::already_accepted());
        }
        tx.delete_record(&record).await?;
        tx.remove_pending(caller, from_user).await?;
        tx.remove_sent(from_user, caller).await?;
        debug!("{from_user} -> {caller}: REQUESTED -> NONE");
        Ok(())
    }

    /// roll the unit back and pass the failure through
    async fn abort(tx: Box<dyn ConnectionTx>, e: Error) -> Error {
        warn!("rolling back: {e}");
        if let Err(rollback) = tx.rollback().await {
            error!("rollback failed: {rollback}");
        }
        e
    }

    async fn summaries(&self, owner: UserId, kind: MembershipKind) -> Result<Vec<UserSummary>> {
        let ids = self.store.members(owner, kind).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let users = self.users.get_users(&ids).await?;
        Ok(users.iter().map(UserSummary::from).collect())
    }
}
