use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Error, FromRow, Row};

use super::{UserId, UserSummary};

pub const REQUEST_SENT: &str = "Friend request sent successfully.";
pub const REQUEST_ACCEPTED: &str = "Friend request accepted successfully.";
pub const REQUEST_REJECTED: &str = "Friend request rejected successfully.";

/// A directed friend request. At most one exists per ordered (from, to) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub from_user: UserId,
    pub to_user: UserId,
    pub created_at: DateTime<Utc>,
    pub accepted: bool,
}

impl ConnectionRecord {
    pub fn new(from_user: UserId, to_user: UserId) -> Self {
        Self {
            from_user,
            to_user,
            created_at: Utc::now(),
            accepted: false,
        }
    }

    #[inline]
    pub fn key(&self) -> (UserId, UserId) {
        (self.from_user, self.to_user)
    }
}

impl FromRow<'_, PgRow> for ConnectionRecord {
    fn from_row(row: &'_ PgRow) -> Result<Self, Error> {
        Ok(Self {
            from_user: row.try_get("from_user")?,
            to_user: row.try_get("to_user")?,
            created_at: row.try_get("created_time")?,
            accepted: row.try_get("accepted")?,
        })
    }
}

/// which of the three per-user sets a membership belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MembershipKind {
    Friend,
    Sent,
    Pending,
}

impl MembershipKind {
    pub const ALL: [MembershipKind; 3] = [Self::Friend, Self::Sent, Self::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipKind::Friend => "friend",
            MembershipKind::Sent => "sent",
            MembershipKind::Pending => "pending",
        }
    }
}

/// Denormalized view of one user's relationships.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    pub owner: UserId,
    pub friends: BTreeSet<UserId>,
    pub sent_requests: BTreeSet<UserId>,
    pub pending_requests: BTreeSet<UserId>,
}

impl MembershipEntry {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            ..Default::default()
        }
    }

    pub fn set(&self, kind: MembershipKind) -> &BTreeSet<UserId> {
        match kind {
            MembershipKind::Friend => &self.friends,
            MembershipKind::Sent => &self.sent_requests,
            MembershipKind::Pending => &self.pending_requests,
        }
    }

    pub fn set_mut(&mut self, kind: MembershipKind) -> &mut BTreeSet<UserId> {
        match kind {
            MembershipKind::Friend => &mut self.friends,
            MembershipKind::Sent => &mut self.sent_requests,
            MembershipKind::Pending => &mut self.pending_requests,
        }
    }

    /// Returns whether the member was newly inserted.
    pub fn insert(&mut self, kind: MembershipKind, other: UserId) -> bool {
        self.set_mut(kind).insert(other)
    }

    /// Returns whether the member was present.
    pub fn remove(&mut self, kind: MembershipKind, other: UserId) -> bool {
        self.set_mut(kind).remove(&other)
    }

    pub fn contains(&self, kind: MembershipKind, other: UserId) -> bool {
        self.set(kind).contains(&other)
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty() && self.sent_requests.is_empty() && self.pending_requests.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequests {
    pub pending_requests: Vec<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRequests {
    pub sent_requests: Vec<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendList {
    pub friends: Vec<UserSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_stored_values() {
        let names: Vec<_> = MembershipKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["friend", "sent", "pending"]);
    }

    #[test]
    fn entry_sets_are_independent() {
        let mut entry = MembershipEntry::new(1);
        assert!(entry.insert(MembershipKind::Sent, 2));
        assert!(!entry.insert(MembershipKind::Sent, 2));
        assert!(entry.contains(MembershipKind::Sent, 2));
        assert!(!entry.contains(MembershipKind::Friend, 2));
        assert!(entry.remove(MembershipKind::Sent, 2));
        assert!(!entry.remove(MembershipKind::Sent, 2));
        assert!(entry.is_empty());
    }

    #[test]
    fn list_payload_field_names() {
        let list = PendingRequests {
            pending_requests: vec![UserSummary {
                id: 3,
                display_name: "user_3".to_string(),
            }],
        };
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["pending_requests"][0]["id"], 3);
        assert_eq!(json["pending_requests"][0]["display_name"], "user_3");
    }
}
