//! Partition key strategy.
//!
//! Pure, deterministic key derivation for every row the store writes. The
//! key grammar:
//!
//! - session rows:  partition `USER#{id}` or `ORG#{id}`, sort `SESSION#{sessionId}`
//! - message rows:  partition `SESSION#{sessionId}`, sort `MSG#{millis:016}#{messageId}`
//!
//! Personal and Organization scopes map into disjoint namespaces by prefix:
//! no tenant id string can make `USER#...` equal `ORG#...`, because the
//! prefixes differ before any caller-controlled bytes begin. Messages are
//! partitioned by session so a session's full message range is one
//! contiguous scan, and the zero-padded millisecond timestamp makes
//! lexicographic sort-key order equal chronological order.

use chrono::{DateTime, Utc};
use parlor_types::owner::OwnerScope;

use crate::store::RecordKey;

/// Sort-key prefix of session rows within an owner partition.
pub const SESSION_SORT_PREFIX: &str = "SESSION#";

/// Sort-key prefix of message rows within a session partition.
pub const MESSAGE_SORT_PREFIX: &str = "MSG#";

/// Width of the zero-padded millisecond timestamp in message sort keys.
const TIMESTAMP_WIDTH: usize = 16;

/// Deterministic tenant-scoped key derivation. No I/O, no failure modes.
pub struct PartitionKeyStrategy;

impl PartitionKeyStrategy {
    /// Partition key grouping all of an owner's session rows.
    pub fn owner_partition(owner: &OwnerScope) -> String {
        match owner {
            OwnerScope::Personal { user_id } => format!("USER#{user_id}"),
            OwnerScope::Organization { organization_id } => format!("ORG#{organization_id}"),
        }
    }

    /// Sort key of a session row.
    pub fn session_sort(session_id: &str) -> String {
        format!("{SESSION_SORT_PREFIX}{session_id}")
    }

    /// Full key of a session row.
    pub fn session_key(owner: &OwnerScope, session_id: &str) -> RecordKey {
        RecordKey::new(Self::owner_partition(owner), Self::session_sort(session_id))
    }

    /// Partition key grouping all of a session's message rows.
    pub fn message_partition(session_id: &str) -> String {
        format!("SESSION#{session_id}")
    }

    /// Sort key of a message row; orders by (timestamp, message_id).
    pub fn message_sort(timestamp: DateTime<Utc>, message_id: &str) -> String {
        format!(
            "{MESSAGE_SORT_PREFIX}{millis:0width$}#{message_id}",
            millis = timestamp.timestamp_millis(),
            width = TIMESTAMP_WIDTH,
        )
    }

    /// Full key of a message row.
    pub fn message_key(
        session_id: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
    ) -> RecordKey {
        RecordKey::new(
            Self::message_partition(session_id),
            Self::message_sort(timestamp, message_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_owner_partitions_are_disjoint() {
        // Adversarial ids cannot cross the namespace boundary.
        let user = OwnerScope::personal("ORG#evil");
        let org = OwnerScope::organization("evil");
        assert_eq!(PartitionKeyStrategy::owner_partition(&user), "USER#ORG#evil");
        assert_eq!(PartitionKeyStrategy::owner_partition(&org), "ORG#evil");
        assert_ne!(
            PartitionKeyStrategy::owner_partition(&OwnerScope::personal("x")),
            PartitionKeyStrategy::owner_partition(&OwnerScope::organization("x")),
        );
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let owner = OwnerScope::organization("org-7");
        let a = PartitionKeyStrategy::session_key(&owner, "s1");
        let b = PartitionKeyStrategy::session_key(&owner, "s1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_message_sort_orders_by_timestamp_then_id() {
        let t1 = Utc.timestamp_millis_opt(100).unwrap();
        let t2 = Utc.timestamp_millis_opt(105).unwrap();
        let early = PartitionKeyStrategy::message_sort(t1, "m-b");
        let tie = PartitionKeyStrategy::message_sort(t1, "m-c");
        let late = PartitionKeyStrategy::message_sort(t2, "m-a");
        assert!(early < tie);
        assert!(tie < late);
    }

    #[test]
    fn test_message_sort_zero_padding_survives_magnitude_change() {
        // 999...ms vs 1000...ms must still order correctly lexicographically.
        let t1 = Utc.timestamp_millis_opt(999).unwrap();
        let t2 = Utc.timestamp_millis_opt(1000).unwrap();
        let a = PartitionKeyStrategy::message_sort(t1, "m");
        let b = PartitionKeyStrategy::message_sort(t2, "m");
        assert!(a < b);
    }
}
