//! DocumentStore trait and record schema.
//!
//! The conversation store talks to its backing database exclusively through
//! this port: a partition/sort keyed document store with atomic attribute
//! updates. Implementations live in parlor-infra (in-memory engine,
//! DynamoDB). Uses native async fn in traits (RPITIT, Rust 2024 edition).

use chrono::{DateTime, Utc};
use parlor_types::chat::{ChatMessage, ChatSession};
use parlor_types::error::StoreError;
use serde::{Deserialize, Serialize};

/// Composite key addressing one row.
///
/// Keys are opaque strings built exclusively by `keys::PartitionKeyStrategy`;
/// no other component constructs them directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub partition: String,
    pub sort: String,
}

impl RecordKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// A persisted row, tagged by kind.
///
/// The tag is validated at the store boundary: asking a session row for a
/// message (or vice versa) is a schema violation, not a silent cast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "lowercase")]
pub enum StoredRecord {
    Session(ChatSession),
    Message(ChatMessage),
}

impl StoredRecord {
    /// Store-level expiry instant for this row.
    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            StoredRecord::Session(s) => s.expires_at,
            StoredRecord::Message(m) => m.expires_at,
        }
    }

    /// Interpret this row as a session, rejecting message rows.
    pub fn into_session(self) -> Result<ChatSession, StoreError> {
        match self {
            StoredRecord::Session(s) => Ok(s),
            StoredRecord::Message(_) => Err(StoreError::Validation(
                "expected a session row, found a message row".to_string(),
            )),
        }
    }

    /// Interpret this row as a message, rejecting session rows.
    pub fn into_message(self) -> Result<ChatMessage, StoreError> {
        match self {
            StoredRecord::Message(m) => Ok(m),
            StoredRecord::Session(_) => Err(StoreError::Validation(
                "expected a message row, found a session row".to_string(),
            )),
        }
    }
}

/// Atomic attribute update on a session row.
///
/// The updatable attributes form a closed set derived from the session
/// counters' invariants, rather than free-form update expressions. Backends
/// must apply a whole batch as one atomic operation per `update` call (or,
/// where the engine cannot combine them, in a sequence that never loses an
/// increment).
#[derive(Debug, Clone)]
pub enum AttributeUpdate {
    /// message_count += n, initializing to n when the attribute is absent.
    IncrementMessageCount(i64),
    /// message_count = n (used by the repair pass; rows are ground truth).
    SetMessageCount(u64),
    /// last_message_at = max(last_message_at, t).
    MaxLastMessageAt(DateTime<Utc>),
    /// Plain overwrite of the session title.
    SetTitle(String),
    /// Plain overwrite of updated_at.
    SetUpdatedAt(DateTime<Utc>),
}

/// Scan direction over a partition's sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Ascending,
    Descending,
}

/// One page of query results.
///
/// `last_sort_key` is set when the page filled up and more rows may remain;
/// passing it back as `start_after` resumes the scan exclusively after it.
#[derive(Debug)]
pub struct QueryPage {
    pub records: Vec<StoredRecord>,
    pub last_sort_key: Option<String>,
}

/// Partition/sort keyed document store with atomic session-counter updates.
///
/// Contract notes:
/// - `put` is an upsert: re-writing an existing key overwrites in place.
/// - `get`/`query` never return rows whose `expires_at` has passed.
/// - `update` applies the batch atomically against the current row and
///   returns `NotFound` when the row is absent. A plain read-modify-write
///   emulation is not a conforming implementation: concurrent increments
///   must never be lost.
/// - `delete` is idempotent: deleting an absent key succeeds.
pub trait DocumentStore: Send + Sync {
    fn put(
        &self,
        key: RecordKey,
        record: StoredRecord,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn get(
        &self,
        key: &RecordKey,
    ) -> impl std::future::Future<Output = Result<Option<StoredRecord>, StoreError>> + Send;

    fn query(
        &self,
        partition: &str,
        sort_prefix: &str,
        order: ScanOrder,
        limit: usize,
        start_after: Option<&str>,
    ) -> impl std::future::Future<Output = Result<QueryPage, StoreError>> + Send;

    fn update(
        &self,
        key: &RecordKey,
        updates: &[AttributeUpdate],
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn delete(
        &self,
        key: &RecordKey,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_types::chat::MessageRole;
    use parlor_types::owner::OwnerScope;

    fn sample_session() -> ChatSession {
        let now = Utc::now();
        ChatSession {
            session_id: "s1".to_string(),
            owner: OwnerScope::personal("u1"),
            title: "hello".to_string(),
            backend: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            message_count: 0,
            created_at: now,
            updated_at: now,
            last_message_at: now,
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            expires_at: now,
        }
    }

    #[test]
    fn test_record_tag_roundtrip() {
        let record = StoredRecord::Session(sample_session());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"record\":\"session\""));
        let parsed: StoredRecord = serde_json::from_str(&json).unwrap();
        assert!(parsed.into_session().is_ok());
    }

    #[test]
    fn test_kind_mismatch_is_validation_error() {
        let now = Utc::now();
        let record = StoredRecord::Message(ChatMessage {
            session_id: "s1".to_string(),
            message_id: "m1".to_string(),
            role: MessageRole::User,
            content: "hi".to_string(),
            timestamp: now,
            usage: None,
            context: None,
            expires_at: now,
        });
        assert!(matches!(
            record.into_session(),
            Err(StoreError::Validation(_))
        ));
    }
}
