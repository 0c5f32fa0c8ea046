//! Append-only message store.
//!
//! Messages are keyed by (session_id, timestamp, message_id): two messages
//! sharing a timestamp are both retained and ordered by the message-id
//! tiebreak, and re-submitting a message with an already-used key is an
//! idempotent overwrite, not a duplicate row. After a successful append the
//! caller bumps the session counters via
//! `SessionStore::record_message_appended`; that pairing is best-effort and
//! at-least-once -- the message row stays authoritative even when the
//! counter update fails.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parlor_types::chat::ChatMessage;
use parlor_types::error::StoreError;
use tracing::debug;

use crate::cursor::PaginationCursor;
use crate::keys::{MESSAGE_SORT_PREFIX, PartitionKeyStrategy};
use crate::retention::RetentionPolicy;
use crate::store::{DocumentStore, ScanOrder};

/// Rows removed per deletion batch.
///
/// Matches the DynamoDB batch-write ceiling so one batch maps to one
/// backend round trip at most.
pub const DELETE_BATCH_SIZE: usize = 25;

/// Page size used by internal full scans (tally, repair).
const SCAN_PAGE_SIZE: usize = 100;

/// Result of counting a session's actual message rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTally {
    pub count: u64,
    /// Timestamp of the newest row, when any rows exist.
    pub newest_timestamp: Option<DateTime<Utc>>,
}

/// Append-only store of ordered chat messages, partitioned per session.
pub struct MessageStore<D: DocumentStore> {
    store: Arc<D>,
    retention: RetentionPolicy,
}

impl<D: DocumentStore> Clone for MessageStore<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retention: self.retention,
        }
    }
}

impl<D: DocumentStore> MessageStore<D> {
    pub fn new(store: Arc<D>, retention: RetentionPolicy) -> Self {
        Self { store, retention }
    }

    /// Persist one message row.
    ///
    /// Assigns the retention expiry at write time and returns the stored
    /// message. Upsert semantics make client retries safe.
    pub async fn append_message(
        &self,
        mut message: ChatMessage,
    ) -> Result<ChatMessage, StoreError> {
        if message.session_id.trim().is_empty() {
            return Err(StoreError::Validation(
                "message session_id must not be empty".to_string(),
            ));
        }
        if message.message_id.trim().is_empty() {
            return Err(StoreError::Validation(
                "message_id must not be empty".to_string(),
            ));
        }
        if message.timestamp.timestamp_millis() < 0 {
            // Pre-epoch timestamps would break the zero-padded sort key.
            return Err(StoreError::Validation(
                "message timestamp must not precede the epoch".to_string(),
            ));
        }

        message.expires_at = self.retention.expires_at(Utc::now());
        let key = PartitionKeyStrategy::message_key(
            &message.session_id,
            message.timestamp,
            &message.message_id,
        );
        self.store
            .put(key, crate::store::StoredRecord::Message(message.clone()))
            .await?;
        debug!(
            session_id = %message.session_id,
            message_id = %message.message_id,
            "message appended"
        );
        Ok(message)
    }

    /// List a session's messages oldest-first.
    ///
    /// Total ordering is stable across page boundaries: for a static
    /// dataset, concatenating every page equals one unbounded read.
    pub async fn list_messages(
        &self,
        session_id: &str,
        page_size: usize,
        cursor: Option<&PaginationCursor>,
    ) -> Result<(Vec<ChatMessage>, Option<PaginationCursor>), StoreError> {
        if page_size == 0 {
            return Err(StoreError::Validation(
                "page size must be at least 1".to_string(),
            ));
        }
        let start_after = match cursor {
            Some(c) => Some(c.sort_key()?),
            None => None,
        };
        let page = self
            .store
            .query(
                &PartitionKeyStrategy::message_partition(session_id),
                MESSAGE_SORT_PREFIX,
                ScanOrder::Ascending,
                page_size,
                start_after.as_deref(),
            )
            .await?;

        let mut messages = Vec::with_capacity(page.records.len());
        for record in page.records {
            messages.push(record.into_message()?);
        }
        let next = page.last_sort_key.map(|sk| PaginationCursor::after(&sk));
        Ok((messages, next))
    }

    /// Count actual message rows and find the newest timestamp.
    ///
    /// Scans the whole partition in pages; rows are the ground truth the
    /// repair pass reconciles session counters against.
    pub async fn tally(&self, session_id: &str) -> Result<MessageTally, StoreError> {
        let mut count: u64 = 0;
        let mut newest: Option<DateTime<Utc>> = None;
        let mut cursor: Option<PaginationCursor> = None;

        loop {
            let (messages, next) = self
                .list_messages(session_id, SCAN_PAGE_SIZE, cursor.as_ref())
                .await?;
            count += messages.len() as u64;
            // Ascending scan: the last row of the page carries the max.
            if let Some(last) = messages.last() {
                newest = Some(last.timestamp);
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
            tokio::task::yield_now().await;
        }

        Ok(MessageTally {
            count,
            newest_timestamp: newest,
        })
    }

    /// Delete every message row of a session, in bounded batches.
    ///
    /// Never issues one unbounded delete: very large sessions are drained
    /// `DELETE_BATCH_SIZE` rows at a time, yielding between batches.
    /// Idempotent with respect to already-removed rows, so an interrupted
    /// run is safe to resume. Returns the number of rows removed.
    pub async fn delete_all_messages(&self, session_id: &str) -> Result<u64, StoreError> {
        let partition = PartitionKeyStrategy::message_partition(session_id);
        let mut total: u64 = 0;
        let mut start_after: Option<String> = None;

        loop {
            let page = self
                .store
                .query(
                    &partition,
                    MESSAGE_SORT_PREFIX,
                    ScanOrder::Ascending,
                    DELETE_BATCH_SIZE,
                    start_after.as_deref(),
                )
                .await?;
            if page.records.is_empty() {
                // A backend that filters expired rows after applying its
                // page limit can return zero records with a continuation
                // key. Skip past the filtered region; only a missing key
                // means the partition is drained.
                match page.last_sort_key {
                    Some(sk) => {
                        start_after = Some(sk);
                        tokio::task::yield_now().await;
                        continue;
                    }
                    None => break,
                }
            }

            let batch_len = page.records.len();
            for record in page.records {
                let message = record.into_message()?;
                let key = PartitionKeyStrategy::message_key(
                    &message.session_id,
                    message.timestamp,
                    &message.message_id,
                );
                self.store.delete(&key).await?;
            }
            total += batch_len as u64;
            debug!(session_id = %session_id, batch = batch_len, "deleted message batch");

            if batch_len < DELETE_BATCH_SIZE && page.last_sort_key.is_none() {
                break;
            }
            // This batch removed everything it read; restart from the front.
            start_after = None;
            tokio::task::yield_now().await;
        }

        Ok(total)
    }
}
