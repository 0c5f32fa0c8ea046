//! Embedded in-memory document engine.
//!
//! Implements `DocumentStore` from `parlor-core` over a dashmap of
//! partitions, each an ordered map from sort key to record. The per-shard
//! write lock makes `update` a single atomic operation, so concurrent
//! counter increments are never lost. TTL is honored lazily: reads treat
//! expired rows as absent, and `sweep_expired` reclaims them physically.
//!
//! Used by the test suite and as a lightweight local backend.

use std::collections::BTreeMap;

use chrono::Utc;
use dashmap::DashMap;
use parlor_core::store::{
    AttributeUpdate, DocumentStore, QueryPage, RecordKey, ScanOrder, StoredRecord,
};
use parlor_types::chat::ChatSession;
use parlor_types::error::StoreError;

/// In-memory partition/sort keyed document store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    partitions: DashMap<String, BTreeMap<String, StoredRecord>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Physically remove expired rows. Returns how many were reclaimed.
    ///
    /// Reads already filter expired rows, so this only frees memory.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for mut entry in self.partitions.iter_mut() {
            let before = entry.len();
            entry.retain(|_, record| record.expires_at() > now);
            removed += before - entry.len();
        }
        removed
    }
}

fn apply_updates(session: &mut ChatSession, updates: &[AttributeUpdate]) {
    for update in updates {
        match update {
            AttributeUpdate::IncrementMessageCount(by) => {
                session.message_count = session.message_count.saturating_add_signed(*by);
            }
            AttributeUpdate::SetMessageCount(count) => {
                session.message_count = *count;
            }
            AttributeUpdate::MaxLastMessageAt(at) => {
                if *at > session.last_message_at {
                    session.last_message_at = *at;
                }
            }
            AttributeUpdate::SetTitle(title) => {
                session.title = title.clone();
            }
            AttributeUpdate::SetUpdatedAt(at) => {
                session.updated_at = *at;
            }
        }
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn put(&self, key: RecordKey, record: StoredRecord) -> Result<(), StoreError> {
        self.partitions
            .entry(key.partition)
            .or_default()
            .insert(key.sort, record);
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> {
        let now = Utc::now();
        let Some(partition) = self.partitions.get(&key.partition) else {
            return Ok(None);
        };
        Ok(partition
            .get(&key.sort)
            .filter(|record| record.expires_at() > now)
            .cloned())
    }

    async fn query(
        &self,
        partition: &str,
        sort_prefix: &str,
        order: ScanOrder,
        limit: usize,
        start_after: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let now = Utc::now();
        let Some(rows) = self.partitions.get(partition) else {
            return Ok(QueryPage {
                records: Vec::new(),
                last_sort_key: None,
            });
        };

        // Fetch one extra row to decide whether a continuation exists.
        let mut taken: Vec<(String, StoredRecord)> = Vec::with_capacity(limit + 1);
        let mut visit = |sort: &String, record: &StoredRecord| -> bool {
            if !sort.starts_with(sort_prefix) {
                return true;
            }
            let in_range = match (order, start_after) {
                (_, None) => true,
                (ScanOrder::Ascending, Some(after)) => sort.as_str() > after,
                (ScanOrder::Descending, Some(after)) => sort.as_str() < after,
            };
            if in_range && record.expires_at() > now {
                taken.push((sort.clone(), record.clone()));
            }
            taken.len() <= limit
        };
        match order {
            ScanOrder::Ascending => {
                for (sort, record) in rows.iter() {
                    if !visit(sort, record) {
                        break;
                    }
                }
            }
            ScanOrder::Descending => {
                for (sort, record) in rows.iter().rev() {
                    if !visit(sort, record) {
                        break;
                    }
                }
            }
        }
        drop(rows);

        let has_more = taken.len() > limit;
        if has_more {
            taken.truncate(limit);
        }
        let last_sort_key = if has_more {
            taken.last().map(|(sort, _)| sort.clone())
        } else {
            None
        };
        Ok(QueryPage {
            records: taken.into_iter().map(|(_, record)| record).collect(),
            last_sort_key,
        })
    }

    async fn update(
        &self,
        key: &RecordKey,
        updates: &[AttributeUpdate],
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let Some(mut partition) = self.partitions.get_mut(&key.partition) else {
            return Err(StoreError::NotFound);
        };
        let Some(record) = partition.get_mut(&key.sort) else {
            return Err(StoreError::NotFound);
        };
        if record.expires_at() <= now {
            return Err(StoreError::NotFound);
        }
        match record {
            StoredRecord::Session(session) => {
                // Applied under the shard write guard: atomic w.r.t. other
                // updates on the same row.
                apply_updates(session, updates);
                Ok(())
            }
            StoredRecord::Message(_) => Err(StoreError::Validation(
                "attribute updates apply only to session rows".to_string(),
            )),
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        if let Some(mut partition) = self.partitions.get_mut(&key.partition) {
            partition.remove(&key.sort);
            let empty = partition.is_empty();
            drop(partition);
            if empty {
                self.partitions.remove_if(&key.partition, |_, rows| rows.is_empty());
            }
        }
        Ok(())
    }
}
