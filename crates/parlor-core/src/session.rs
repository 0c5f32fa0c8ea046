//! Session store: CRUD, pagination, counters, and cascading deletes.
//!
//! Every operation takes the caller's `OwnerScope` and derives the storage
//! key from it, so a session that exists under a different tenant is simply
//! a key miss: callers see `NotFound`, never a distinguishable "forbidden",
//! and cross-tenant existence cannot be probed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parlor_types::chat::ChatSession;
use parlor_types::error::StoreError;
use parlor_types::owner::OwnerScope;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cursor::PaginationCursor;
use crate::keys::{PartitionKeyStrategy, SESSION_SORT_PREFIX};
use crate::message::MessageStore;
use crate::retention::RetentionPolicy;
use crate::store::{AttributeUpdate, DocumentStore, ScanOrder, StoredRecord};

/// Partition page size used by the title search scan.
const SEARCH_SCAN_PAGE: usize = 64;

/// CRUD and pagination over session metadata.
///
/// Session ids are UUIDv7, so `SESSION#{id}` sort keys order by creation
/// time and a descending scan lists sessions newest-first without a
/// secondary index.
pub struct SessionStore<D: DocumentStore> {
    store: Arc<D>,
    messages: MessageStore<D>,
    retention: RetentionPolicy,
}

impl<D: DocumentStore> Clone for SessionStore<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            messages: self.messages.clone(),
            retention: self.retention,
        }
    }
}

impl<D: DocumentStore> SessionStore<D> {
    pub fn new(store: Arc<D>, retention: RetentionPolicy) -> Self {
        let messages = MessageStore::new(Arc::clone(&store), retention);
        Self {
            store,
            messages,
            retention,
        }
    }

    /// The message store sharing this session store's backend.
    pub fn messages(&self) -> &MessageStore<D> {
        &self.messages
    }

    pub(crate) fn backend(&self) -> &Arc<D> {
        &self.store
    }

    /// Create a new session owned by `owner`.
    ///
    /// Counters start at zero and all three timestamps at now; the
    /// retention expiry is scheduled immediately.
    pub async fn create_session(
        &self,
        owner: &OwnerScope,
        title: &str,
        backend: &str,
        model: &str,
    ) -> Result<ChatSession, StoreError> {
        require_owner(owner)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::Validation(
                "session title must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let session = ChatSession {
            session_id: Uuid::now_v7().to_string(),
            owner: owner.clone(),
            title: title.to_string(),
            backend: backend.to_string(),
            model: model.to_string(),
            message_count: 0,
            created_at: now,
            updated_at: now,
            last_message_at: now,
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            expires_at: self.retention.expires_at(now),
        };

        let key = PartitionKeyStrategy::session_key(owner, &session.session_id);
        self.store
            .put(key, StoredRecord::Session(session.clone()))
            .await?;
        info!(session_id = %session.session_id, "chat session created");
        Ok(session)
    }

    /// Fetch a session, scoped to the caller's tenant.
    pub async fn get_session(
        &self,
        session_id: &str,
        owner: &OwnerScope,
    ) -> Result<ChatSession, StoreError> {
        require_owner(owner)?;
        require_session_id(session_id)?;
        let key = PartitionKeyStrategy::session_key(owner, session_id);
        let record = self.store.get(&key).await?.ok_or(StoreError::NotFound)?;
        let session = record.into_session()?;
        // The key already encodes the tenant; this guards against a row
        // written under a mismatched envelope.
        if session.owner != *owner {
            return Err(StoreError::NotFound);
        }
        Ok(session)
    }

    /// List the owner's sessions newest-first.
    ///
    /// The cursor stays valid under concurrent inserts: sessions that
    /// existed when it was issued are never skipped or duplicated.
    pub async fn list_sessions(
        &self,
        owner: &OwnerScope,
        page_size: usize,
        cursor: Option<&PaginationCursor>,
    ) -> Result<(Vec<ChatSession>, Option<PaginationCursor>), StoreError> {
        require_owner(owner)?;
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
                &PartitionKeyStrategy::owner_partition(owner),
                SESSION_SORT_PREFIX,
                ScanOrder::Descending,
                page_size,
                start_after.as_deref(),
            )
            .await?;

        let mut sessions = Vec::with_capacity(page.records.len());
        for record in page.records {
            sessions.push(record.into_session()?);
        }
        let next = page.last_sort_key.map(|sk| PaginationCursor::after(&sk));
        Ok((sessions, next))
    }

    /// Rename a session. Rejects empty titles and bumps `updated_at`.
    pub async fn update_title(
        &self,
        session_id: &str,
        owner: &OwnerScope,
        new_title: &str,
    ) -> Result<(), StoreError> {
        require_owner(owner)?;
        require_session_id(session_id)?;
        let new_title = new_title.trim();
        if new_title.is_empty() {
            return Err(StoreError::Validation(
                "session title must not be empty".to_string(),
            ));
        }
        let key = PartitionKeyStrategy::session_key(owner, session_id);
        self.store
            .update(
                &key,
                &[
                    AttributeUpdate::SetTitle(new_title.to_string()),
                    AttributeUpdate::SetUpdatedAt(Utc::now()),
                ],
            )
            .await
    }

    /// Bump session counters after a successful message append.
    ///
    /// One atomic update: message_count += 1 and last_message_at raised to
    /// `message_timestamp` only if it is greater than the stored value, so
    /// out-of-order arrivals never move the watermark backwards and
    /// concurrent appenders never lose an increment. A missing session row
    /// here means a delete raced the append; that surfaces as a retryable
    /// conflict, and the message row remains authoritative either way.
    /// The update cannot tell a just-deleted row from an id that never
    /// existed, so both surface as `Conflict`; callers retrying on it must
    /// bound their retries rather than loop until the row appears.
    pub async fn record_message_appended(
        &self,
        session_id: &str,
        owner: &OwnerScope,
        message_timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        require_owner(owner)?;
        require_session_id(session_id)?;
        let key = PartitionKeyStrategy::session_key(owner, session_id);
        let updates = [
            AttributeUpdate::IncrementMessageCount(1),
            AttributeUpdate::MaxLastMessageAt(message_timestamp),
            AttributeUpdate::SetUpdatedAt(Utc::now()),
        ];
        match self.store.update(&key, &updates).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => {
                warn!(
                    session_id = %session_id,
                    "session row missing during counter update; append may be racing a delete"
                );
                Err(StoreError::Conflict(
                    "session deleted while recording an appended message".to_string(),
                ))
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to record appended message");
                Err(e)
            }
        }
    }

    /// Delete a session and all of its messages.
    ///
    /// Messages go first, in bounded batches, then the session row, then a
    /// final sweep for stragglers appended mid-cascade. An interrupted run
    /// leaves the session row in place, so re-invoking completes without
    /// error and without resurrecting data.
    pub async fn delete_session(
        &self,
        session_id: &str,
        owner: &OwnerScope,
    ) -> Result<(), StoreError> {
        // Also the tenant check: an absent or cross-tenant row is NotFound.
        self.get_session(session_id, owner).await?;

        let mut deleted = self.messages.delete_all_messages(session_id).await?;
        let key = PartitionKeyStrategy::session_key(owner, session_id);
        self.store.delete(&key).await?;
        deleted += self.messages.delete_all_messages(session_id).await?;

        info!(session_id = %session_id, messages_deleted = deleted, "chat session deleted");
        Ok(())
    }

    /// Find sessions whose title contains `needle`, newest-first, capped at
    /// `page_size`. Case-insensitive, unranked, scoped strictly to `owner`.
    pub async fn search_sessions(
        &self,
        owner: &OwnerScope,
        needle: &str,
        page_size: usize,
    ) -> Result<Vec<ChatSession>, StoreError> {
        require_owner(owner)?;
        let needle = needle.trim();
        if needle.is_empty() {
            return Err(StoreError::Validation(
                "search term must not be empty".to_string(),
            ));
        }
        if page_size == 0 {
            return Err(StoreError::Validation(
                "page size must be at least 1".to_string(),
            ));
        }

        let partition = PartitionKeyStrategy::owner_partition(owner);
        let needle_lower = needle.to_lowercase();
        let mut hits = Vec::new();
        let mut start_after: Option<String> = None;

        loop {
            let page = self
                .store
                .query(
                    &partition,
                    SESSION_SORT_PREFIX,
                    ScanOrder::Descending,
                    SEARCH_SCAN_PAGE,
                    start_after.as_deref(),
                )
                .await?;
            for record in page.records {
                let session = record.into_session()?;
                if session.title.to_lowercase().contains(&needle_lower) {
                    hits.push(session);
                    if hits.len() == page_size {
                        return Ok(hits);
                    }
                }
            }
            match page.last_sort_key {
                Some(sk) => start_after = Some(sk),
                None => break,
            }
            tokio::task::yield_now().await;
        }

        Ok(hits)
    }
}

fn require_owner(owner: &OwnerScope) -> Result<(), StoreError> {
    if !owner.is_valid() {
        return Err(StoreError::Validation(
            "owner id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn require_session_id(session_id: &str) -> Result<(), StoreError> {
    if session_id.trim().is_empty() {
        return Err(StoreError::Validation(
            "session_id must not be empty".to_string(),
        ));
    }
    Ok(())
}
