//! Sampled per-owner usage statistics.

use std::collections::HashMap;

use parlor_types::error::StoreError;
use parlor_types::owner::OwnerScope;
use parlor_types::stats::OwnerStats;

use crate::cursor::PaginationCursor;
use crate::session::SessionStore;
use crate::store::DocumentStore;

/// How many of an owner's most recent sessions the aggregator samples.
pub const STATS_SAMPLE_WINDOW: usize = 100;

/// Derives approximate per-owner usage statistics.
///
/// Figures are computed over a bounded window of the owner's most recent
/// sessions (`STATS_SAMPLE_WINDOW`), not the full partition: every field of
/// the resulting `OwnerStats` is an approximation over that sample. Owners
/// with more sessions than the window will see truncated counts.
pub struct StatsAggregator<D: DocumentStore> {
    sessions: SessionStore<D>,
}

impl<D: DocumentStore> StatsAggregator<D> {
    pub fn new(sessions: SessionStore<D>) -> Self {
        Self { sessions }
    }

    /// Sample the owner's recent sessions and aggregate.
    ///
    /// `message_count` sums the denormalized per-session counters, so it
    /// inherits their best-effort accuracy until a repair pass runs.
    pub async fn collect(&self, owner: &OwnerScope) -> Result<OwnerStats, StoreError> {
        let mut sampled: Vec<parlor_types::chat::ChatSession> = Vec::new();
        let mut cursor: Option<PaginationCursor> = None;

        while sampled.len() < STATS_SAMPLE_WINDOW {
            let remaining = STATS_SAMPLE_WINDOW - sampled.len();
            let (page, next) = self
                .sessions
                .list_sessions(owner, remaining, cursor.as_ref())
                .await?;
            sampled.extend(page);
            // An empty page with a cursor means the backend filtered a full
            // page of expired rows; only a missing cursor ends the scan.
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        let mut message_count: u64 = 0;
        let mut model_freq: HashMap<&str, usize> = HashMap::new();
        for session in &sampled {
            message_count += session.message_count;
            *model_freq.entry(session.model.as_str()).or_insert(0) += 1;
        }

        // Deterministic pick: highest frequency, lexicographically smallest
        // name on ties.
        let top_model = model_freq
            .into_iter()
            .max_by(|(a_name, a_n), (b_name, b_n)| a_n.cmp(b_n).then(b_name.cmp(a_name)))
            .map(|(name, _)| name.to_string());

        Ok(OwnerStats {
            owner: owner.clone(),
            session_count: sampled.len() as u64,
            message_count,
            top_model,
            sampled_sessions: sampled.len(),
        })
    }
}
