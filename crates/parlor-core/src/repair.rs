//! Counter reconciliation.
//!
//! The per-session `message_count` and `last_message_at` are denormalized
//! counters bumped best-effort on append; message rows are the ground
//! truth. A periodic repair pass recounts the actual rows and writes the
//! counters back, closing any drift left by counter updates that failed
//! after a successful append.

use chrono::{DateTime, Utc};
use parlor_types::error::StoreError;
use parlor_types::owner::OwnerScope;
use tracing::{debug, info};

use crate::keys::PartitionKeyStrategy;
use crate::session::SessionStore;
use crate::store::{AttributeUpdate, DocumentStore};

/// Outcome of reconciling one session's counters.
#[derive(Debug, Clone)]
pub struct RepairReport {
    pub session_id: String,
    /// Counter value before reconciliation.
    pub recorded_count: u64,
    /// Row count the counter was reset to.
    pub actual_count: u64,
    /// Newest message timestamp found, when any rows exist.
    pub newest_timestamp: Option<DateTime<Utc>>,
}

impl RepairReport {
    /// Whether the counter had drifted from the row count.
    pub fn drifted(&self) -> bool {
        self.recorded_count != self.actual_count
    }
}

impl<D: DocumentStore> SessionStore<D> {
    /// Recompute a session's counters from its actual message rows.
    ///
    /// `message_count` is overwritten with the row count (a plain set, not
    /// an increment: rows are ground truth), and `last_message_at` is
    /// raised to the newest row's timestamp via the monotonic max rule so a
    /// concurrent append can never be regressed by the repair.
    pub async fn reconcile_message_count(
        &self,
        session_id: &str,
        owner: &OwnerScope,
    ) -> Result<RepairReport, StoreError> {
        let session = self.get_session(session_id, owner).await?;
        let tally = self.messages().tally(session_id).await?;

        let mut updates = vec![
            AttributeUpdate::SetMessageCount(tally.count),
            AttributeUpdate::SetUpdatedAt(Utc::now()),
        ];
        if let Some(newest) = tally.newest_timestamp {
            updates.push(AttributeUpdate::MaxLastMessageAt(newest));
        }

        let key = PartitionKeyStrategy::session_key(owner, session_id);
        self.backend().update(&key, &updates).await?;

        let report = RepairReport {
            session_id: session_id.to_string(),
            recorded_count: session.message_count,
            actual_count: tally.count,
            newest_timestamp: tally.newest_timestamp,
        };
        if report.drifted() {
            info!(
                session_id = %session_id,
                recorded = report.recorded_count,
                actual = report.actual_count,
                "repaired message counter drift"
            );
        } else {
            debug!(session_id = %session_id, count = report.actual_count, "counters already consistent");
        }
        Ok(report)
    }
}
