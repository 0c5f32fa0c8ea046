//! Per-owner usage statistics.

use serde::{Deserialize, Serialize};

use crate::owner::OwnerScope;

/// Approximate usage statistics for one owner.
///
/// Produced by sampling a bounded window of the owner's most recent
/// sessions, so every field is an approximation over that sample, not an
/// exact global aggregate. `sampled_sessions` reports the sample size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerStats {
    pub owner: OwnerScope,
    /// Sessions seen in the sample window.
    pub session_count: u64,
    /// Sum of `message_count` across sampled sessions.
    pub message_count: u64,
    /// Most frequently used model among sampled sessions, if any.
    pub top_model: Option<String>,
    /// Number of sessions the sample actually covered.
    pub sampled_sessions: usize,
}
