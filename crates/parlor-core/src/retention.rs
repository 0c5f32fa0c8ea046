//! Retention policy.
//!
//! Every session and message row receives an expiration instant at write
//! time. Expiry is enforced by the underlying store (DynamoDB TTL, or lazy
//! filtering in the in-memory engine) and is best-effort and eventual --
//! strictly weaker than an explicit delete, which is immediate.

use chrono::{DateTime, Duration, Utc};
use parlor_types::error::StoreError;

/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Assigns expiry metadata at write time.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    window: Duration,
}

impl RetentionPolicy {
    /// A policy with a custom retention window. The window must be positive.
    pub fn new(window: Duration) -> Result<Self, StoreError> {
        if window <= Duration::zero() {
            return Err(StoreError::Validation(
                "retention window must be positive".to_string(),
            ));
        }
        Ok(Self { window })
    }

    /// Expiry instant for a row written at `written_at`.
    pub fn expires_at(&self, written_at: DateTime<Utc>) -> DateTime<Utc> {
        written_at + self.window
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            window: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }
}
