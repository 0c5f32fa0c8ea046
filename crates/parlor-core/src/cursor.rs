//! Opaque pagination cursor codec.
//!
//! Both stores hand out continuation tokens as base64-wrapped envelopes
//! around the last sort key a page returned. Resuming a scan exclusively
//! after that key makes pagination stable: items that existed when the
//! cursor was issued are never skipped or duplicated, even when new rows
//! land concurrently (new rows sort outside the remaining scan range).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parlor_types::error::StoreError;
use serde::{Deserialize, Serialize};

/// Envelope version, bumped if the token layout ever changes.
const CURSOR_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct CursorEnvelope {
    v: u8,
    /// Last sort key returned by the previous page (exclusive resume point).
    sk: String,
}

/// An opaque continuation token.
///
/// Callers must treat the token as a black box: round-trip it verbatim,
/// never parse or fabricate it. A garbled token decodes to a validation
/// error, never to a different tenant's data (the partition is always
/// re-derived from the caller's own scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor(String);

impl PaginationCursor {
    /// Encode a cursor resuming after `last_sort_key`.
    pub fn after(last_sort_key: &str) -> Self {
        let envelope = CursorEnvelope {
            v: CURSOR_VERSION,
            sk: last_sort_key.to_string(),
        };
        // Serializing a two-field struct of plain types cannot fail.
        let json = serde_json::to_vec(&envelope).unwrap_or_default();
        PaginationCursor(URL_SAFE_NO_PAD.encode(json))
    }

    /// Reconstruct a cursor from a token previously handed to a caller.
    pub fn from_token(token: impl Into<String>) -> Self {
        PaginationCursor(token.into())
    }

    /// The token to hand back to the caller.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the exclusive resume sort key.
    pub fn sort_key(&self) -> Result<String, StoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.0)
            .map_err(|_| StoreError::Validation("invalid pagination cursor".to_string()))?;
        let envelope: CursorEnvelope = serde_json::from_slice(&bytes)
            .map_err(|_| StoreError::Validation("invalid pagination cursor".to_string()))?;
        if envelope.v != CURSOR_VERSION {
            return Err(StoreError::Validation(
                "unsupported pagination cursor version".to_string(),
            ));
        }
        Ok(envelope.sk)
    }
}

impl std::fmt::Display for PaginationCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = PaginationCursor::after("SESSION#0192f0c1");
        let token = cursor.as_str().to_string();
        let restored = PaginationCursor::from_token(token);
        assert_eq!(restored.sort_key().unwrap(), "SESSION#0192f0c1");
    }

    #[test]
    fn test_cursor_is_opaque() {
        let cursor = PaginationCursor::after("MSG#0000000000000100#m1");
        // The raw sort key must not appear in the token.
        assert!(!cursor.as_str().contains("MSG#"));
    }

    #[test]
    fn test_garbage_token_is_validation_error() {
        let bad = PaginationCursor::from_token("not a cursor!!");
        assert!(matches!(bad.sort_key(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let json = serde_json::json!({ "v": 9, "sk": "SESSION#x" });
        let token = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json).unwrap());
        let cursor = PaginationCursor::from_token(token);
        assert!(matches!(cursor.sort_key(), Err(StoreError::Validation(_))));
    }
}
