//! Tenant identity types.
//!
//! Every session and all of its messages are isolated under exactly one
//! `OwnerScope`: either a personal user or a shared organization. The two
//! variants map into disjoint storage key namespaces (see parlor-core's
//! key strategy), so a user id can never collide with an organization id.

use serde::{Deserialize, Serialize};

use std::fmt;

/// The tenant a session belongs to.
///
/// Personal and Organization scopes are distinct even when the underlying
/// id strings are equal: `Personal { "x" }` and `Organization { "x" }` are
/// different tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OwnerScope {
    Personal { user_id: String },
    Organization { organization_id: String },
}

impl OwnerScope {
    /// Convenience constructor for a personal scope.
    pub fn personal(user_id: impl Into<String>) -> Self {
        OwnerScope::Personal {
            user_id: user_id.into(),
        }
    }

    /// Convenience constructor for an organization scope.
    pub fn organization(organization_id: impl Into<String>) -> Self {
        OwnerScope::Organization {
            organization_id: organization_id.into(),
        }
    }

    /// The raw tenant id, without scope discrimination.
    pub fn id(&self) -> &str {
        match self {
            OwnerScope::Personal { user_id } => user_id,
            OwnerScope::Organization { organization_id } => organization_id,
        }
    }

    /// Whether the tenant id is present and non-empty.
    pub fn is_valid(&self) -> bool {
        !self.id().trim().is_empty()
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerScope::Personal { user_id } => write!(f, "user:{user_id}"),
            OwnerScope::Organization { organization_id } => write!(f, "org:{organization_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_scope_serde_tagged() {
        let owner = OwnerScope::personal("u1");
        let json = serde_json::to_string(&owner).unwrap();
        assert!(json.contains("\"kind\":\"personal\""));
        let parsed: OwnerScope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, owner);
    }

    #[test]
    fn test_same_id_different_scope_not_equal() {
        assert_ne!(OwnerScope::personal("x"), OwnerScope::organization("x"));
    }

    #[test]
    fn test_is_valid_rejects_blank() {
        assert!(!OwnerScope::personal("").is_valid());
        assert!(!OwnerScope::organization("   ").is_valid());
        assert!(OwnerScope::personal("u1").is_valid());
    }
}
