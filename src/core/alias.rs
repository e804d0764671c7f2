//! Stable route identity
//!
//! An [`Alias`] names the handler a route belongs to (owning type + method
//! name). Route and parameter registrations are correlated through it, so
//! independent registration calls for one handler land on the same spec.

use serde::Serialize;
use std::fmt;

/// Identity of a registered handler: `owner.method`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Alias {
    owner: String,
    method: String,
}

impl Alias {
    /// Create an alias from the owning type name and the method name
    pub fn new(owner: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            method: method.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The string key used in logs and error messages
    pub fn key(&self) -> String {
        format!("{}.{}", self.owner, self.method)
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_joins_owner_and_method() {
        let alias = Alias::new("DocumentController", "list");
        assert_eq!(alias.key(), "DocumentController.list");
        assert_eq!(alias.to_string(), "DocumentController.list");
    }

    #[test]
    fn test_equal_aliases_share_hash_slot() {
        let mut map = HashMap::new();
        map.insert(Alias::new("A", "get"), 1);
        map.insert(Alias::new("A", "get"), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&Alias::new("A", "get")], 2);
    }

    #[test]
    fn test_same_method_on_different_owner_is_distinct() {
        assert_ne!(Alias::new("A", "get"), Alias::new("B", "get"));
    }
}
