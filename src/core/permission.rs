//! Hierarchical permission model
//!
//! A [`PermissionSet`] is a fixed tree of boolean leaves grouped by category
//! (`api_key.view`, `document.delete`, ...). Leaves are the only stored state.
//! A group reads as the AND of its leaves and `admin` reads as the AND of every
//! group, both computed on each read so a leaf change is immediately visible
//! through its ancestors.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Token that stands for every leaf in the tree
pub const ADMIN: &str = "admin";

/// A named group of permission leaves
#[derive(Debug, Clone, Copy)]
pub struct PermissionGroup {
    pub name: &'static str,
    pub leaves: &'static [&'static str],
}

/// The fixed permission tree
pub const GROUPS: &[PermissionGroup] = &[
    PermissionGroup {
        name: "api_key",
        leaves: &["view", "create", "update", "delete"],
    },
    PermissionGroup {
        name: "document",
        leaves: &["view", "create", "update", "delete"],
    },
    PermissionGroup {
        name: "user",
        leaves: &["view", "create", "update", "delete", "impersonate"],
    },
];

const fn leaf_count() -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < GROUPS.len() {
        total += GROUPS[i].leaves.len();
        i += 1;
    }
    total
}

const LEAF_COUNT: usize = leaf_count();

/// Errors raised when building a permission set from untrusted input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    UnknownPermission(String),
    InvalidShape(String),
}

impl fmt::Display for PermissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionError::UnknownPermission(name) => write!(f, "Unknown permission '{}'", name),
            PermissionError::InvalidShape(msg) => write!(f, "Invalid permission shape: {}", msg),
        }
    }
}

impl std::error::Error for PermissionError {}

/// What a permission name resolves to in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Admin,
    Group(usize),
    Leaf(usize),
}

/// Offset of the first leaf of group `index` in the flat leaf array
fn group_offset(index: usize) -> usize {
    GROUPS[..index].iter().map(|g| g.leaves.len()).sum()
}

fn resolve(name: &str) -> Option<Node> {
    if name == ADMIN {
        return Some(Node::Admin);
    }

    let (group_name, leaf_name) = match name.split_once('.') {
        Some((g, l)) => (g, Some(l)),
        None => (name, None),
    };

    let group_index = GROUPS.iter().position(|g| g.name == group_name)?;
    match leaf_name {
        None => Some(Node::Group(group_index)),
        Some(leaf) => {
            let leaf_index = GROUPS[group_index].leaves.iter().position(|l| *l == leaf)?;
            Some(Node::Leaf(group_offset(group_index) + leaf_index))
        }
    }
}

/// A per-credential capability tree
#[derive(Clone, PartialEq, Eq)]
pub struct PermissionSet {
    leaves: [bool; LEAF_COUNT],
}

impl PermissionSet {
    /// A set where every leaf is false
    pub fn new() -> Self {
        Self {
            leaves: [false; LEAF_COUNT],
        }
    }

    /// A set where every leaf is `value`
    pub fn all(value: bool) -> Self {
        Self {
            leaves: [value; LEAF_COUNT],
        }
    }

    /// A set where exactly the named leaves and groups are true
    pub fn from_names<I, S>(names: I) -> Result<Self, PermissionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for name in names {
            set.set(name.as_ref(), true)?;
        }
        Ok(set)
    }

    /// Build a set from any of the accepted raw shapes
    ///
    /// - `true` / `false`: every leaf set to the value
    /// - `["api_key.view", "document"]`: just those leaves / groups true
    /// - `{"api_key": {"view": true}, "document": true}`: merged onto an empty set
    pub fn from_value(value: &Value) -> Result<Self, PermissionError> {
        match value {
            Value::Bool(b) => Ok(Self::all(*b)),
            Value::Array(items) => {
                let names = items
                    .iter()
                    .map(|item| {
                        item.as_str().ok_or_else(|| {
                            PermissionError::InvalidShape(format!(
                                "expected a permission name, got {}",
                                item
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Self::from_names(names)
            }
            Value::Object(_) => {
                let mut set = Self::new();
                set.merge(value)?;
                Ok(set)
            }
            other => Err(PermissionError::InvalidShape(format!(
                "expected a boolean, list or object, got {}",
                other
            ))),
        }
    }

    /// Merge a raw object onto this set
    ///
    /// Keys are group names (or `admin`). A boolean value sets the whole
    /// group; a nested object sets individual leaves of that group.
    pub fn merge(&mut self, value: &Value) -> Result<(), PermissionError> {
        let Some(object) = value.as_object() else {
            return Err(PermissionError::InvalidShape(
                "merge expects an object".to_string(),
            ));
        };

        for (key, entry) in object {
            match entry {
                Value::Bool(b) => self.set(key, *b)?,
                Value::Object(leaves) => {
                    for (leaf, flag) in leaves {
                        let flag = flag.as_bool().ok_or_else(|| {
                            PermissionError::InvalidShape(format!(
                                "'{}.{}' must be a boolean",
                                key, leaf
                            ))
                        })?;
                        self.set(&format!("{}.{}", key, leaf), flag)?;
                    }
                }
                other => {
                    return Err(PermissionError::InvalidShape(format!(
                        "'{}' must be a boolean or an object, got {}",
                        key, other
                    )));
                }
            }
        }
        Ok(())
    }

    /// Set a leaf, every leaf of a group, or every leaf of the tree
    pub fn set(&mut self, name: &str, value: bool) -> Result<(), PermissionError> {
        match resolve(name).ok_or_else(|| PermissionError::UnknownPermission(name.to_string()))? {
            Node::Admin => self.leaves = [value; LEAF_COUNT],
            Node::Group(index) => {
                let start = group_offset(index);
                let end = start + GROUPS[index].leaves.len();
                self.leaves[start..end].fill(value);
            }
            Node::Leaf(index) => self.leaves[index] = value,
        }
        Ok(())
    }

    /// Check a leaf, a group (AND of its leaves) or `admin` (AND of everything)
    ///
    /// Unknown names are never granted.
    pub fn has_permission(&self, name: &str) -> bool {
        match resolve(name) {
            Some(Node::Admin) => self.leaves.iter().all(|l| *l),
            Some(Node::Group(index)) => self.group_granted(index),
            Some(Node::Leaf(index)) => self.leaves[index],
            None => false,
        }
    }

    fn group_granted(&self, index: usize) -> bool {
        let start = group_offset(index);
        self.leaves[start..start + GROUPS[index].leaves.len()]
            .iter()
            .all(|l| *l)
    }

    /// Shortest equivalent token list
    ///
    /// A fully granted tree collapses to `["admin"]`; a fully granted group
    /// collapses to its group name.
    pub fn to_tokens(&self) -> Vec<String> {
        if self.has_permission(ADMIN) {
            return vec![ADMIN.to_string()];
        }

        let mut tokens = Vec::new();
        for (index, group) in GROUPS.iter().enumerate() {
            if self.group_granted(index) {
                tokens.push(group.name.to_string());
                continue;
            }
            let start = group_offset(index);
            for (offset, leaf) in group.leaves.iter().enumerate() {
                if self.leaves[start + offset] {
                    tokens.push(format!("{}.{}", group.name, leaf));
                }
            }
        }
        tokens
    }

    /// Every name accepted by [`PermissionSet::set`]
    pub fn known_names() -> Vec<String> {
        let mut names = vec![ADMIN.to_string()];
        for group in GROUPS {
            names.push(group.name.to_string());
            for leaf in group.leaves {
                names.push(format!("{}.{}", group.name, leaf));
            }
        }
        names
    }
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl From<bool> for PermissionSet {
    fn from(value: bool) -> Self {
        Self::all(value)
    }
}

impl fmt::Debug for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PermissionSet").field(&self.to_tokens()).finish()
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_tokens().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_value(&raw).map_err(serde::de::Error::custom)
    }
}
