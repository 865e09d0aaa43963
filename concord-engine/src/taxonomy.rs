//! Read-only taxonomy reference
//!
//! The hierarchy is external reference data. It is loaded once, wrapped in an
//! `Arc`, and passed explicitly to every component that needs it; nothing in
//! the engine mutates it.
//!
//! # Path syntax
//! One parser accepts every supported leaf path serialization:
//! - `math/algebra/linear`
//! - `math > algebra > linear`
//! - `math::algebra::linear`
//!
//! # Tree serializations
//! [`Taxonomy::from_json`] accepts a nested `{id, children}` tree (or a list
//! of such roots), a map of maps, or a flat list of leaf paths.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Taxonomy loading and path parsing errors
#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("Empty taxonomy path")]
    EmptyPath,

    #[error("Malformed taxonomy path '{0}'")]
    MalformedPath(String),

    #[error("Unsupported taxonomy format: {0}")]
    UnsupportedFormat(String),

    #[error("Taxonomy has no leaves")]
    NoLeaves,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A parsed taxonomy path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId(Vec<String>);

impl LeafId {
    /// Parse any supported path syntax
    pub fn parse(raw: &str) -> Result<Self, TaxonomyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TaxonomyError::EmptyPath);
        }

        let parts: Vec<&str> = if trimmed.contains('>') {
            trimmed.split('>').collect()
        } else if trimmed.contains("::") {
            trimmed.split("::").collect()
        } else {
            trimmed.trim_matches('/').split('/').collect()
        };

        let segments: Vec<String> = parts.iter().map(|p| p.trim().to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TaxonomyError::MalformedPath(raw.to_string()));
        }

        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.trim().to_string());
        Self(segments)
    }

    fn is_strict_prefix_of(&self, other: &LeafId) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Leaf queries the engine makes against the hierarchy
pub trait LeafCatalog: Send + Sync {
    /// True when `id` parses and names a leaf (not an internal node)
    fn is_valid_leaf(&self, id: &str) -> bool;

    /// Every leaf, in canonical `a/b/c` form, sorted
    fn leaves(&self) -> Vec<String>;
}

/// Immutable in-memory hierarchy
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    leaves: BTreeSet<LeafId>,
    internal: BTreeSet<LeafId>,
}

impl Taxonomy {
    /// Build from leaf paths; any path that prefixes another is internal
    pub fn from_paths<I, S>(paths: I) -> Result<Self, TaxonomyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut all = BTreeSet::new();
        for path in paths {
            all.insert(LeafId::parse(path.as_ref())?);
        }
        Self::from_leaf_set(all)
    }

    /// Build from any supported JSON serialization
    pub fn from_json(value: &Value) -> Result<Self, TaxonomyError> {
        let mut paths = BTreeSet::new();

        match value {
            Value::Array(items) if items.iter().all(Value::is_string) => {
                for item in items {
                    if let Some(path) = item.as_str() {
                        paths.insert(LeafId::parse(path)?);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    collect_nested(item, None, &mut paths)?;
                }
            }
            Value::Object(map) if map.get("id").map(Value::is_string).unwrap_or(false) => {
                collect_nested(value, None, &mut paths)?;
            }
            Value::Object(map) => {
                for (name, child) in map {
                    collect_map(&LeafId(vec![name.trim().to_string()]), child, &mut paths)?;
                }
            }
            other => {
                return Err(TaxonomyError::UnsupportedFormat(format!(
                    "top level must be an object or array, found {}",
                    json_type(other)
                )))
            }
        }

        Self::from_leaf_set(paths)
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        let taxonomy = Self::from_json(&value)?;
        tracing::info!(
            path = %path.display(),
            leaves = taxonomy.leaves.len(),
            "Taxonomy loaded"
        );
        Ok(taxonomy)
    }

    pub fn is_leaf(&self, id: &LeafId) -> bool {
        self.leaves.contains(id)
    }

    pub fn is_internal(&self, id: &LeafId) -> bool {
        self.internal.contains(id)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    fn from_leaf_set(all: BTreeSet<LeafId>) -> Result<Self, TaxonomyError> {
        let mut internal = BTreeSet::new();
        for path in &all {
            for depth in 1..path.depth() {
                internal.insert(LeafId(path.0[..depth].to_vec()));
            }
        }

        let leaves: BTreeSet<LeafId> = all
            .into_iter()
            .filter(|p| !internal.contains(p))
            .collect();

        if leaves.is_empty() {
            return Err(TaxonomyError::NoLeaves);
        }

        debug_assert!(leaves
            .iter()
            .all(|leaf| !leaves.iter().any(|other| leaf.is_strict_prefix_of(other))));

        Ok(Self { leaves, internal })
    }
}

impl LeafCatalog for Taxonomy {
    fn is_valid_leaf(&self, id: &str) -> bool {
        LeafId::parse(id)
            .map(|leaf| self.leaves.contains(&leaf))
            .unwrap_or(false)
    }

    fn leaves(&self) -> Vec<String> {
        self.leaves.iter().map(LeafId::to_string).collect()
    }
}

/// `{ "id": "...", "children": [...] }`
fn collect_nested(
    node: &Value,
    parent: Option<&LeafId>,
    out: &mut BTreeSet<LeafId>,
) -> Result<(), TaxonomyError> {
    let name = node
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| TaxonomyError::UnsupportedFormat("nested node without string 'id'".into()))?;

    if name.trim().is_empty() {
        return Err(TaxonomyError::MalformedPath(name.to_string()));
    }

    let path = match parent {
        Some(parent) => parent.child(name),
        None => LeafId(vec![name.trim().to_string()]),
    };

    match node.get("children") {
        None | Some(Value::Null) => {
            out.insert(path);
        }
        Some(Value::Array(children)) if children.is_empty() => {
            out.insert(path);
        }
        Some(Value::Array(children)) => {
            for child in children {
                collect_nested(child, Some(&path), out)?;
            }
        }
        Some(other) => {
            return Err(TaxonomyError::UnsupportedFormat(format!(
                "'children' must be an array, found {}",
                json_type(other)
            )))
        }
    }

    Ok(())
}

/// `{ "math": { "algebra": {}, "geometry": ["euclid", "projective"] } }`
fn collect_map(
    path: &LeafId,
    node: &Value,
    out: &mut BTreeSet<LeafId>,
) -> Result<(), TaxonomyError> {
    match node {
        Value::Object(map) if !map.is_empty() => {
            for (name, child) in map {
                if name.trim().is_empty() {
                    return Err(TaxonomyError::MalformedPath(format!("{}/", path)));
                }
                collect_map(&path.child(name), child, out)?;
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for item in items {
                let name = item.as_str().ok_or_else(|| {
                    TaxonomyError::UnsupportedFormat(format!(
                        "leaf list under '{}' must contain strings",
                        path
                    ))
                })?;
                if name.trim().is_empty() {
                    return Err(TaxonomyError::MalformedPath(format!("{}/", path)));
                }
                out.insert(path.child(name));
            }
        }
        _ => {
            out.insert(path.clone());
        }
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
