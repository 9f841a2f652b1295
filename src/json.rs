// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! JSON record access for schemas.
//!
//! Keys are dotted paths (`data.cpu.load`). A literal key that itself
//! contains dots (`"value.cpu"`) is found as well: at each level the full
//! remaining path is tried first, then progressively shorter prefixes.

use regex::Regex;
use serde_json::Value as Json;

/// One raw JSON record.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRecord {
    root: Json,
}

impl JsonRecord {
    pub fn new(root: Json) -> Self {
        Self { root }
    }

    /// Parse from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json).map(Self::new)
    }

    pub fn root(&self) -> &Json {
        &self.root
    }

    /// Element at a dotted key path.
    pub fn get_element(&self, key: &str) -> Option<&Json> {
        lookup(&self.root, key)
    }

    /// String form of a scalar element; `None` for missing, null, objects
    /// and arrays.
    pub fn get_scalar(&self, key: &str) -> Option<String> {
        self.get_element(key).and_then(scalar_to_string)
    }

    /// All leaf key paths, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_keys(&self.root, None, &mut keys);
        keys.sort();
        keys
    }

    /// Leaf key paths accepted by `pattern`.
    ///
    /// The caller decides how the pattern matches (schemas anchor theirs
    /// for whole-key matching).
    pub fn keys_matching(&self, pattern: &Regex) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|key| pattern.is_match(key))
            .collect()
    }
}

impl From<Json> for JsonRecord {
    fn from(root: Json) -> Self {
        Self::new(root)
    }
}

fn lookup<'a>(node: &'a Json, path: &str) -> Option<&'a Json> {
    let object = node.as_object()?;

    if let Some(found) = object.get(path) {
        return Some(found);
    }

    // Longest prefix first
    for (idx, _) in path.rmatch_indices('.') {
        let (head, rest) = (&path[..idx], &path[idx + 1..]);
        if let Some(child) = object.get(head) {
            if let Some(found) = lookup(child, rest) {
                return Some(found);
            }
        }
    }

    None
}

fn collect_keys(node: &Json, prefix: Option<&str>, out: &mut Vec<String>) {
    match node {
        Json::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = match prefix {
                    Some(p) => format!("{}.{}", p, key),
                    None => key.clone(),
                };
                collect_keys(child, Some(&path), out);
            }
        }
        _ => {
            if let Some(p) = prefix {
                out.push(p.to_string());
            }
        }
    }
}

/// String form of a JSON scalar (string, number, boolean).
pub fn scalar_to_string(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        Json::Null | Json::Array(_) | Json::Object(_) => None,
    }
}
