//! Structural diff between two state snapshots.
//!
//! A [`Delta`] is a flat map from *dotted path* to an operation:
//!
//! ```text
//! previous: { "score": 5, "grid": { "a": 1, "b": 2 } }
//! current:  { "score": 6, "grid": { "a": 1 }, "phase": "recall" }
//!
//! delta:    { "grid.b": null, "phase": "recall", "score": 6 }
//! ```
//!
//! On the wire a removal is JSON `null`. Keys may themselves contain `.`,
//! so path segments escape `.` and `\` with a backslash; [`join_path`]
//! and [`split_path`] are the only two places that know about that.
//!
//! The law the rest of the crate relies on:
//! `apply_delta(a, &compute_delta(a, b)) == b`.

use std::collections::BTreeMap;
use std::collections::btree_map;

use metamind_protocol::{META_KEY, Snapshot};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::PathError;

// ---------------------------------------------------------------------------
// DeltaOp / Delta
// ---------------------------------------------------------------------------

/// What to do at one path.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOp {
    /// Replace (or create) the value at this path.
    Set(Value),
    /// Delete the key at this path.
    Remove,
}

/// A set of path operations that turns one snapshot into another.
///
/// Backed by a `BTreeMap`, so iteration and serialization are sorted by
/// path. Nothing downstream relies on that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    ops: BTreeMap<String, DeltaOp>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn get(&self, path: &str) -> Option<&DeltaOp> {
        self.ops.get(path)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, DeltaOp> {
        self.ops.iter()
    }

    pub fn insert(&mut self, path: impl Into<String>, op: DeltaOp) {
        self.ops.insert(path.into(), op);
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) {
        self.insert(path, DeltaOp::Set(value));
    }

    pub fn remove(&mut self, path: impl Into<String>) {
        self.insert(path, DeltaOp::Remove);
    }

    /// Returns `false` if the delta sets some path to `null`.
    ///
    /// `null` means "remove" on the wire, so such a delta would decode to
    /// something different. The synchronizer sends a full snapshot instead.
    pub fn is_wire_safe(&self) -> bool {
        !self
            .ops
            .values()
            .any(|op| matches!(op, DeltaOp::Set(Value::Null)))
    }

    /// Builds a delta from its wire form. `null` becomes [`DeltaOp::Remove`];
    /// the reserved `_meta` key is dropped.
    pub fn from_wire(map: Map<String, Value>) -> Self {
        let ops = map
            .into_iter()
            .filter(|(path, _)| path != META_KEY)
            .map(|(path, value)| {
                let op = match value {
                    Value::Null => DeltaOp::Remove,
                    other => DeltaOp::Set(other),
                };
                (path, op)
            })
            .collect();
        Self { ops }
    }

    /// The wire form: a JSON object with `null` for removals.
    pub fn to_wire(&self) -> Map<String, Value> {
        self.ops
            .iter()
            .map(|(path, op)| {
                let value = match op {
                    DeltaOp::Set(v) => v.clone(),
                    DeltaOp::Remove => Value::Null,
                };
                (path.clone(), value)
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a Delta {
    type Item = (&'a String, &'a DeltaOp);
    type IntoIter = btree_map::Iter<'a, String, DeltaOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

impl Serialize for Delta {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.ops.len()))?;
        for (path, op) in &self.ops {
            match op {
                DeltaOp::Set(value) => map.serialize_entry(path, value)?,
                DeltaOp::Remove => map.serialize_entry(path, &Value::Null)?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Delta {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_wire(map))
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Appends `key` to a dotted path, escaping `.` and `\` inside the key.
///
/// `prefix` is `None` at the top level. A top-level empty key and a
/// missing prefix are different things, hence the `Option`.
pub fn join_path(prefix: Option<&str>, key: &str) -> String {
    let mut path = match prefix {
        Some(p) => {
            let mut s = String::with_capacity(p.len() + key.len() + 1);
            s.push_str(p);
            s.push('.');
            s
        }
        None => String::with_capacity(key.len()),
    };
    for ch in key.chars() {
        if ch == '.' || ch == '\\' {
            path.push('\\');
        }
        path.push(ch);
    }
    path
}

/// Splits a dotted path back into unescaped segments.
///
/// Always yields at least one segment. A trailing lone `\` is kept
/// literally.
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => current.push(chars.next().unwrap_or('\\')),
            '.' => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}

// ---------------------------------------------------------------------------
// compute / apply
// ---------------------------------------------------------------------------

/// Computes the operations that turn `previous` into `current`.
///
/// An empty `previous` yields every top-level key of `current` as a
/// `Set`. Otherwise both trees are walked together: maps on both sides
/// are descended into, anything else that differs is replaced whole.
pub fn compute_delta(previous: &Snapshot, current: &Snapshot) -> Delta {
    let mut delta = Delta::new();

    if previous.is_empty() {
        for (key, value) in current {
            delta.set(join_path(None, key), value.clone());
        }
        return delta;
    }

    // Explicit work stack instead of recursion.
    let mut stack: Vec<(Option<String>, &Snapshot, &Snapshot)> =
        vec![(None, previous, current)];

    while let Some((prefix, prev, curr)) = stack.pop() {
        let prefix = prefix.as_deref();

        for (key, curr_value) in curr {
            let path = join_path(prefix, key);
            match (prev.get(key), curr_value) {
                (Some(prev_value), _) if prev_value == curr_value => {}
                (Some(Value::Object(prev_map)), Value::Object(curr_map)) => {
                    stack.push((Some(path), prev_map, curr_map));
                }
                _ => delta.set(path, curr_value.clone()),
            }
        }

        for key in prev.keys() {
            if !curr.contains_key(key) {
                delta.remove(join_path(prefix, key));
            }
        }
    }

    delta
}

/// Applies `delta` to a copy of `base`.
///
/// Paths that can't be applied are logged and skipped; see
/// [`apply_delta_checked`] to get them back.
pub fn apply_delta(base: &Snapshot, delta: &Delta) -> Snapshot {
    apply_delta_checked(base, delta).0
}

/// Applies `delta` to a copy of `base`, returning every path that failed.
///
/// - `Set` creates missing intermediate maps; an intermediate that holds a
///   non-map value is an error.
/// - `Remove` needs every intermediate to exist and be a map; a missing
///   final key is fine.
pub fn apply_delta_checked(
    base: &Snapshot,
    delta: &Delta,
) -> (Snapshot, Vec<PathError>) {
    let mut result = base.clone();
    let mut errors = Vec::new();

    for (path, op) in delta {
        if path == META_KEY {
            continue;
        }
        if let Err(e) = apply_op(&mut result, path, op) {
            warn!(%path, error = %e, "skipping delta path");
            errors.push(e);
        }
    }

    (result, errors)
}

fn apply_op(
    root: &mut Snapshot,
    path: &str,
    op: &DeltaOp,
) -> Result<(), PathError> {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        let child = match op {
            DeltaOp::Set(_) => Some(
                node.entry(segment.clone())
                    .or_insert_with(|| Value::Object(Map::new())),
            ),
            DeltaOp::Remove => node.get_mut(segment),
        };
        node = match child {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(PathError::NotAMap {
                    path: path.to_owned(),
                    segment: segment.clone(),
                });
            }
            None => {
                return Err(PathError::Missing {
                    path: path.to_owned(),
                    segment: segment.clone(),
                });
            }
        };
    }

    match op {
        DeltaOp::Set(value) => {
            node.insert(last.clone(), value.clone());
        }
        DeltaOp::Remove => {
            node.remove(last);
        }
    }
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================
