//! Deep merge of configuration fragments.
//!
//! Fragments are folded left to right: mappings merge key by key, lists are
//! reconciled by a configurable chain of [`ListStrategy`] values and
//! primitives are overridden by the later fragment. Two composite values of
//! different shape are a type conflict and fail unless the caller configured
//! a more lenient [`ConflictStrategy`].

use crate::document::{KeyPath, is_primitive, type_name};
use crate::error::{StrataError, StrataResult};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// User-supplied list reconciliation.
///
/// Returning `None` means "not applicable here" and hands the lists to the
/// next strategy in the chain.
pub trait ListMerge: Send + Sync {
    fn merge_lists(&self, base: &[Value], incoming: &[Value]) -> Option<Vec<Value>>;
}

impl<F> ListMerge for F
where
    F: Fn(&[Value], &[Value]) -> Option<Vec<Value>> + Send + Sync,
{
    fn merge_lists(&self, base: &[Value], incoming: &[Value]) -> Option<Vec<Value>> {
        self(base, incoming)
    }
}

/// How two lists under the same key are combined.
#[derive(Clone)]
pub enum ListStrategy {
    Append,
    Override,
    Prepend,
    /// Append incoming elements not already present in the base list.
    /// Lists containing non-primitive elements are appended as-is.
    AppendUnique,
    Custom {
        name: String,
        merge: Arc<dyn ListMerge>,
    },
}

impl fmt::Debug for ListStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListStrategy({})", self.name())
    }
}

impl ListStrategy {
    pub fn custom(name: impl Into<String>, merge: impl ListMerge + 'static) -> Self {
        ListStrategy::Custom {
            name: name.into(),
            merge: Arc::new(merge),
        }
    }

    /// Parse a strategy name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "append" => Some(ListStrategy::Append),
            "override" => Some(ListStrategy::Override),
            "prepend" => Some(ListStrategy::Prepend),
            "append_unique" => Some(ListStrategy::AppendUnique),
            "merge_by_id" => Some(ListStrategy::custom("merge_by_id", merge_by_id)),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ListStrategy::Append => "append",
            ListStrategy::Override => "override",
            ListStrategy::Prepend => "prepend",
            ListStrategy::AppendUnique => "append_unique",
            ListStrategy::Custom { name, .. } => name,
        }
    }

    /// Apply this strategy. `None` falls through to the next one.
    fn apply(&self, base: &[Value], incoming: &[Value]) -> Option<Vec<Value>> {
        match self {
            ListStrategy::Append => Some(base.iter().chain(incoming).cloned().collect()),
            ListStrategy::Override => Some(incoming.to_vec()),
            ListStrategy::Prepend => Some(incoming.iter().chain(base).cloned().collect()),
            ListStrategy::AppendUnique => {
                let mut merged = base.to_vec();
                let all_primitive = base.iter().chain(incoming).all(is_primitive);
                for item in incoming {
                    if all_primitive && base.contains(item) {
                        continue;
                    }
                    merged.push(item.clone());
                }
                Some(merged)
            }
            ListStrategy::Custom { merge, .. } => merge.merge_lists(base, incoming),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStrategy {
    /// Recurse key by key.
    Merge,
    Override,
}

/// Used for same-typed primitives and when every list strategy falls through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    Override,
    UseExisting,
}

/// Used when the base and incoming values have incompatible shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    Fail,
    Override,
    UseExisting,
}

/// Strategy chains for one run. Read-only during the merge.
#[derive(Debug, Clone)]
pub struct MergeStrategies {
    pub list: Vec<ListStrategy>,
    pub map: Vec<MapStrategy>,
    pub fallback: Vec<FallbackStrategy>,
    pub conflict: Vec<ConflictStrategy>,
}

impl Default for MergeStrategies {
    fn default() -> Self {
        Self {
            list: vec![ListStrategy::Append],
            map: vec![MapStrategy::Merge],
            fallback: vec![FallbackStrategy::Override],
            conflict: vec![ConflictStrategy::Fail],
        }
    }
}

impl MergeStrategies {
    /// Replace the list chain, keeping the other defaults.
    pub fn with_list_strategies(mut self, list: Vec<ListStrategy>) -> Self {
        self.list = list;
        self
    }

    pub fn with_conflict_strategies(mut self, conflict: Vec<ConflictStrategy>) -> Self {
        self.conflict = conflict;
        self
    }
}

/// Deep merge `incoming` into `base`, with `incoming` taking precedence.
///
/// - Mappings merge recursively; keys new to `base` are appended in the order
///   `incoming` introduces them
/// - Lists go through the configured list strategy chain
/// - Primitives and nulls are replaced by the incoming value
/// - A map against a list, or a composite against a non-null scalar, is a
///   type conflict naming the dotted key and both types
///
/// # Example
/// ```
/// use serde_json::json;
/// use strata::merge::{deep_merge, MergeStrategies};
///
/// let base = json!({"server": {"port": 8080, "host": "localhost"}, "features": ["a"]});
/// let overlay = json!({"server": {"port": 9000}, "features": ["b"]});
/// let result = deep_merge(base, overlay, &MergeStrategies::default()).unwrap();
/// assert_eq!(
///     result,
///     json!({"server": {"port": 9000, "host": "localhost"}, "features": ["a", "b"]})
/// );
/// ```
pub fn deep_merge(base: Value, incoming: Value, strategies: &MergeStrategies) -> StrataResult<Value> {
    let mut path = KeyPath::root();
    merge_value(base, incoming, strategies, &mut path)
}

/// Merge multiple values in order, with later values taking precedence.
///
/// Equivalent to left-folding [`deep_merge`] over the values.
pub fn deep_merge_all(
    values: impl IntoIterator<Item = Value>,
    strategies: &MergeStrategies,
) -> StrataResult<Value> {
    values
        .into_iter()
        .try_fold(Value::Null, |acc, next| deep_merge(acc, next, strategies))
}

fn merge_value(
    base: Value,
    incoming: Value,
    strategies: &MergeStrategies,
    path: &mut KeyPath,
) -> StrataResult<Value> {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            merge_maps(base_map, incoming_map, strategies, path)
        }
        (Value::Array(base_list), Value::Array(incoming_list)) => {
            Ok(merge_lists(base_list, incoming_list, strategies))
        }
        (Value::Null, incoming) => Ok(incoming),
        (_, Value::Null) => Ok(Value::Null),
        (base, incoming) if is_primitive(&base) && is_primitive(&incoming) => {
            Ok(apply_fallback(base, incoming, strategies))
        }
        (base, incoming) => resolve_conflict(base, incoming, strategies, path),
    }
}

fn merge_maps(
    mut base: Map<String, Value>,
    incoming: Map<String, Value>,
    strategies: &MergeStrategies,
    path: &mut KeyPath,
) -> StrataResult<Value> {
    for strategy in &strategies.map {
        match strategy {
            MapStrategy::Merge => {
                for (key, incoming_value) in incoming {
                    // In-place so existing keys keep their position
                    if let Some(slot) = base.get_mut(&key) {
                        path.push_key(&key);
                        let existing = std::mem::take(slot);
                        *slot = merge_value(existing, incoming_value, strategies, path)?;
                        path.pop();
                    } else {
                        base.insert(key, incoming_value);
                    }
                }
                return Ok(Value::Object(base));
            }
            MapStrategy::Override => return Ok(Value::Object(incoming)),
        }
    }
    Ok(apply_fallback(
        Value::Object(base),
        Value::Object(incoming),
        strategies,
    ))
}

fn merge_lists(base: Vec<Value>, incoming: Vec<Value>, strategies: &MergeStrategies) -> Value {
    for strategy in &strategies.list {
        if let Some(merged) = strategy.apply(&base, &incoming) {
            return Value::Array(merged);
        }
    }
    apply_fallback(Value::Array(base), Value::Array(incoming), strategies)
}

fn apply_fallback(base: Value, incoming: Value, strategies: &MergeStrategies) -> Value {
    match strategies.fallback.first() {
        Some(FallbackStrategy::UseExisting) => base,
        Some(FallbackStrategy::Override) | None => incoming,
    }
}

fn resolve_conflict(
    base: Value,
    incoming: Value,
    strategies: &MergeStrategies,
    path: &KeyPath,
) -> StrataResult<Value> {
    match strategies.conflict.first() {
        Some(ConflictStrategy::Override) => Ok(incoming),
        Some(ConflictStrategy::UseExisting) => Ok(base),
        Some(ConflictStrategy::Fail) | None => Err(StrataError::type_conflict(
            &path.to_string(),
            type_name(&base),
            type_name(&incoming),
        )),
    }
}

/// Merge lists of mappings by their `id` field.
///
/// An incoming item replaces every base item with the same `id`. An incoming
/// item carrying a `remove` key drops the matching base items and is not
/// added itself. Falls through when either list holds anything but mappings.
pub fn merge_by_id(base: &[Value], incoming: &[Value]) -> Option<Vec<Value>> {
    if !base.iter().chain(incoming).all(Value::is_object) {
        return None;
    }

    let mut result = base.to_vec();
    for item in incoming {
        if let Some(id) = item.get("id") {
            result.retain(|existing| existing.get("id") != Some(id));
        }
        if item.get("remove").is_none() {
            result.push(item.clone());
        }
    }
    Some(result)
}
