//! Document model and generic traversal.
//!
//! A document is a `serde_json::Value` built with `preserve_order`, so mapping
//! keys keep the order in which they were first introduced. Every stage of the
//! pipeline either rewrites scalars through [`transform`] / [`try_transform`]
//! or reads them through [`visit_scalars`].

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::fmt;

/// The central mutable tree.
pub type Document = Value;

/// Create an empty mapping document.
pub fn empty_document() -> Document {
    Value::Object(Map::new())
}

/// One step of a [`KeyPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a value inside a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPath(Vec<PathSegment>);

impl KeyPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn push_key(&mut self, key: &str) {
        self.0.push(PathSegment::Key(key.to_string()));
    }

    pub fn push_index(&mut self, index: usize) {
        self.0.push(PathSegment::Index(index));
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// The value at this location in `root`, if it exists.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(root, |value, segment| match segment {
            PathSegment::Key(key) => value.get(key.as_str()),
            PathSegment::Index(index) => value.get(*index),
        })
    }

    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        self.0.iter().try_fold(root, |value, segment| match segment {
            PathSegment::Key(key) => value.get_mut(key.as_str()),
            PathSegment::Index(index) => value.get_mut(*index),
        })
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// Rewrite every scalar leaf of `value` with `f`.
///
/// Mappings are rewritten in place, sequences are rebuilt. When `f` turns a
/// scalar sequence element into a sequence, the result is spliced into the
/// parent sequence one level deep instead of being nested.
pub fn transform<F>(value: Value, f: &mut F) -> Value
where
    F: FnMut(Value) -> Value,
{
    let result: Result<Value, Infallible> = try_transform(value, &mut |scalar| Ok(f(scalar)));
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// Fallible variant of [`transform`]; the first error aborts the walk.
pub fn try_transform<E, F>(value: Value, f: &mut F) -> Result<Value, E>
where
    F: FnMut(Value) -> Result<Value, E>,
{
    match value {
        Value::Object(mut map) => {
            for (_, slot) in map.iter_mut() {
                let taken = std::mem::take(slot);
                *slot = try_transform(taken, f)?;
            }
            Ok(Value::Object(map))
        }
        Value::Array(items) => {
            let mut rebuilt = Vec::with_capacity(items.len());
            for item in items {
                if is_composite(&item) {
                    rebuilt.push(try_transform(item, f)?);
                    continue;
                }
                match f(item)? {
                    Value::Array(expanded) => rebuilt.extend(expanded),
                    other => rebuilt.push(other),
                }
            }
            Ok(Value::Array(rebuilt))
        }
        scalar => f(scalar),
    }
}

/// Visit every scalar leaf together with its location. Read-only.
pub fn visit_scalars<E, F>(value: &Value, f: &mut F) -> Result<(), E>
where
    F: FnMut(&KeyPath, &Value) -> Result<(), E>,
{
    let mut path = KeyPath::root();
    visit_inner(value, &mut path, f)
}

fn visit_inner<E, F>(value: &Value, path: &mut KeyPath, f: &mut F) -> Result<(), E>
where
    F: FnMut(&KeyPath, &Value) -> Result<(), E>,
{
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push_key(key);
                visit_inner(child, path, f)?;
                path.pop();
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push_index(index);
                visit_inner(child, path, f)?;
                path.pop();
            }
            Ok(())
        }
        scalar => f(path, scalar),
    }
}

/// Flatten nested mappings into `dotted.path -> primitive leaf`.
///
/// Sequences and nulls are not flattened; composite values are only reachable
/// through [`lookup_path`].
pub fn flatten_leaves(value: &Value) -> IndexMap<String, Value> {
    let mut leaves = IndexMap::new();
    flatten_inner(value, String::new(), &mut leaves);
    leaves
}

fn flatten_inner(value: &Value, prefix: String, leaves: &mut IndexMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let next = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_inner(child, next, leaves);
            }
        }
        leaf if is_primitive(leaf) && !prefix.is_empty() => {
            leaves.insert(prefix, leaf.clone());
        }
        _ => {}
    }
}

/// Follow a dotted path through nested mappings.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// String, number or boolean.
pub fn is_primitive(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

pub fn is_composite(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Coerce a primitive for embedding into a larger string.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Human-readable type name used in diagnostics.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "map",
        Value::Array(_) => "list",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}
