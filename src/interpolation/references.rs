//! Self-document pass: `{{dotted.path}}` references to other values.

use super::syntax::{self, Token};
use crate::document::{Document, KeyPath, flatten_leaves, lookup_path, scalar_to_string};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

type Leaves = IndexMap<String, Value>;

/// Resolve references to other parts of the same document.
///
/// - every reference matching a primitive leaf flattened at the start of the
///   pass is substituted (native type for a full-value reference, text for an
///   embedded one)
/// - a full-value reference that matches no such leaf is looked up in the
///   document as it is being rewritten, so it sees values already resolved
///   earlier in this pass and may resolve to a whole map or list
///
/// Targets that are themselves unresolved references are never substituted.
/// Anything unmatched is left as-is for a later pass.
pub fn resolve_self_references(mut document: Document) -> Document {
    let leaves = flatten_leaves(&document);
    let mut resolved = 0usize;
    let mut location = KeyPath::root();

    resolve_at(&mut document, &mut location, &leaves, &mut resolved);

    debug!(resolved, "Resolved self references");
    document
}

enum Step {
    Missing,
    Descend,
    Keep,
    Replace(Value),
}

fn step(root: &Value, location: &KeyPath, leaves: &Leaves) -> Step {
    match location.get(root) {
        None => Step::Missing,
        Some(Value::Object(_) | Value::Array(_)) => Step::Descend,
        Some(Value::String(s)) if syntax::has_reference(s) => {
            let replacement = resolve_string(s, leaves, root);
            if replacement.as_str() == Some(s.as_str()) {
                Step::Keep
            } else {
                Step::Replace(replacement)
            }
        }
        Some(_) => Step::Keep,
    }
}

fn resolve_at(root: &mut Value, location: &mut KeyPath, leaves: &Leaves, resolved: &mut usize) {
    if matches!(location.get(root), Some(Value::Array(_))) {
        return resolve_sequence(root, location, leaves, resolved);
    }
    let Some(Value::Object(map)) = location.get(root) else {
        return;
    };
    let keys: Vec<String> = map.keys().cloned().collect();

    for key in keys {
        location.push_key(&key);
        match step(root, location, leaves) {
            Step::Descend => resolve_at(root, location, leaves, resolved),
            Step::Replace(value) => {
                if let Some(slot) = location.get_mut(root) {
                    *slot = value;
                    *resolved += 1;
                }
            }
            Step::Missing | Step::Keep => {}
        }
        location.pop();
    }
}

/// A scalar element resolving to a list is spliced into the sequence.
fn resolve_sequence(root: &mut Value, location: &mut KeyPath, leaves: &Leaves, resolved: &mut usize) {
    let mut index = 0;
    loop {
        location.push_index(index);
        match step(root, location, leaves) {
            Step::Missing => {
                location.pop();
                return;
            }
            Step::Descend => {
                resolve_at(root, location, leaves, resolved);
                index += 1;
            }
            Step::Keep => index += 1,
            Step::Replace(Value::Array(items)) => {
                location.pop();
                let count = items.len();
                if let Some(Value::Array(sequence)) = location.get_mut(root) {
                    sequence.splice(index..=index, items);
                    *resolved += 1;
                }
                index += count;
                continue;
            }
            Step::Replace(value) => {
                if let Some(slot) = location.get_mut(root) {
                    *slot = value;
                    *resolved += 1;
                }
                index += 1;
            }
        }
        location.pop();
    }
}

fn resolve_string(value: &str, leaves: &Leaves, live: &Value) -> Value {
    if let Some(inner) = syntax::full_reference(value) {
        let body = syntax::normalize(inner);
        if let Token::Path(path) = syntax::classify(&body) {
            if let Some(leaf) = leaves.get(path)
                && !syntax::is_unresolved(leaf)
            {
                return leaf.clone();
            }
            if let Some(found) = lookup_path(live, path)
                && !found.is_null()
                && !syntax::is_unresolved(found)
            {
                return found.clone();
            }
        }
        return Value::String(value.to_string());
    }

    Value::String(syntax::rewrite_references(value, |inner| {
        leaves
            .get(inner)
            .filter(|leaf| !syntax::is_unresolved(leaf))
            .and_then(scalar_to_string)
    }))
}
