//! Environment pass: `{{env(NAME)}}`.

use super::syntax::{self, Token};
use crate::config::EnvProvider;
use crate::document::{Document, transform};
use serde_json::Value;

/// Substitute environment variables.
///
/// A full-value reference to an unset variable becomes `null`; an embedded
/// one becomes the empty string. Neither is an error.
pub fn resolve_env(document: Document, env: &dyn EnvProvider) -> Document {
    transform(document, &mut |value| match value {
        Value::String(s) if syntax::has_reference(&s) => resolve_string(s, env),
        other => other,
    })
}

fn resolve_string(value: String, env: &dyn EnvProvider) -> Value {
    if let Some(inner) = syntax::full_reference(&value) {
        let body = syntax::normalize(inner);
        return match syntax::classify(&body) {
            Token::Env(name) => env.var(name.trim()).map_or(Value::Null, Value::String),
            _ => Value::String(value),
        };
    }

    Value::String(syntax::rewrite_references(&value, |inner| match syntax::classify(inner) {
        Token::Env(name) => Some(env.var(name).unwrap_or_default()),
        _ => None,
    }))
}
