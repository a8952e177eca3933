//! Completeness check and the final escape cleanup.

use super::syntax;
use crate::document::{Document, transform, visit_scalars};
use crate::error::{StrataError, StrataResult};
use serde_json::Value;

/// Fail on the first string that still carries a live reference.
///
/// Escaped references are literal text and pass.
pub fn validate(document: &Document) -> StrataResult<()> {
    visit_scalars(document, &mut |path, value| match value {
        Value::String(s) if syntax::has_reference(s) => {
            Err(StrataError::unresolved_interpolation(&path.to_string(), s))
        }
        _ => Ok(()),
    })
}

/// Unwrap ``{{`...`}}`` escapes to their literal text.
pub fn clean_escapes(document: Document) -> Document {
    transform(document, &mut |value| match value {
        Value::String(s) if syntax::has_escape(&s) => Value::String(syntax::unescape(&s)),
        other => other,
    })
}
