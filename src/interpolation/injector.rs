//! Secret pass: `{{type.param(value)...}}` dispatched to the registered backends.

use super::syntax::{self, Segment, Token};
use crate::document::{Document, scalar_to_string, try_transform};
use crate::error::StrataResult;
use crate::secrets::{ResolveContext, SecretReference, SecretRegistry};
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_SECRET_CACHE_CAPACITY: usize = 1024;

/// Resolved secrets, keyed by reference and AWS profile.
///
/// Safe to share between documents processed concurrently.
pub struct SecretCache {
    entries: Mutex<LruCache<String, Value>>,
}

impl Default for SecretCache {
    fn default() -> Self {
        Self::new(DEFAULT_SECRET_CACHE_CAPACITY)
    }
}

impl SecretCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn key(reference: &SecretReference, context: &ResolveContext) -> String {
        format!(
            "{}|{}",
            reference.raw,
            context.default_aws_profile.as_deref().unwrap_or_default()
        )
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: String, value: Value) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .put(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Walks a document and replaces secret references with backend values.
pub struct SecretInjector<'a> {
    registry: &'a SecretRegistry,
    cache: &'a SecretCache,
    context: ResolveContext,
}

impl<'a> SecretInjector<'a> {
    pub fn new(registry: &'a SecretRegistry, cache: &'a SecretCache, context: ResolveContext) -> Self {
        Self {
            registry,
            cache,
            context,
        }
    }

    /// Resolve every well-formed secret reference in `document`.
    ///
    /// Malformed calls and dotted paths are left alone. A reference whose type
    /// no backend supports, or whose backend fails, aborts the pass.
    pub fn resolve(&self, document: Document) -> StrataResult<Document> {
        try_transform(document, &mut |value| match value {
            Value::String(s) if syntax::has_reference(&s) => self.resolve_string(s),
            other => Ok(other),
        })
    }

    fn resolve_string(&self, value: String) -> StrataResult<Value> {
        if let Some(inner) = syntax::full_reference(&value) {
            let body = syntax::normalize(inner);
            return match parse_call(&body) {
                Some(reference) => self.lookup(&reference),
                None => Ok(Value::String(value)),
            };
        }

        let mut rewritten = String::with_capacity(value.len());
        for segment in syntax::segments(&value) {
            let Segment::Reference { raw, inner } = segment else {
                rewritten.push_str(segment.raw());
                continue;
            };
            let Some(reference) = parse_call(inner) else {
                rewritten.push_str(raw);
                continue;
            };
            let secret = self.lookup(&reference)?;
            match scalar_to_string(&secret) {
                Some(text) => rewritten.push_str(&text),
                None => {
                    warn!(
                        reference = %reference,
                        found = crate::document::type_name(&secret),
                        "Secret cannot be embedded in a string, leaving reference in place"
                    );
                    rewritten.push_str(raw);
                }
            }
        }
        Ok(Value::String(rewritten))
    }

    fn lookup(&self, reference: &SecretReference) -> StrataResult<Value> {
        let key = SecretCache::key(reference, &self.context);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        debug!(secret_type = %reference.secret_type, "Resolving secret");
        let value = self.registry.resolve(reference, &self.context)?;
        self.cache.put(key, value.clone());
        Ok(value)
    }
}

fn parse_call(body: &str) -> Option<SecretReference> {
    match syntax::classify(body) {
        Token::Call(call) => SecretReference::parse(call),
        _ => None,
    }
}
