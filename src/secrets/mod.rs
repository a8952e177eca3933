//! Secret references and the backend registry.
//!
//! A secret reference is written `{{type.param(value).flag}}`. The body is
//! split on dots outside parentheses, so parameter values may contain dots.
//! Backends implement [`SecretResolver`]; the [`SecretRegistry`] asks them in
//! registration order and the first one that supports the type wins.

pub mod aws;
pub mod sops;
pub mod vault;

pub use aws::{AwsScope, ObjectStoreClient, ParameterStoreClient, S3SecretResolver, SsmSecretResolver};
pub use sops::SopsSecretResolver;
pub use vault::{VaultSecretResolver, VaultSettings};

use crate::error::{StrataError, StrataResult};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;

/// Ordered secret parameters. A `None` value is a flag without parentheses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretParams(IndexMap<String, Option<String>>);

impl SecretParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        self.0.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Value of a parenthesised parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_deref())
    }

    /// A bare flag, or a parameter whose value is `true`.
    pub fn flag(&self, name: &str) -> bool {
        match self.0.get(name) {
            Some(None) => true,
            Some(Some(value)) => value.eq_ignore_ascii_case("true"),
            None => false,
        }
    }

    pub fn require(&self, name: &str) -> StrataResult<&str> {
        self.get(name)
            .ok_or_else(|| StrataError::missing_parameter(name, self))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SecretParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                Some(value) => write!(f, "{}: {:?}", name, value)?,
                None => write!(f, "{}", name)?,
            }
        }
        write!(f, "}}")
    }
}

/// A parsed `type.param(value)...` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub secret_type: String,
    pub params: SecretParams,
    /// Normalised reference body, used as the cache key.
    pub raw: String,
}

impl SecretReference {
    /// Parse a reference body.
    ///
    /// Returns `None` for anything that is not a well-formed call: unbalanced
    /// parentheses, fewer than two segments or an empty type.
    pub fn parse(body: &str) -> Option<Self> {
        let parts = split_outside_parens(body)?;
        let (secret_type, param_parts) = parts.split_first()?;
        if param_parts.is_empty() || secret_type.is_empty() || secret_type.contains(['(', ')']) {
            return None;
        }

        let mut params = SecretParams::new();
        for part in param_parts {
            match part.find('(') {
                Some(open) => {
                    let name = &part[..open];
                    let value = part[open + 1..].strip_suffix(')')?;
                    if name.is_empty() {
                        return None;
                    }
                    params.insert(name, Some(value.to_string()));
                }
                None if part.is_empty() || part.contains(')') => return None,
                None => params.insert(*part, None),
            }
        }

        Some(Self {
            secret_type: secret_type.to_string(),
            params,
            raw: body.to_string(),
        })
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{{}}}}}", self.raw)
    }
}

fn split_outside_parens(body: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1)?,
            '.' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(&body[start..]);
    Some(parts)
}

/// Per-run inputs shared by every backend call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveContext {
    /// Taken from the document's `aws.profile`.
    pub default_aws_profile: Option<String>,
}

/// A secret backend.
pub trait SecretResolver: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    fn supports(&self, secret_type: &str) -> bool;

    fn resolve(&self, reference: &SecretReference, context: &ResolveContext) -> StrataResult<Value>;
}

/// Ordered list of backends. First match wins.
#[derive(Default)]
pub struct SecretRegistry {
    resolvers: Vec<Box<dyn SecretResolver>>,
}

impl fmt::Debug for SecretRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| r.name()))
            .finish()
    }
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: impl SecretResolver + 'static) {
        self.resolvers.push(Box::new(resolver));
    }

    pub fn with(mut self, resolver: impl SecretResolver + 'static) -> Self {
        self.register(resolver);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub fn supports(&self, secret_type: &str) -> bool {
        self.resolvers.iter().any(|r| r.supports(secret_type))
    }

    pub fn resolve(&self, reference: &SecretReference, context: &ResolveContext) -> StrataResult<Value> {
        let resolver = self
            .resolvers
            .iter()
            .find(|r| r.supports(&reference.secret_type))
            .ok_or_else(|| {
                StrataError::unsupported_secret_type(&reference.secret_type, &reference.params)
            })?;
        resolver.resolve(reference, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        secret_type: &'static str,
        value: Value,
    }

    impl SecretResolver for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, secret_type: &str) -> bool {
            secret_type == self.secret_type
        }

        fn resolve(&self, _: &SecretReference, _: &ResolveContext) -> StrataResult<Value> {
            Ok(self.value.clone())
        }
    }

    #[test]
    fn test_parse_keeps_dots_inside_parentheses() {
        let reference = SecretReference::parse("ssm.path(/app/db.password).aws_profile(prod)").unwrap();
        assert_eq!(reference.secret_type, "ssm");
        assert_eq!(reference.params.get("path"), Some("/app/db.password"));
        assert_eq!(reference.params.get("aws_profile"), Some("prod"));
    }

    #[test]
    fn test_parse_flag_parameter() {
        let reference = SecretReference::parse("s3.bucket(b).path(p).base64encode").unwrap();
        assert!(reference.params.contains("base64encode"));
        assert_eq!(reference.params.get("base64encode"), None);
        assert!(reference.params.flag("base64encode"));
        assert!(!reference.params.flag("missing"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(SecretReference::parse("ssm").is_none());
        assert!(SecretReference::parse(".path(x)").is_none());
        assert!(SecretReference::parse("ssm.path(x").is_none());
        assert!(SecretReference::parse("ssm.path(x))").is_none());
        assert!(SecretReference::parse("ssm.(x)").is_none());
    }

    #[test]
    fn test_require_names_missing_parameter() {
        let reference = SecretReference::parse("vault.key(a/b)").unwrap();
        let err = reference.params.require("path").unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingParameter);
        assert!(err.message.contains("'path'"));
        assert!(err.message.contains("key: \"a/b\""));
    }

    #[test]
    fn test_registry_first_match_wins() {
        let registry = SecretRegistry::new()
            .with(Fixed {
                name: "first",
                secret_type: "kv",
                value: json!("one"),
            })
            .with(Fixed {
                name: "second",
                secret_type: "kv",
                value: json!("two"),
            });
        let reference = SecretReference::parse("kv.path(x)").unwrap();
        let value = registry.resolve(&reference, &ResolveContext::default()).unwrap();
        assert_eq!(value, json!("one"));
    }

    #[test]
    fn test_registry_unsupported_type() {
        let registry = SecretRegistry::new();
        let reference = SecretReference::parse("gcp.path(x)").unwrap();
        let err = registry
            .resolve(&reference, &ResolveContext::default())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedSecretType);
        assert!(err.message.contains("'gcp'"));
        assert!(err.message.contains("path: \"x\""));
    }
}
