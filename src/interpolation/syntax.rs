//! Scanner for `{{...}}` reference syntax.
//!
//! A string is split into [`Segment`]s: plain text, live references and
//! escaped references (``{{`...`}}``). Escaped references are never resolved,
//! only unwrapped by the final cleanup pass.

use regex_lite::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{`(.*?)`\}\}|\{\{([^{}]*)\}\}").expect("token pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// A live reference; `inner` is the text between the braces, unmodified.
    Reference { raw: &'a str, inner: &'a str },
    Escaped { raw: &'a str, inner: &'a str },
}

impl<'a> Segment<'a> {
    pub fn raw(&self) -> &'a str {
        match self {
            Segment::Text(text) => *text,
            Segment::Reference { raw, .. } | Segment::Escaped { raw, .. } => *raw,
        }
    }
}

/// What a normalised reference body points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// `env(NAME)`
    Env(&'a str),
    /// `type.param(value)...`
    Call(&'a str),
    /// `dotted.path`
    Path(&'a str),
}

pub fn segments(value: &str) -> Vec<Segment<'_>> {
    let mut result = Vec::new();
    let mut last = 0;

    for caps in TOKEN_PATTERN.captures_iter(value) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last {
            result.push(Segment::Text(&value[last..whole.start()]));
        }

        if let Some(inner) = caps.get(1) {
            result.push(Segment::Escaped {
                raw: whole.as_str(),
                inner: inner.as_str(),
            });
        } else if let Some(inner) = caps.get(2)
            && is_reference_body(inner.as_str())
        {
            result.push(Segment::Reference {
                raw: whole.as_str(),
                inner: inner.as_str(),
            });
        } else {
            result.push(Segment::Text(whole.as_str()));
        }
        last = whole.end();
    }

    if last < value.len() {
        result.push(Segment::Text(&value[last..]));
    }
    result
}

fn is_reference_body(inner: &str) -> bool {
    let trimmed = inner.trim();
    !trimmed.is_empty() && !trimmed.starts_with('`') && !trimmed.ends_with('`')
}

/// True when `value` contains at least one live (unescaped) reference.
pub fn has_reference(value: &str) -> bool {
    segments(value)
        .iter()
        .any(|s| matches!(s, Segment::Reference { .. }))
}

pub fn has_escape(value: &str) -> bool {
    segments(value)
        .iter()
        .any(|s| matches!(s, Segment::Escaped { .. }))
}

/// String value that still carries a live reference.
pub fn is_unresolved(value: &Value) -> bool {
    value.as_str().is_some_and(has_reference)
}

/// The body of `value` when the whole string is exactly one reference.
pub fn full_reference(value: &str) -> Option<&str> {
    match segments(value).as_slice() {
        [Segment::Reference { inner, .. }] => Some(*inner),
        _ => None,
    }
}

/// Strip whitespace outside parentheses: `{{ a . b }}` is `{{a.b}}`, while
/// parameter values keep their spaces.
pub fn normalize(inner: &str) -> String {
    let mut depth = 0usize;
    let mut normalized = String::with_capacity(inner.len());
    for c in inner.chars() {
        match c {
            '(' => {
                depth += 1;
                normalized.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                normalized.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {}
            c => normalized.push(c),
        }
    }
    normalized
}

pub fn classify(body: &str) -> Token<'_> {
    if let Some(name) = body
        .strip_prefix("env(")
        .and_then(|rest| rest.strip_suffix(')'))
        && !name.trim().is_empty()
        && !name.contains(['(', ')'])
    {
        return Token::Env(name);
    }
    if body.contains('(') {
        Token::Call(body)
    } else {
        Token::Path(body)
    }
}

/// Rebuild `value`, replacing each live reference for which `replace`
/// returns a value. Other segments are copied verbatim.
pub fn rewrite_references<F>(value: &str, mut replace: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut rewritten = String::with_capacity(value.len());
    for segment in segments(value) {
        match segment {
            Segment::Reference { raw, inner } => match replace(inner) {
                Some(replacement) => rewritten.push_str(&replacement),
                None => rewritten.push_str(raw),
            },
            other => rewritten.push_str(other.raw()),
        }
    }
    rewritten
}

/// Unwrap every escaped reference to its literal inner text.
pub fn unescape(value: &str) -> String {
    segments(value)
        .into_iter()
        .map(|segment| match segment {
            Segment::Escaped { inner, .. } => inner,
            other => other.raw(),
        })
        .collect()
}
