//! Selector-based pruning of a merged leaf document.
//!
//! ```yaml
//! _filters:
//!   - selector:
//!       env: "prod.*"
//!     keys:
//!       values: [app, database]
//!       regex: "^monitoring_"
//! ```
//!
//! Every top-level key that is not a level key is dropped unless a rule whose
//! selector matches the document keeps it.

use crate::document::{Document, scalar_to_string};
use crate::error::{StrataError, StrataResult};
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

const SOURCE: &str = "filter rules";

#[derive(Debug, Default, Deserialize)]
struct RawKeys {
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    regex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    selector: Option<Value>,
    #[serde(default)]
    keys: RawKeys,
}

#[derive(Debug)]
struct Rule {
    selector: Vec<(String, Regex)>,
    values: Vec<String>,
    regex: Option<Regex>,
}

impl Rule {
    fn matches(&self, document: &Document) -> bool {
        self.selector.iter().all(|(key, pattern)| {
            let value = document
                .get(key)
                .and_then(scalar_to_string)
                .unwrap_or_default();
            pattern.is_match(&value)
        })
    }

    fn keeps(&self, key: &str) -> bool {
        self.values.iter().any(|v| v == key) || self.regex.as_ref().is_some_and(|re| re.is_match(key))
    }
}

/// Compile `pattern` so it must match at the start of the input.
fn anchored(pattern: &str) -> StrataResult<Regex> {
    Regex::new(&format!("^(?:{})", pattern))
        .map_err(|e| StrataError::invalid_document(SOURCE, format!("invalid regex '{}': {}", pattern, e)))
}

#[derive(Debug)]
pub struct FilterRules {
    rules: Vec<Rule>,
    levels: Vec<String>,
}

impl FilterRules {
    /// Parse the rule list stored under the filter-rules key.
    pub fn from_value(rules: &Value, levels: &[String]) -> StrataResult<Self> {
        let raw: Vec<RawRule> = serde_json::from_value(rules.clone())
            .map_err(|e| StrataError::invalid_document(SOURCE, e))?;

        let rules = raw
            .into_iter()
            .map(|rule| {
                let selector = match rule.selector {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Object(map)) => map
                        .into_iter()
                        .map(|(key, pattern)| {
                            let pattern = scalar_to_string(&pattern).ok_or_else(|| {
                                StrataError::invalid_document(
                                    SOURCE,
                                    format!("selector pattern for '{}' must be a string", key),
                                )
                            })?;
                            Ok((key, anchored(&pattern)?))
                        })
                        .collect::<StrataResult<Vec<_>>>()?,
                    Some(_) => {
                        return Err(StrataError::invalid_document(
                            SOURCE,
                            "Filter selector must be a dictionary",
                        ));
                    }
                };
                Ok(Rule {
                    selector,
                    values: rule.keys.values,
                    regex: rule.keys.regex.as_deref().map(anchored).transpose()?,
                })
            })
            .collect::<StrataResult<Vec<_>>>()?;

        Ok(Self {
            rules,
            levels: levels.to_vec(),
        })
    }

    /// Drop every non-level top-level key no matching rule keeps.
    pub fn apply(&self, document: &mut Document) {
        let matching: Vec<&Rule> = self.rules.iter().filter(|r| r.matches(document)).collect();
        let levels: HashSet<&str> = self.levels.iter().map(String::as_str).collect();

        if let Some(map) = document.as_object_mut() {
            map.retain(|key, _| {
                levels.contains(key.as_str()) || matching.iter().any(|rule| rule.keeps(key))
            });
        }
    }
}
