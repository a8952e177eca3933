//! Fragment loading: one YAML file into one [`Document`].
//!
//! YAML is decoded into `serde_yaml::Value` first and then converted, so that
//! mapping order survives and non-JSON constructs (tagged values, composite
//! keys, non-finite floats) get an explicit policy instead of a panic.

use crate::document::{Document, empty_document, lookup_path, transform};
use crate::error::{StrataError, StrataResult};
use serde_json::{Map, Number, Value};
use serde_yaml::Value as YamlValue;
use std::path::{Path, PathBuf};
use tracing::debug;

const INCLUDE_TAG: &str = "include";
const CWD_TOKEN: &str = "{{cwd}}";

/// Loads fragments from disk.
#[derive(Debug, Clone, Default)]
pub struct FragmentLoader {
    /// Base directory for `!include` paths. `None` rejects the tag.
    include_root: Option<PathBuf>,
}

impl FragmentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the `!include <file> [dotted.key]` tag, resolving files against `root`.
    pub fn with_includes(root: impl Into<PathBuf>) -> Self {
        Self {
            include_root: Some(root.into()),
        }
    }

    pub fn includes_enabled(&self) -> bool {
        self.include_root.is_some()
    }

    /// Load a fragment file.
    ///
    /// An empty file is an empty mapping. `{{cwd}}` inside string values is
    /// replaced with the absolute directory containing the file.
    pub fn load(&self, path: &Path) -> StrataResult<Document> {
        let content = std::fs::read_to_string(path).map_err(|e| StrataError::io(path, e))?;
        let document = self.parse_str(&content, path)?;

        let directory = containing_directory(path)?;
        let directory = directory.display().to_string();
        let document = transform(document, &mut |value| match value {
            Value::String(s) if s.contains(CWD_TOKEN) => Value::String(s.replace(CWD_TOKEN, &directory)),
            other => other,
        });

        debug!(file = %path.display(), "Loaded fragment");
        Ok(document)
    }

    /// Parse YAML text. `source` is only used in diagnostics.
    pub fn parse_str(&self, content: &str, source: &Path) -> StrataResult<Document> {
        let yaml: YamlValue =
            serde_yaml::from_str(content).map_err(|e| StrataError::yaml_parse(source, e))?;

        match self.convert(yaml, source)? {
            Value::Null => Ok(empty_document()),
            document @ Value::Object(_) => Ok(document),
            other => Err(StrataError::invalid_document(
                &source.display().to_string(),
                format!(
                    "root must be a mapping, found {}",
                    crate::document::type_name(&other)
                ),
            )),
        }
    }

    fn convert(&self, value: YamlValue, source: &Path) -> StrataResult<Value> {
        match value {
            YamlValue::Null => Ok(Value::Null),
            YamlValue::Bool(b) => Ok(Value::Bool(b)),
            YamlValue::Number(n) => Ok(convert_number(&n)),
            YamlValue::String(s) => Ok(Value::String(s)),
            YamlValue::Sequence(items) => items
                .into_iter()
                .map(|item| self.convert(item, source))
                .collect::<StrataResult<Vec<_>>>()
                .map(Value::Array),
            YamlValue::Mapping(mapping) => {
                let mut map = Map::new();
                for (key, value) in mapping {
                    let key = convert_key(key, source)?;
                    map.insert(key, self.convert(value, source)?);
                }
                Ok(Value::Object(map))
            }
            YamlValue::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                if tag.trim_start_matches('!') == INCLUDE_TAG
                    && let Some(root) = &self.include_root
                {
                    return self.resolve_include(root, tagged.value, source);
                }
                Err(StrataError::invalid_document(
                    &source.display().to_string(),
                    format!("unsupported tag {}", tag),
                ))
            }
        }
    }

    fn resolve_include(&self, root: &Path, value: YamlValue, source: &Path) -> StrataResult<Value> {
        let source_name = source.display().to_string();
        let YamlValue::String(spec) = value else {
            return Err(StrataError::invalid_document(
                &source_name,
                "!include expects a string of the form '<file> [key]'",
            ));
        };

        let parts: Vec<&str> = spec.split_whitespace().collect();
        let (file, key) = match parts.as_slice() {
            [file] => (*file, None),
            [file, key] => (*file, Some(*key)),
            _ => {
                return Err(StrataError::invalid_document(
                    &source_name,
                    format!("!include expects '<file> [key]', got '{}'", spec),
                ));
            }
        };

        let included_path = root.join(file);
        let content = std::fs::read_to_string(&included_path)
            .map_err(|e| StrataError::io(&included_path, e))?;
        let included = self.parse_str(&content, &included_path)?;

        let Some(key) = key else {
            return Ok(included);
        };
        lookup_path(&included, key).cloned().ok_or_else(|| {
            StrataError::invalid_document(
                &source_name,
                format!("key '{}' not found in {}", key, included_path.display()),
            )
        })
    }
}

fn convert_key(key: YamlValue, source: &Path) -> StrataResult<String> {
    match key {
        YamlValue::String(s) => Ok(s),
        YamlValue::Bool(b) => Ok(b.to_string()),
        YamlValue::Number(n) => Ok(n.to_string()),
        YamlValue::Null => Ok("null".to_string()),
        other => Err(StrataError::invalid_document(
            &source.display().to_string(),
            format!("mapping keys must be scalars, found {:?}", other),
        )),
    }
}

fn convert_number(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Number(i.into())
    } else if let Some(u) = n.as_u64() {
        Value::Number(u.into())
    } else {
        // NaN and infinities have no JSON representation
        n.as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(n.to_string()))
    }
}

fn containing_directory(path: &Path) -> StrataResult<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    if parent.is_absolute() {
        return Ok(parent.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| StrataError::io(parent, e))?;
    if parent.as_os_str().is_empty() {
        Ok(cwd)
    } else {
        Ok(cwd.join(parent))
    }
}
