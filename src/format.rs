//! Output formatting: insertion-ordered YAML and 4-space-indented JSON.

use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Output format for the resolved document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl FromStr for OutputFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> StrataResult<Self> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            _ => Err(StrataError::unknown_output_format(s)),
        }
    }
}

impl OutputFormat {
    pub fn parse(s: &str) -> StrataResult<Self> {
        s.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Yaml => "yaml",
            OutputFormat::Json => "json",
        }
    }
}

/// Serializer switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Render multi-line strings as literal blocks (`|`).
    pub multiline_block_style: bool,
    /// Emit non-ASCII characters as-is instead of escaping them.
    pub allow_unicode: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            multiline_block_style: false,
            allow_unicode: true,
        }
    }
}

/// Render `value` in the requested format. The result ends with a newline.
pub fn render(value: &Value, format: OutputFormat, options: &RenderOptions) -> StrataResult<String> {
    match format {
        OutputFormat::Yaml => Ok(to_yaml(value, options)),
        OutputFormat::Json => to_json(value, options),
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

pub fn to_json(value: &Value, options: &RenderOptions) -> StrataResult<String> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| StrataError::invalid_document("output", e))?;

    let mut json =
        String::from_utf8(buffer).map_err(|e| StrataError::invalid_document("output", e))?;
    if !options.allow_unicode {
        json = escape_json_non_ascii(&json);
    }
    json.push('\n');
    Ok(json)
}

/// Non-ASCII only occurs inside string literals, so escaping the whole text is safe.
fn escape_json_non_ascii(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            escaped.push(c);
            continue;
        }
        let mut units = [0u16; 2];
        for unit in c.encode_utf16(&mut units) {
            escaped.push_str(&format!("\\u{:04x}", unit));
        }
    }
    escaped
}

// ---------------------------------------------------------------------------
// YAML
// ---------------------------------------------------------------------------

const INDENT: usize = 2;

/// Block-style YAML in document insertion order.
///
/// Sequences under a mapping key sit at the key's indentation, as PyYAML and
/// most hand-written configuration do.
pub fn to_yaml(value: &Value, options: &RenderOptions) -> String {
    let mut out = String::new();
    match value {
        Value::Object(map) if !map.is_empty() => write_mapping(&mut out, map, 0, false, options),
        Value::Array(items) if !items.is_empty() => {
            write_sequence(&mut out, items, 0, false, options)
        }
        scalar => {
            write_scalar(&mut out, scalar, INDENT, options);
            out.push('\n');
        }
    }
    out
}

fn pad(out: &mut String, indent: usize) {
    out.extend(std::iter::repeat_n(' ', indent));
}

/// `inline_first` continues the current line (after a `- ` marker).
fn write_mapping(
    out: &mut String,
    map: &Map<String, Value>,
    indent: usize,
    inline_first: bool,
    options: &RenderOptions,
) {
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 || !inline_first {
            pad(out, indent);
        }
        out.push_str(&render_string(key, options));
        out.push(':');

        match value {
            Value::Object(child) if !child.is_empty() => {
                out.push('\n');
                write_mapping(out, child, indent + INDENT, false, options);
            }
            Value::Array(items) if !items.is_empty() => {
                out.push('\n');
                write_sequence(out, items, indent, false, options);
            }
            scalar => {
                out.push(' ');
                write_scalar(out, scalar, indent + INDENT, options);
                out.push('\n');
            }
        }
    }
}

fn write_sequence(
    out: &mut String,
    items: &[Value],
    indent: usize,
    inline_first: bool,
    options: &RenderOptions,
) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 || !inline_first {
            pad(out, indent);
        }
        out.push_str("- ");

        match item {
            Value::Object(child) if !child.is_empty() => {
                write_mapping(out, child, indent + INDENT, true, options);
            }
            Value::Array(nested) if !nested.is_empty() => {
                write_sequence(out, nested, indent + INDENT, true, options);
            }
            scalar => {
                write_scalar(out, scalar, indent + INDENT, options);
                out.push('\n');
            }
        }
    }
}

/// Write a scalar or an empty composite. Block strings put their content at
/// `content_indent` and leave the cursor at the end of their last line.
fn write_scalar(out: &mut String, value: &Value, content_indent: usize, options: &RenderOptions) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            if options.multiline_block_style && can_use_literal_block(s) {
                write_literal_block(out, s, content_indent);
            } else {
                out.push_str(&render_string(s, options));
            }
        }
        Value::Object(_) => out.push_str("{}"),
        Value::Array(_) => out.push_str("[]"),
    }
}

fn render_string(s: &str, options: &RenderOptions) -> String {
    let needs_escaping = s.contains('\n') || (!options.allow_unicode && !s.is_ascii());
    if needs_escaping {
        return double_quoted(s, options.allow_unicode);
    }
    match serde_yaml::to_string(s) {
        Ok(rendered) => rendered.trim_end_matches('\n').to_string(),
        Err(_) => double_quoted(s, options.allow_unicode),
    }
}

fn double_quoted(s: &str, allow_unicode: bool) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                quoted.push_str(&format!("\\x{:02X}", c as u32));
            }
            c if !c.is_ascii() && !allow_unicode => {
                if (c as u32) <= 0xFFFF {
                    quoted.push_str(&format!("\\u{:04X}", c as u32));
                } else {
                    quoted.push_str(&format!("\\U{:08X}", c as u32));
                }
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn can_use_literal_block(s: &str) -> bool {
    let body = s.trim_end_matches('\n');
    s.contains('\n')
        && !body.is_empty()
        && !s.contains('\r')
        && !s.chars().any(|c| c.is_control() && c != '\n' && c != '\t')
        && !body.split('\n').any(|line| line.ends_with(' ') || line.ends_with('\t'))
}

fn write_literal_block(out: &mut String, s: &str, content_indent: usize) {
    let body = s.trim_end_matches('\n');
    let trailing_newlines = s.len() - body.len();

    out.push('|');
    if body.starts_with(' ') {
        out.push_str(&INDENT.to_string());
    }
    match trailing_newlines {
        0 => out.push('-'),
        1 => {}
        _ => out.push('+'),
    }

    for line in body.split('\n') {
        out.push('\n');
        if !line.is_empty() {
            pad(out, content_indent);
            out.push_str(line);
        }
    }
    for _ in 1..trailing_newlines {
        out.push('\n');
    }
}
