//! Run configuration: what to merge, how to resolve it and how to render it.

use crate::error::{StrataError, StrataResult};
use crate::format::{OutputFormat, RenderOptions};
use crate::merge::MergeStrategies;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::path::{Path, PathBuf};

/// Source of environment variables.
pub trait EnvProvider: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvProvider for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<S> EnvProvider for HashMap<String, String, S>
where
    S: BuildHasher + Send + Sync,
{
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Wrap the result under a key, or unwrap it from one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enclosure {
    Add(String),
    Remove(String),
}

/// Output stage configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputOptions {
    #[serde(default)]
    pub format: OutputFormat,

    /// Literal block style for multi-line strings (default: false).
    #[serde(default)]
    pub multiline_block_style: bool,

    /// Pass non-ASCII characters through unescaped (default: true).
    #[serde(default = "default_allow_unicode")]
    pub allow_unicode: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            multiline_block_style: false,
            allow_unicode: default_allow_unicode(),
        }
    }
}

fn default_allow_unicode() -> bool {
    true
}

impl OutputOptions {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            multiline_block_style: self.multiline_block_style,
            allow_unicode: self.allow_unicode,
        }
    }
}

/// Entry contract of [`crate::processor::ConfigProcessor::process`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Hierarchy root. Defaults to the process working directory.
    pub cwd: Option<PathBuf>,
    /// Target file or directory, relative to `cwd`.
    pub path: PathBuf,
    /// Top-level keys to keep. Empty keeps everything.
    pub filters: Vec<String>,
    /// Top-level keys to drop right after merging.
    pub exclude_keys: Vec<String>,
    pub enclosure: Option<Enclosure>,
    pub output: OutputOptions,
    pub skip_interpolations: bool,
    pub skip_interpolation_validation: bool,
    pub skip_secrets: bool,
    pub strategies: MergeStrategies,
    /// Enable the `!include` tag, resolved against `cwd`.
    pub yaml_includes: bool,
}

impl ProcessOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            cwd: None,
            path: path.into(),
            filters: Vec::new(),
            exclude_keys: Vec::new(),
            enclosure: None,
            output: OutputOptions::default(),
            skip_interpolations: false,
            skip_interpolation_validation: false,
            skip_secrets: false,
            strategies: MergeStrategies::default(),
            yaml_includes: false,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclude_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_enclosure(mut self, enclosure: Enclosure) -> Self {
        self.enclosure = Some(enclosure);
        self
    }

    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }

    pub fn with_strategies(mut self, strategies: MergeStrategies) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn skip_interpolations(mut self, skip: bool) -> Self {
        self.skip_interpolations = skip;
        self
    }

    pub fn skip_interpolation_validation(mut self, skip: bool) -> Self {
        self.skip_interpolation_validation = skip;
        self
    }

    pub fn skip_secrets(mut self, skip: bool) -> Self {
        self.skip_secrets = skip;
        self
    }

    pub fn with_yaml_includes(mut self, enabled: bool) -> Self {
        self.yaml_includes = enabled;
        self
    }

    /// Validation only makes sense when every resolution stage ran.
    pub fn should_validate(&self) -> bool {
        !(self.skip_interpolation_validation || self.skip_interpolations || self.skip_secrets)
    }

    pub fn working_directory(&self) -> StrataResult<PathBuf> {
        match &self.cwd {
            Some(cwd) => Ok(cwd.clone()),
            None => std::env::current_dir().map_err(|e| StrataError::io(Path::new("."), e)),
        }
    }

    /// The target path relative to `cwd` when it was given with `cwd` as prefix.
    pub fn relative_target(&self, cwd: &Path) -> PathBuf {
        self.path
            .strip_prefix(cwd)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.path.clone())
    }
}
