//! Batch merging: one published document per leaf directory.
//!
//! Leaf directories are found by name prefix (`cluster=` and the like). Each
//! leaf is processed like a normal target, then written to
//! `<output_dir>/<level1>/.../<levelN-1>/<levelN>.yaml`, where the level
//! values are read from the merged document itself.

mod filter_rules;

pub use filter_rules::FilterRules;

use crate::config::{OutputOptions, ProcessOptions};
use crate::document::{Document, scalar_to_string};
use crate::error::{StrataError, StrataResult};
use crate::format::OutputFormat;
use crate::processor::{ConfigProcessor, render_document, write_output};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Batch run configuration.
#[derive(Debug, Clone)]
pub struct MergerOptions {
    /// Directory searched for leaf directories.
    pub path: PathBuf,
    pub output_dir: PathBuf,
    /// Keys whose values name the publish location, outermost first.
    pub levels: Vec<String>,
    /// Directory name prefixes marking a leaf.
    pub leaf_directories: Vec<String>,
    pub enable_parallel: bool,
    /// Top-level key holding [`FilterRules`].
    pub filter_rules_key: Option<String>,
    /// Hierarchy and `!include` root. Defaults to the process working directory.
    pub cwd: Option<PathBuf>,
}

impl MergerOptions {
    pub fn new(
        path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        levels: Vec<String>,
        leaf_directories: Vec<String>,
    ) -> Self {
        Self {
            path: path.into(),
            output_dir: output_dir.into(),
            levels,
            leaf_directories,
            enable_parallel: false,
            filter_rules_key: None,
            cwd: None,
        }
    }

    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.enable_parallel = enabled;
        self
    }

    pub fn with_filter_rules_key(mut self, key: impl Into<String>) -> Self {
        self.filter_rules_key = Some(key.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Every non-hidden directory below `root` whose name starts with one of
/// `prefixes`, sorted.
pub fn find_leaf_directories(root: &Path, prefixes: &[String]) -> StrataResult<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(StrataError::path_not_found(root));
    }

    let mut leaves: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
        })
        .map(|e| e.into_path())
        .collect();

    if leaves.is_empty() {
        return Err(StrataError::no_leaf_directories(root, prefixes));
    }
    leaves.sort();
    Ok(leaves)
}

/// Runs a batch merge with a shared processor.
pub struct ConfigMerger<'a> {
    processor: &'a ConfigProcessor,
    options: MergerOptions,
}

impl<'a> ConfigMerger<'a> {
    pub fn new(processor: &'a ConfigProcessor, options: MergerOptions) -> Self {
        Self { processor, options }
    }

    /// Merge and publish every leaf. Returns the written files in leaf order.
    pub fn run(&self) -> StrataResult<Vec<PathBuf>> {
        if self.options.levels.is_empty() {
            return Err(StrataError::invalid_document("merger", "at least one level is required"));
        }

        let leaves = find_leaf_directories(&self.options.path, &self.options.leaf_directories)?;
        debug!(count = leaves.len(), "Found leaf directories");

        if self.options.enable_parallel {
            info!("Processing config in parallel");
            leaves.par_iter().map(|leaf| self.merge_leaf(leaf)).collect()
        } else {
            leaves.iter().map(|leaf| self.merge_leaf(leaf)).collect()
        }
    }

    fn process_options(&self, leaf: &Path) -> StrataResult<ProcessOptions> {
        let cwd = match &self.options.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().map_err(|e| StrataError::io(Path::new("."), e))?,
        };
        Ok(ProcessOptions::new(leaf)
            .with_cwd(cwd)
            .with_yaml_includes(true)
            .with_output(OutputOptions {
                format: OutputFormat::Yaml,
                multiline_block_style: true,
                allow_unicode: true,
            }))
    }

    /// Process one leaf and write its published file.
    pub fn merge_leaf(&self, leaf: &Path) -> StrataResult<PathBuf> {
        let options = self.process_options(leaf)?;
        let mut document = self.processor.process(&options)?;

        let values = self
            .options
            .levels
            .iter()
            .map(|level| level_value(&document, level, leaf))
            .collect::<StrataResult<Vec<_>>>()?;
        let file = publish_path(&self.options.output_dir, &values);

        if let Some(key) = &self.options.filter_rules_key {
            let rules = document.get(key).ok_or_else(|| {
                StrataError::invalid_document(
                    &leaf.display().to_string(),
                    format!("Filter rule key '{}' not found in config", key),
                )
            })?;
            let rules = FilterRules::from_value(rules, &self.options.levels)?;
            rules.apply(&mut document);
        }

        info!(leaf = %leaf.display(), "Found input config directory");
        info!(path = %file.display(), "Storing generated config");
        write_output(&file, &render_document(&document, &options.output)?)?;
        Ok(file)
    }
}

fn level_value(document: &Document, level: &str, leaf: &Path) -> StrataResult<String> {
    document
        .get(level)
        .and_then(scalar_to_string)
        .ok_or_else(|| {
            StrataError::invalid_document(
                &leaf.display().to_string(),
                format!("level '{}' is missing or not a scalar", level),
            )
            .with_key(level)
        })
}

/// `<output_dir>/<v1>/.../<vN-1>/<vN>.yaml`
pub fn publish_path(output_dir: &Path, values: &[String]) -> PathBuf {
    let mut path = output_dir.to_path_buf();
    if let Some((last, parents)) = values.split_last() {
        path.extend(parents);
        path.push(format!("{}.yaml", last));
    }
    path
}
