//! Directory hierarchy discovery and the hierarchical merge.
//!
//! A target such as `env=prod/region=us-east-1/cluster=a` expands to one level
//! per directory from the working directory down to the target. Each level
//! contributes its own `.yaml` files in lexicographic filename order, and the
//! levels are merged from least to most specific.

use crate::document::Document;
use crate::error::{StrataError, StrataResult};
use crate::fragment::FragmentLoader;
use crate::merge::{MergeStrategies, deep_merge};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Recognised fragment extension.
pub const YAML_EXTENSION: &str = "yaml";

/// Ordered fragment files, one entry per existing directory level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    pub root: PathBuf,
    pub target: PathBuf,
    pub levels: Vec<Vec<PathBuf>>,
}

impl Hierarchy {
    /// Compute the hierarchy for `target`, relative to `root`.
    ///
    /// A file target yields exactly the files of its containing directory.
    /// Missing intermediate directories are skipped, but the full target must
    /// exist.
    pub fn build(root: &Path, target: &Path) -> StrataResult<Self> {
        let full_target = root.join(target);
        if !full_target.exists() {
            return Err(StrataError::path_not_found(&full_target));
        }

        let mut levels = Vec::new();

        if full_target.is_file() {
            let directory = full_target.parent().unwrap_or(root);
            levels.push(yaml_files_in(directory)?);
        } else {
            levels.push(yaml_files_in(root)?);

            let mut accumulated = root.to_path_buf();
            for component in target.components() {
                let Component::Normal(part) = component else {
                    continue;
                };
                accumulated.push(part);
                if accumulated.is_dir() {
                    levels.push(yaml_files_in(&accumulated)?);
                }
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            target: target.to_path_buf(),
            levels,
        })
    }

    pub fn file_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.levels.iter().flatten()
    }

    /// Merge every fragment in order.
    ///
    /// Fails when the hierarchy as a whole contains no fragment at all.
    pub fn merge(
        &self,
        loader: &FragmentLoader,
        strategies: &MergeStrategies,
    ) -> StrataResult<Document> {
        if self.file_count() == 0 {
            return Err(StrataError::no_yaml_files(&self.root.join(&self.target)));
        }

        let mut merged = Value::Object(Default::default());
        for (depth, level) in self.levels.iter().enumerate() {
            debug!(depth, files = level.len(), "Merging hierarchy level");
            for file in level {
                let fragment = loader.load(file)?;
                merged = deep_merge(merged, fragment, strategies)
                    .map_err(|e| e.with_details(format!("while merging {}", file.display())))?;
            }
        }
        Ok(merged)
    }
}

/// The `.yaml` files directly inside `directory`, sorted by filename.
pub fn yaml_files_in(directory: &Path) -> StrataResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(directory).map_err(|e| StrataError::io(directory, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StrataError::io(directory, e))?.path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == YAML_EXTENSION);
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
