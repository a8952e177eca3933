//! `strata-merger` arguments.

use crate::merger::MergerOptions;
use clap::Parser;
use std::path::PathBuf;

/// Merge every leaf directory of a config tree and publish one file per leaf
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct MergerCli {
    /// The configs directory
    pub path: PathBuf,

    /// Where the generated configs are written
    #[arg(long, required = true)]
    pub output_dir: PathBuf,

    /// Hierarchy levels, for instance: env region cluster
    #[arg(long, required = true, num_args = 1..)]
    pub levels: Vec<String>,

    /// Leaf directory prefixes, for instance: cluster
    #[arg(long, required = true, num_args = 1..)]
    pub leaf_directories: Vec<String>,

    /// Process leaf directories in parallel
    #[arg(long)]
    pub enable_parallel: bool,

    /// Prune each result with the filter rules stored under this key
    #[arg(long)]
    pub filter_rules_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(long, default_value = "2")]
    pub log: String,
}

impl MergerCli {
    pub fn merger_options(&self) -> MergerOptions {
        let mut options = MergerOptions::new(
            &self.path,
            &self.output_dir,
            self.levels.clone(),
            self.leaf_directories.clone(),
        )
        .with_parallel(self.enable_parallel);
        if let Some(key) = &self.filter_rules_key {
            options = options.with_filter_rules_key(key);
        }
        options
    }
}
