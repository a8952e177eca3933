//! CLI definitions for the `strata` and `strata-merger` binaries.
//!
//! Both parse into the library's option types; the binaries only wire
//! logging, the processor and the output together.

pub mod merger;

use crate::config::{Enclosure, OutputOptions, ProcessOptions};
use crate::format::OutputFormat;
use crate::merge::{ListStrategy, MergeStrategies};
use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;

/// List merge strategy selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ListStrategyArg {
    /// Concatenate base and incoming (default)
    #[default]
    Append,
    /// Incoming list replaces base
    Override,
    /// Incoming items first
    Prepend,
    /// Append, skipping items already present
    AppendUnique,
    /// Merge maps sharing an `id`; `remove: true` drops the item
    MergeById,
}

impl ListStrategyArg {
    pub fn name(&self) -> &'static str {
        match self {
            ListStrategyArg::Append => "append",
            ListStrategyArg::Override => "override",
            ListStrategyArg::Prepend => "prepend",
            ListStrategyArg::AppendUnique => "append_unique",
            ListStrategyArg::MergeById => "merge_by_id",
        }
    }

    pub fn to_strategy(self) -> ListStrategy {
        ListStrategy::from_name(self.name()).unwrap_or(ListStrategy::Append)
    }
}

/// Output format selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FormatArg {
    #[default]
    Yaml,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Yaml => OutputFormat::Yaml,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

/// Merge a hierarchy of YAML fragments and resolve its interpolations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("enclosure").args(["enclosing_key", "remove_enclosing_key"])))]
pub struct Cli {
    /// The configs directory or file
    pub path: PathBuf,

    /// Write the result to this file
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Print the result even when writing it to a file
    #[arg(long)]
    pub print_data: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = FormatArg::Yaml)]
    pub format: FormatArg,

    /// Keep only these top-level keys (repeatable)
    #[arg(long = "filter")]
    pub filters: Vec<String>,

    /// Drop these top-level keys before resolving (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Wrap the result under this key
    #[arg(long)]
    pub enclosing_key: Option<String>,

    /// Unwrap the result from under this key
    #[arg(long)]
    pub remove_enclosing_key: Option<String>,

    /// Do not fail on unresolved interpolations
    #[arg(long)]
    pub skip_interpolation_validation: bool,

    /// Do not resolve secrets
    #[arg(long)]
    pub skip_secrets: bool,

    /// Do not resolve interpolations at all
    #[arg(long = "skip-interpolation-resolving")]
    pub skip_interpolations: bool,

    /// Hierarchy root (default: current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Render multi-line strings as literal blocks
    #[arg(long)]
    pub multi_line_string: bool,

    /// Escape every non-ASCII character
    #[arg(long)]
    pub ascii_only: bool,

    /// Strategy for merging lists
    #[arg(long, value_enum, default_value_t = ListStrategyArg::Append)]
    pub list_merge_strategy: ListStrategyArg,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2")]
    pub log: String,
}

impl Cli {
    pub fn enclosure(&self) -> Option<Enclosure> {
        match (&self.enclosing_key, &self.remove_enclosing_key) {
            (Some(key), _) => Some(Enclosure::Add(key.clone())),
            (None, Some(key)) => Some(Enclosure::Remove(key.clone())),
            (None, None) => None,
        }
    }

    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            format: self.format.into(),
            multiline_block_style: self.multi_line_string,
            allow_unicode: !self.ascii_only,
        }
    }

    pub fn process_options(&self) -> ProcessOptions {
        let strategies =
            MergeStrategies::default().with_list_strategies(vec![self.list_merge_strategy.to_strategy()]);

        let mut options = ProcessOptions::new(&self.path)
            .with_filters(self.filters.iter().cloned())
            .with_exclude_keys(self.exclude.iter().cloned())
            .with_output(self.output_options())
            .with_strategies(strategies)
            .skip_interpolations(self.skip_interpolations)
            .skip_interpolation_validation(self.skip_interpolation_validation)
            .skip_secrets(self.skip_secrets);
        if let Some(cwd) = &self.cwd {
            options = options.with_cwd(cwd);
        }
        if let Some(enclosure) = self.enclosure() {
            options = options.with_enclosure(enclosure);
        }
        options
    }

    /// Print unless the result only goes to a file.
    pub fn should_print(&self) -> bool {
        self.output_file.is_none() || self.print_data
    }
}
