//! Strata: hierarchical YAML configuration merging.
//!
//! Fragments found along a directory path (`env=dev/region=eu/cluster=a`)
//! are deep-merged from least to most specific, then `{{...}}` references to
//! the document itself, environment variables and secret backends are
//! resolved in a fixed pass order.

pub mod cli;
pub mod config;
pub mod document;
pub mod dynamic;
pub mod error;
pub mod format;
pub mod fragment;
pub mod hierarchy;
pub mod interpolation;
pub mod logging;
pub mod merge;
pub mod merger;
pub mod processor;
pub mod secrets;
pub mod shaping;

pub use config::{Enclosure, EnvProvider, OutputOptions, ProcessEnv, ProcessOptions};
pub use document::Document;
pub use error::{ErrorCode, StrataError, StrataResult};
pub use format::OutputFormat;
pub use merge::{ListStrategy, MergeStrategies};
pub use processor::ConfigProcessor;
