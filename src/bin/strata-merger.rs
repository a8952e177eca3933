//! `strata-merger`: publish one merged config per leaf directory.

use anyhow::Result;
use clap::Parser;
use strata::cli::merger::MergerCli;
use strata::logging::init_logging;
use strata::merger::ConfigMerger;
use strata::processor::ConfigProcessor;
use tracing::info;

fn main() -> Result<()> {
    let cli = MergerCli::parse();
    init_logging(cli.verbose, &cli.log)?;

    let processor = ConfigProcessor::with_default_backends();
    let written = ConfigMerger::new(&processor, cli.merger_options()).run()?;
    info!(count = written.len(), "Merge complete");
    Ok(())
}
