//! `strata`: merge a config hierarchy and print or write the result.

use anyhow::Result;
use clap::Parser;
use strata::cli::Cli;
use strata::logging::init_logging;
use strata::processor::{ConfigProcessor, render_document, write_output};
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, &cli.log)?;

    let options = cli.process_options();
    debug!(path = %options.path.display(), format = options.output.format.as_str(), "Processing");

    let processor = ConfigProcessor::with_default_backends();
    let document = processor.process(&options)?;
    let rendered = render_document(&document, &options.output)?;

    if let Some(path) = &cli.output_file {
        write_output(path, &rendered)?;
    }
    if cli.should_print() {
        print!("{}", rendered);
    }
    Ok(())
}
