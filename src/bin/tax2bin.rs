use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Instant;

use blast2lca::logging::init_logger;
use blast2lca::ncbi_taxonomy::NCBITaxonomy;

/// Converts the NCBI nodes.dmp/names.dmp dumps into the binary taxonomy file
/// read by blast2lca --taxonomy.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Options {
    /// nodes.dmp file of the NCBI taxonomy
    #[clap(long, default_value = "nodes.dmp", value_parser)]
    nodes: PathBuf,

    /// names.dmp file of the NCBI taxonomy
    #[clap(long, default_value = "names.dmp", value_parser)]
    names: PathBuf,

    /// Output binary taxonomy file
    #[clap(short, long, default_value = "taxonomy.bin", value_parser)]
    output: PathBuf,

    /// Increase log verbosity (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Options::parse();
    init_logger(opts.verbose.max(1));

    let taxonomy = NCBITaxonomy::build(&opts.nodes, &opts.names)
        .context("Impossible to get a valid taxonomy")?;

    info!("Storing taxonomy to {} ...", opts.output.display());
    let start = Instant::now();
    taxonomy
        .write_to_disk(&opts.output)
        .with_context(|| format!("Unable to write {}", opts.output.display()))?;
    info!(
        "{} nodes stored ({:.3} secs)",
        taxonomy.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
