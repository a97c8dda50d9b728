use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use blast2lca::gi_taxid;
use blast2lca::logging::init_logger;

/// Converts gi_taxid_[nucl|prot].dmp mapping files to the binary index used by
/// blast2lca --dict.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Options {
    /// GI<TAB>taxid mapping files, sorted by GI (plain or gzipped)
    #[clap(required = true, value_parser)]
    inputs: Vec<PathBuf>,

    /// Output binary index
    #[clap(short, long, default_value = "gi_taxid.bin", value_parser)]
    outbin: PathBuf,

    /// Largest GI accepted; a record above it aborts the build
    #[clap(long, default_value_t = gi_taxid::DEFAULT_MAX_GI, value_parser)]
    max_gi: u64,

    /// Increase log verbosity (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Options::parse();
    init_logger(opts.verbose.max(1));

    let index = gi_taxid::build_with_limit(opts.inputs.as_slice(), opts.max_gi)
        .context("Encoding dictionary failed")?;
    index
        .store(&opts.outbin)
        .with_context(|| format!("Unable to store {}", opts.outbin.display()))?;
    Ok(())
}
