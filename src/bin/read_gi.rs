use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use blast2lca::gi_taxid::{self, ResolverMode};
use blast2lca::logging::init_logger;

/// Prints the taxid recorded for a GI in a binary index written by gitaxid2bin.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Options {
    /// Binary GI to taxid index
    #[clap(short, long, default_value = "gi_taxid.bin", value_parser)]
    dict: PathBuf,

    /// GI to look for
    #[clap(short, long, value_parser)]
    gi: u64,

    /// Increase log verbosity (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Options::parse();
    init_logger(opts.verbose);

    let index = gi_taxid::load(&opts.dict, ResolverMode::Disk)
        .with_context(|| format!("Problem reading dict file {}", opts.dict.display()))?;
    let taxid = index
        .resolve(opts.gi)
        .context("Problem retrieving taxid from dict")?;
    println!("{}", taxid);
    Ok(())
}
