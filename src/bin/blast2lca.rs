use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use blast2lca::classify::{classify_stream, parse_levels, ClassifyOptions, DEFAULT_QUEUE_SIZE};
use blast2lca::gi_taxid::{self, ResolverMode};
use blast2lca::gz_stream::open_input;
use blast2lca::lca::LcaEngine;
use blast2lca::logging::init_logger;
use blast2lca::ncbi_taxonomy::NCBITaxonomy;
use blast2lca::reports::report_stats;
use blast2lca::taxonomy::Taxonomy;

/// Computes the lowest common ancestor of the significant hits of every query
/// in a BLAST tabular (-m8) file.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Options {
    /// BLAST tabular file, sorted by query (plain or gzipped, `-` for stdin)
    #[clap(value_parser)]
    blast_file: PathBuf,

    /// nodes.dmp file of the NCBI taxonomy
    #[clap(long, default_value = "nodes.dmp", value_parser)]
    nodes: PathBuf,

    /// names.dmp file of the NCBI taxonomy
    #[clap(long, default_value = "names.dmp", value_parser)]
    names: PathBuf,

    /// Binary taxonomy written by tax2bin; used instead of --nodes/--names
    #[clap(short, long, value_parser)]
    taxonomy: Option<PathBuf>,

    /// Binary GI to taxid index written by gitaxid2bin
    #[clap(short, long, value_parser)]
    dict: PathBuf,

    /// Taxonomic ranks to report, colon separated (e.g. phylum:genus:species)
    #[clap(short, long, default_value = "", value_parser)]
    levels: String,

    /// Fraction of the best bit score a hit needs to be considered
    #[clap(long, default_value_t = 0.9, value_parser)]
    bsfactor: f64,

    /// Number of worker threads [default: number of CPUs]
    #[clap(short = 'p', long, value_parser)]
    nprocs: Option<usize>,

    /// Keep the GI index on disk instead of loading it in memory
    #[clap(long, action, conflicts_with = "mmap")]
    savemem: bool,

    /// Memory-map the GI index
    #[clap(long, action)]
    mmap: bool,

    /// Write results in the same order as the queries in the input
    #[clap(long, action)]
    ordered: bool,

    /// Number of queries buffered between parsing and classification
    #[clap(long, default_value_t = DEFAULT_QUEUE_SIZE, value_parser)]
    queue_size: usize,

    /// Output file [default: stdout]
    #[clap(short, long, value_parser)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_taxonomy(opts: &Options) -> Result<Taxonomy> {
    match &opts.taxonomy {
        Some(path) => {
            info!("Loading binary taxonomy {} ...", path.display());
            let start = Instant::now();
            let taxonomy = Taxonomy::from_file(path)
                .with_context(|| format!("Impossible to get a valid taxonomy from {}", path.display()))?;
            info!("Done ({:.3} secs)", start.elapsed().as_secs_f64());
            Ok(taxonomy)
        }
        None => NCBITaxonomy::build(&opts.nodes, &opts.names)
            .context("Impossible to get a valid taxonomy"),
    }
}

fn main() -> Result<()> {
    let opts = Options::parse();
    init_logger(opts.verbose);

    if !(0.0..=1.0).contains(&opts.bsfactor) {
        bail!("--bsfactor must be between 0 and 1, got {}", opts.bsfactor);
    }

    let engine = LcaEngine::new(load_taxonomy(&opts)?);

    let mode = if opts.savemem {
        ResolverMode::Disk
    } else if opts.mmap {
        ResolverMode::Mmap
    } else {
        ResolverMode::InMemory
    };
    let index = gi_taxid::load(&opts.dict, mode)
        .with_context(|| format!("Problem reading dict file {}", opts.dict.display()))?;

    let reader = open_input(&opts.blast_file)
        .with_context(|| format!("Unable to open file {}", opts.blast_file.display()))?;

    let classify_opts = ClassifyOptions {
        bs_factor: opts.bsfactor,
        num_threads: opts.nprocs.unwrap_or_else(num_cpus::get),
        queue_size: opts.queue_size,
        ordered: opts.ordered,
        levels: parse_levels(&opts.levels),
    };

    let mut writer: Box<dyn Write + Send> = match &opts.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Unable to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let start = Instant::now();
    let stats = classify_stream(reader, &engine, index.as_ref(), &classify_opts, &mut writer)?;
    report_stats(start.elapsed().as_secs_f64(), &stats);

    Ok(())
}
