//! Query dispatch: one producer parses the alignment stream into per-query
//! results, a pool of workers resolves and classifies them, and a collector
//! writes the output lines.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{BufRead, Write};
use std::ops::AddAssign;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use log::{debug, info, warn};

use crate::blastm8::{QueryResult, QueryStream, DEFAULT_BS_FACTOR};
use crate::errors::LcaError;
use crate::gi_taxid::GiTaxidIndex;
use crate::lca::LcaEngine;
use crate::reports::{format_lca_line, format_unknown_line};
use crate::taxonomy::TaxId;

pub const DEFAULT_QUEUE_SIZE: usize = 200;

#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    /// Fraction of the best bit score a hit needs to take part in the LCA.
    pub bs_factor: f64,
    pub num_threads: usize,
    /// Capacity of the queues between producer, workers and collector.
    pub queue_size: usize,
    /// Write results in input order instead of completion order.
    pub ordered: bool,
    /// Ranks reported in the last output column, in order.
    pub levels: Vec<String>,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            bs_factor: DEFAULT_BS_FACTOR,
            num_threads: num_cpus::get(),
            queue_size: DEFAULT_QUEUE_SIZE,
            ordered: false,
            levels: Vec::new(),
        }
    }
}

/// Splits a colon separated rank list (`family:genus:species`).
pub fn parse_levels(levels: &str) -> Vec<String> {
    levels
        .split(':')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationStats {
    pub total_queries: u64,
    pub total_classified: u64,
    /// Significant hits considered for an LCA.
    pub total_hits: u64,
    pub unresolved_hits: u64,
    pub dropped_lines: u64,
}

impl ClassificationStats {
    pub fn total_unknown(&self) -> u64 {
        self.total_queries - self.total_classified
    }
}

impl AddAssign for ClassificationStats {
    fn add_assign(&mut self, other: Self) {
        self.total_queries += other.total_queries;
        self.total_classified += other.total_classified;
        self.total_hits += other.total_hits;
        self.unresolved_hits += other.unresolved_hits;
        self.dropped_lines += other.dropped_lines;
    }
}

/// Resolves the hits of one query and formats its output line.
pub struct Classifier<'a> {
    engine: &'a LcaEngine,
    index: &'a dyn GiTaxidIndex,
    levels: &'a [String],
}

impl<'a> Classifier<'a> {
    pub fn new(engine: &'a LcaEngine, index: &'a dyn GiTaxidIndex, levels: &'a [String]) -> Self {
        Self {
            engine,
            index,
            levels,
        }
    }

    /// Taxids of the hits that resolve; failures are logged and counted.
    pub fn resolve_hits(&self, result: &QueryResult, stats: &mut ClassificationStats) -> Vec<TaxId> {
        let mut taxids = Vec::with_capacity(result.hits.len());
        for hit in &result.hits {
            match self.index.resolve(hit.gi) {
                Ok(taxid) => taxids.push(taxid),
                Err(e) => {
                    warn!(
                        "Taxid can't be retrieved for GI {} ({}) -- ignoring this hit of {}",
                        hit.gi, e, result.query
                    );
                    stats.unresolved_hits += 1;
                }
            }
        }
        taxids
    }

    pub fn classify(&self, result: &QueryResult, stats: &mut ClassificationStats) -> String {
        stats.total_queries += 1;
        stats.total_hits += result.hits.len() as u64;
        stats.dropped_lines += result.bad_lines as u64;

        let taxids = self.resolve_hits(result, stats);
        match self.engine.query(&taxids) {
            Ok(node) => {
                stats.total_classified += 1;
                let levels = if self.levels.is_empty() {
                    Vec::new()
                } else {
                    self.engine.at_levels(node, self.levels)
                };
                format_lca_line(&result.query, node, &levels)
            }
            Err(LcaError::EmptySet) => {
                debug!("{}: no hit maps into the taxonomy", result.query);
                format_unknown_line(&result.query, self.levels.len())
            }
        }
    }
}

/// One formatted result with the input position of its query. Ordered so that
/// a `BinaryHeap` pops the lowest position first.
#[derive(Debug, Default)]
struct OutputLine {
    seq: u64,
    text: String,
}

impl Ord for OutputLine {
    fn cmp(&self, other: &Self) -> Ordering {
        other.seq.cmp(&self.seq)
    }
}

impl PartialOrd for OutputLine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OutputLine {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for OutputLine {}

/// Holds back out-of-order lines until every earlier one has been written.
#[derive(Debug, Default)]
struct Sequencer {
    pending: BinaryHeap<OutputLine>,
    next_seq: u64,
}

impl Sequencer {
    fn push<W: Write>(&mut self, line: OutputLine, writer: &mut W) -> std::io::Result<()> {
        self.pending.push(line);
        while self.pending.peek().is_some_and(|l| l.seq == self.next_seq) {
            if let Some(line) = self.pending.pop() {
                writer.write_all(line.text.as_bytes())?;
                self.next_seq += 1;
            }
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn collect_output<W: Write>(
    out_rx: Receiver<OutputLine>,
    ordered: bool,
    writer: &mut W,
) -> Result<u64> {
    let mut written = 0u64;
    let mut sequencer = Sequencer::default();
    for line in out_rx.iter() {
        if ordered {
            sequencer.push(line, writer)?;
        } else {
            writer.write_all(line.text.as_bytes())?;
        }
        written += 1;
    }
    if !sequencer.is_empty() {
        return Err(anyhow!("output sequencing left results unwritten"));
    }
    writer.flush()?;
    Ok(written)
}

/// Classifies every query of an alignment stream and writes one line per query
/// to `writer`. Returns the aggregated run statistics.
pub fn classify_stream<R, W>(
    reader: R,
    engine: &LcaEngine,
    index: &dyn GiTaxidIndex,
    opts: &ClassifyOptions,
    writer: &mut W,
) -> Result<ClassificationStats>
where
    R: BufRead + Send,
    W: Write + Send,
{
    let num_workers = opts.num_threads.max(1);
    let queue_size = opts.queue_size.max(1);
    let start_time = Instant::now();

    // producer + workers + collector
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers + 2)
        .thread_name(|i| format!("blast2lca-{}", i))
        .build()
        .context("unable to build worker pool")?;

    let (query_tx, query_rx) = bounded::<QueryResult>(queue_size);
    let (out_tx, out_rx) = bounded::<OutputLine>(queue_size);
    let totals = Mutex::new(ClassificationStats::default());
    let producer_error = Mutex::new(None);

    let written = pool.scope(|s| -> Result<u64> {
        s.spawn(|_| {
            let mut stream = QueryStream::new(reader, opts.bs_factor);
            for result in stream.by_ref() {
                match result {
                    Ok(result) => {
                        if query_tx.send(result).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        *producer_error
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(e);
                        break;
                    }
                }
            }
            totals
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .dropped_lines += stream.dropped_lines() as u64;
            drop(query_tx);
        });

        for _ in 0..num_workers {
            let query_rx = query_rx.clone();
            let out_tx = out_tx.clone();
            let totals = &totals;
            s.spawn(move |_| {
                let classifier = Classifier::new(engine, index, &opts.levels);
                let mut local = ClassificationStats::default();
                for result in query_rx.iter() {
                    let text = classifier.classify(&result, &mut local);
                    if out_tx.send(OutputLine { seq: result.seq, text }).is_err() {
                        break;
                    }
                }
                *totals.lock().unwrap_or_else(PoisonError::into_inner) += local;
            });
        }
        drop(query_rx);
        drop(out_tx);

        // out_rx is dropped on return, so a failed write shuts the workers down
        collect_output(out_rx, opts.ordered, writer)
    })?;

    if let Some(e) = producer_error
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
    {
        return Err(anyhow::Error::from(e).context("error reading alignment input"));
    }

    let stats = totals.into_inner().unwrap_or_else(PoisonError::into_inner);
    info!(
        "{} result lines written ({:.3} secs)",
        written,
        start_time.elapsed().as_secs_f64()
    );
    Ok(stats)
}
