//! Reader for BLAST tabular (`-m 8` / `-outfmt 6`) output.
//!
//! Lines for one query must be contiguous. [`BlockReader`] cuts the stream into
//! per-query blocks of raw lines; [`QueryResult::from_block`] parses a block into
//! hits and keeps only the significant ones. [`QueryStream`] chains both.

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use std::fmt;
use std::io::{self, BufRead};

use crate::errors::ParseError;

/// Default fraction of the best bit score a hit needs to be kept.
pub const DEFAULT_BS_FACTOR: f64 = 0.9;

const SUBJECT_COL: usize = 1;
const QSTART_COL: usize = 6;
const BITSCORE_COL: usize = 11;
const MIN_COLUMNS: usize = BITSCORE_COL + 1;

lazy_static! {
    static ref GI_RE: Regex = Regex::new(r"gi\|([0-9]+)\|").unwrap();
}

/// Query and subject alignment coordinates, each normalised to `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitCoords {
    pub query_start: u64,
    pub query_end: u64,
    pub subject_start: u64,
    pub subject_end: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub gi: u64,
    pub bit_score: f64,
    pub coords: Option<HitCoords>,
}

impl fmt::Display for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GI:{}\t{:.2}", self.gi, self.bit_score)
    }
}

/// Raw lines of one query, numbered in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlastBlock {
    pub seq: u64,
    pub query: String,
    pub lines: Vec<String>,
}

/// Significant hits of one query, sorted by descending bit score.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub seq: u64,
    pub query: String,
    pub hits: Vec<Hit>,
    pub best_score: f64,
    /// Lines of the block that could not be parsed into a hit.
    pub bad_lines: usize,
}

/// First tab-separated field of an alignment line.
pub fn extract_query(line: &str) -> Result<&str, ParseError> {
    match line.find('\t') {
        None => Err(ParseError::NoTab),
        Some(0) => Err(ParseError::BlankQuery),
        Some(pos) => Ok(&line[..pos]),
    }
}

/// GI embedded in a `gi|<digits>|` token of a subject header.
pub fn extract_gi(header: &str) -> Result<u64, ParseError> {
    let caps = GI_RE
        .captures(header)
        .ok_or_else(|| ParseError::NoGi(header.to_string()))?;
    caps[1]
        .parse()
        .map_err(|_| ParseError::BadGi(caps[1].to_string()))
}

fn parse_coords(fields: &[&str]) -> Option<HitCoords> {
    let mut values = [0u64; 4];
    for (value, field) in values.iter_mut().zip(&fields[QSTART_COL..QSTART_COL + 4]) {
        *value = field.trim().parse().ok()?;
    }
    let [qs, qe, ss, se] = values;
    Some(HitCoords {
        query_start: qs.min(qe),
        query_end: qs.max(qe),
        subject_start: ss.min(se),
        subject_end: ss.max(se),
    })
}

/// Parses one alignment line. Coordinates are optional: when they do not parse
/// the hit is still returned without them.
pub fn parse_hit(line: &str) -> Result<Hit, ParseError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < MIN_COLUMNS {
        return Err(ParseError::MissingColumn {
            expected: MIN_COLUMNS,
            found: fields.len(),
        });
    }

    let raw_score = fields[BITSCORE_COL].trim();
    let bit_score: f64 = raw_score
        .parse()
        .ok()
        .filter(|s: &f64| s.is_finite())
        .ok_or_else(|| ParseError::BadBitScore(raw_score.to_string()))?;
    let gi = extract_gi(fields[SUBJECT_COL])?;

    Ok(Hit {
        gi,
        bit_score,
        coords: parse_coords(&fields),
    })
}

/// Sorts `hits` by descending bit score and drops the ones below
/// `best * factor`. Returns the best score (0 for no hits).
pub fn filter_significant(hits: &mut Vec<Hit>, factor: f64) -> f64 {
    hits.sort_by(|a, b| b.bit_score.total_cmp(&a.bit_score));
    let best = hits.first().map_or(0.0, |h| h.bit_score);
    let limit = best * factor;
    let keep = hits.partition_point(|h| h.bit_score >= limit);
    hits.truncate(keep);
    best
}

impl QueryResult {
    pub fn from_block(block: BlastBlock, factor: f64) -> Self {
        let mut hits = Vec::with_capacity(block.lines.len());
        let mut bad_lines = 0;
        for line in &block.lines {
            match parse_hit(line) {
                Ok(hit) => hits.push(hit),
                Err(e) => {
                    warn!("Ignoring blast line ({}): {}", e, line);
                    bad_lines += 1;
                }
            }
        }
        let best_score = filter_significant(&mut hits, factor);
        QueryResult {
            seq: block.seq,
            query: block.query,
            hits,
            best_score,
            bad_lines,
        }
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.query)?;
        writeln!(f, "HITS:")?;
        for hit in &self.hits {
            writeln!(f, "\t{}", hit)?;
        }
        Ok(())
    }
}

/// Splits a stream of alignment lines into per-query blocks.
pub struct BlockReader<R: BufRead> {
    reader: R,
    line_buf: Vec<u8>,
    current: Option<BlastBlock>,
    next_seq: u64,
    dropped_lines: usize,
    done: bool,
}

impl<R: BufRead> BlockReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: Vec::with_capacity(512),
            current: None,
            next_seq: 0,
            dropped_lines: 0,
            done: false,
        }
    }

    /// Lines dropped because no query field could be found.
    pub fn dropped_lines(&self) -> usize {
        self.dropped_lines
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.line_buf.clear();
        if self.reader.read_until(b'\n', &mut self.line_buf)? == 0 {
            return Ok(None);
        }
        while matches!(self.line_buf.last(), Some(b'\n' | b'\r')) {
            self.line_buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.line_buf).into_owned()))
    }

    fn start_block(&mut self, query: String, line: String) -> Option<BlastBlock> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.current.replace(BlastBlock {
            seq,
            query,
            lines: vec![line],
        })
    }

    /// Next complete block, or `None` at end of input.
    pub fn next_block(&mut self) -> io::Result<Option<BlastBlock>> {
        if self.done {
            return Ok(None);
        }
        while let Some(line) = self.read_line()? {
            if line.is_empty() {
                continue;
            }
            let query = match extract_query(&line) {
                Ok(q) => q,
                Err(e) => {
                    warn!("Can't extract the query field ({}): {}", e, line);
                    self.dropped_lines += 1;
                    continue;
                }
            };
            if let Some(block) = self.current.as_mut().filter(|b| b.query == query) {
                block.lines.push(line);
                continue;
            }
            let query = query.to_string();
            if let Some(finished) = self.start_block(query, line) {
                return Ok(Some(finished));
            }
        }
        self.done = true;
        Ok(self.current.take())
    }
}

impl<R: BufRead> Iterator for BlockReader<R> {
    type Item = io::Result<BlastBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

/// Per-query results of an alignment stream, in input order.
pub struct QueryStream<R: BufRead> {
    blocks: BlockReader<R>,
    factor: f64,
}

impl<R: BufRead> QueryStream<R> {
    pub fn new(reader: R, factor: f64) -> Self {
        Self {
            blocks: BlockReader::new(reader),
            factor,
        }
    }

    pub fn dropped_lines(&self) -> usize {
        self.blocks.dropped_lines()
    }
}

impl<R: BufRead> Iterator for QueryStream<R> {
    type Item = io::Result<QueryResult>;

    fn next(&mut self) -> Option<Self::Item> {
        let factor = self.factor;
        self.blocks
            .next()
            .map(|block| block.map(|b| QueryResult::from_block(b, factor)))
    }
}
