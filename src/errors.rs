use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while building or loading the taxonomy tree. All of them are fatal:
/// a corrupt taxonomy cannot be partially loaded.
#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: malformed record ({detail})")]
    Malformed { line: usize, detail: String },

    #[error("line {line}: cannot parse {field} from {value:?}")]
    Numeric {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("taxonomy has no root node (taxid {0})")]
    MissingRoot(u64),

    #[error("invalid taxonomy file format")]
    BadMagic,

    #[error("taxonomy serialization failed: {0}")]
    Serialization(String),
}

/// Failures of the identifier -> taxid index, both at build time and at lookup time.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("GI too high: {0}")]
    OutOfRange(u64),

    #[error("no taxid recorded for GI {0}")]
    Absent(u64),

    #[error("I/O error on identifier index: {0}")]
    Io(#[from] io::Error),

    #[error("{}:{line}: malformed identifier/taxid pair {content:?}", path.display())]
    MalformedPair {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("{}:{line}: GI {gi} is above the limit of {limit}", path.display())]
    GiAboveLimit {
        path: PathBuf,
        line: usize,
        gi: u64,
        limit: u64,
    },

    #[error("taxid {0} does not fit in a 24-bit record")]
    TaxidTooLarge(u64),

    #[error("identifier index lock poisoned")]
    Poisoned,
}

impl IndexError {
    /// True when the identifier simply has no mapping (as opposed to an I/O fault).
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::OutOfRange(_) | IndexError::Absent(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LcaError {
    #[error("none of the supplied taxids is present in the taxonomy")]
    EmptySet,
}

/// Per-line problems in the alignment stream; these are recovered locally.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("line is not tab separated")]
    NoTab,

    #[error("line has a blank query field")]
    BlankQuery,

    #[error("expected at least {expected} columns, found {found}")]
    MissingColumn { expected: usize, found: usize },

    #[error("no gi| found in: {0}")]
    NoGi(String),

    #[error("cannot parse GI from {0:?}")]
    BadGi(String),

    #[error("error parsing bit score {0:?}")]
    BadBitScore(String),
}
