//! GI -> taxid index.
//!
//! The index is a flat array of 3-byte big-endian taxids where the record for
//! GI `n` lives at byte offset `n * 3`. A zero record means the GI has no taxid.
//! The same bytes are used in memory, on disk and memory-mapped.

use byteorder::{BigEndian, ByteOrder};
use log::{info, warn};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use crate::errors::IndexError;
use crate::gz_stream::{is_gzipped, open_input};
use crate::taxonomy::TaxId;

pub const RECORD_WIDTH: usize = 3;
pub const MAX_TAXID: TaxId = (1 << 24) - 1;
/// Largest GI an index accepts unless told otherwise (a 12 GiB buffer).
pub const DEFAULT_MAX_GI: u64 = u32::MAX as u64;

/// How many bytes from the end of a mapping file are read to find its last GI.
const TAIL_BYTES: u64 = 4096;

/// Resolves a GI to its taxid. Implementations are shared by all classification
/// workers.
pub trait GiTaxidIndex: Send + Sync {
    fn resolve(&self, gi: u64) -> Result<TaxId, IndexError>;

    /// Size of the backing record array in bytes.
    fn byte_len(&self) -> usize;
}

/// Selects the [`GiTaxidIndex`] implementation used when loading a binary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverMode {
    /// Whole file read into memory.
    #[default]
    InMemory,
    /// Records read on demand through a single locked file handle.
    Disk,
    /// File memory-mapped read-only.
    Mmap,
}

#[inline]
fn record_offset(gi: u64) -> Option<usize> {
    usize::try_from(gi).ok()?.checked_mul(RECORD_WIDTH)
}

#[inline]
fn decode(record: &[u8], gi: u64) -> Result<TaxId, IndexError> {
    match BigEndian::read_u24(record) {
        0 => Err(IndexError::Absent(gi)),
        taxid => Ok(TaxId::from(taxid)),
    }
}

fn resolve_in(bytes: &[u8], gi: u64) -> Result<TaxId, IndexError> {
    let record = record_offset(gi)
        .and_then(|pos| bytes.get(pos..pos.checked_add(RECORD_WIDTH)?))
        .ok_or(IndexError::OutOfRange(gi))?;
    decode(record, gi)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryIndex {
    data: Vec<u8>,
    /// GIs above this are rejected instead of growing the buffer.
    gi_limit: u64,
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        InMemoryIndex {
            data: Vec::new(),
            gi_limit: DEFAULT_MAX_GI,
        }
    }
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty index with room for every GI up to and including `max_gi`.
    pub fn with_max_gi(max_gi: u64) -> Result<Self, IndexError> {
        let mut index = Self::new();
        index.reserve_gi(max_gi)?;
        Ok(index)
    }

    /// Sets the largest GI that [`InMemoryIndex::encode`] will accept.
    pub fn with_gi_limit(mut self, gi_limit: u64) -> Self {
        self.gi_limit = gi_limit;
        self
    }

    pub fn gi_limit(&self) -> u64 {
        self.gi_limit
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        InMemoryIndex {
            data,
            ..Self::default()
        }
    }

    fn record_end(&self, gi: u64) -> Result<usize, IndexError> {
        if gi > self.gi_limit {
            return Err(IndexError::OutOfRange(gi));
        }
        record_offset(gi)
            .and_then(|pos| pos.checked_add(RECORD_WIDTH))
            .ok_or(IndexError::OutOfRange(gi))
    }

    /// Grows the buffer to hold `gi`. Returns the end of its record and whether
    /// the buffer had to grow.
    fn reserve_gi(&mut self, gi: u64) -> Result<(usize, bool), IndexError> {
        let end = self.record_end(gi)?;
        let grew = end > self.data.len();
        if grew {
            self.data.resize(end, 0);
        }
        Ok((end, grew))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Writes `taxid` into the record of `gi`, growing the buffer if needed.
    /// Returns true when the buffer had to grow. GIs above the limit fail with
    /// [`IndexError::OutOfRange`].
    pub fn encode(&mut self, gi: u64, taxid: TaxId) -> Result<bool, IndexError> {
        if taxid > MAX_TAXID {
            return Err(IndexError::TaxidTooLarge(taxid));
        }
        let (end, grew) = self.reserve_gi(gi)?;
        BigEndian::write_u24(&mut self.data[end - RECORD_WIDTH..end], taxid as u32);
        Ok(grew)
    }

    pub fn store<P: AsRef<Path>>(&self, filename: P) -> Result<(), IndexError> {
        info!("Storing binary structure to file ...");
        let start = Instant::now();
        let mut writer = BufWriter::new(File::create(filename)?);
        writer.write_all(&self.data)?;
        writer.flush()?;
        info!("Done ({:.3} secs)", start.elapsed().as_secs_f64());
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(filename: P) -> Result<Self, IndexError> {
        let mut file = File::open(filename)?;
        let mut data = Vec::with_capacity(file.metadata()?.len() as usize);
        file.read_to_end(&mut data)?;
        Ok(Self::from_bytes(data))
    }

    /// Adds every `gi<TAB>taxid` pair from `reader`. Returns how many pairs were
    /// encoded and whether the buffer had to grow.
    pub fn load_pairs<R: BufRead>(
        &mut self,
        mut reader: R,
        source: &Path,
    ) -> Result<(usize, bool), IndexError> {
        let mut buf = Vec::new();
        let mut line_no = 0;
        let mut encoded = 0;
        let mut grew = false;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let (gi, taxid) = parse_pair(line).ok_or_else(|| IndexError::MalformedPair {
                path: source.to_path_buf(),
                line: line_no,
                content: line.to_string(),
            })?;
            grew |= self.encode(gi, taxid).map_err(|e| match e {
                IndexError::OutOfRange(gi) => IndexError::GiAboveLimit {
                    path: source.to_path_buf(),
                    line: line_no,
                    gi,
                    limit: self.gi_limit,
                },
                e => e,
            })?;
            encoded += 1;
        }
        Ok((encoded, grew))
    }
}

impl GiTaxidIndex for InMemoryIndex {
    fn resolve(&self, gi: u64) -> Result<TaxId, IndexError> {
        resolve_in(&self.data, gi)
    }

    fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Index kept on disk. Every lookup is a seek and a 3-byte read on one shared
/// handle, so lookups are serialized through the mutex.
#[derive(Debug)]
pub struct DiskBackedIndex {
    file: Mutex<File>,
    len: u64,
}

impl DiskBackedIndex {
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self, IndexError> {
        let file = File::open(filename)?;
        let len = file.metadata()?.len();
        Ok(DiskBackedIndex {
            file: Mutex::new(file),
            len,
        })
    }
}

impl GiTaxidIndex for DiskBackedIndex {
    fn resolve(&self, gi: u64) -> Result<TaxId, IndexError> {
        let pos = gi
            .checked_mul(RECORD_WIDTH as u64)
            .filter(|pos| {
                pos.checked_add(RECORD_WIDTH as u64)
                    .is_some_and(|end| end <= self.len)
            })
            .ok_or(IndexError::OutOfRange(gi))?;

        let mut record = [0u8; RECORD_WIDTH];
        {
            let mut file = self.file.lock().map_err(|_| IndexError::Poisoned)?;
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut record)?;
        }
        decode(&record, gi)
    }

    fn byte_len(&self) -> usize {
        self.len as usize
    }
}

/// Read-only memory map of the index file; lookups need no lock.
#[derive(Debug)]
pub struct MmapIndex {
    map: Mmap,
}

impl MmapIndex {
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self, IndexError> {
        let file = File::open(filename)?;
        // The index file is never written while it is mapped.
        let map = unsafe { Mmap::map(&file)? };
        Ok(MmapIndex { map })
    }
}

impl GiTaxidIndex for MmapIndex {
    fn resolve(&self, gi: u64) -> Result<TaxId, IndexError> {
        resolve_in(&self.map, gi)
    }

    fn byte_len(&self) -> usize {
        self.map.len()
    }
}

/// Opens a binary index written by [`InMemoryIndex::store`].
pub fn load<P: AsRef<Path>>(
    filename: P,
    mode: ResolverMode,
) -> Result<Box<dyn GiTaxidIndex>, IndexError> {
    let filename = filename.as_ref();
    info!("Loading Gi2taxid binary file {} ...", filename.display());
    let start = Instant::now();
    let index: Box<dyn GiTaxidIndex> = match mode {
        ResolverMode::InMemory => Box::new(InMemoryIndex::from_file(filename)?),
        ResolverMode::Disk => Box::new(DiskBackedIndex::open(filename)?),
        ResolverMode::Mmap => Box::new(MmapIndex::open(filename)?),
    };
    info!(
        "Done ({} records, {:.3} secs)",
        index.byte_len() / RECORD_WIDTH,
        start.elapsed().as_secs_f64()
    );
    Ok(index)
}

fn parse_pair(line: &str) -> Option<(u64, TaxId)> {
    let mut fields = line.split('\t');
    let gi = fields.next()?.trim().parse().ok()?;
    let taxid = fields.next()?.trim().parse().ok()?;
    Some((gi, taxid))
}

/// GI on the last line of a plain mapping file, read from the file's tail only.
/// `None` when the tail holds no parsable record.
pub fn read_last_gi<P: AsRef<Path>>(filename: P) -> Result<Option<u64>, IndexError> {
    let mut file = File::open(filename.as_ref())?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(TAIL_BYTES)))?;
    let mut tail = Vec::with_capacity(TAIL_BYTES as usize);
    file.read_to_end(&mut tail)?;

    let tail = String::from_utf8_lossy(&tail);
    let last = tail.trim_end().rsplit('\n').next().unwrap_or("");
    match parse_pair(last) {
        Some((gi, _)) => Ok(Some(gi)),
        None => {
            warn!(
                "{}: last line {:?} is not a GI/taxid pair",
                filename.as_ref().display(),
                last
            );
            Ok(None)
        }
    }
}

/// Builds an in-memory index from `gi<TAB>taxid` text files (plain or gzipped).
///
/// Plain files are assumed sorted by GI and their last record sizes the buffer.
/// A GI beyond the current buffer grows it, so unsorted or compressed input
/// still yields a complete index.
pub fn build<P: AsRef<Path>>(sources: &[P]) -> Result<InMemoryIndex, IndexError> {
    build_with_limit(sources, DEFAULT_MAX_GI)
}

/// [`build`] with an explicit ceiling on GIs. A record above `gi_limit` fails
/// the build instead of sizing the buffer after it.
pub fn build_with_limit<P: AsRef<Path>>(
    sources: &[P],
    gi_limit: u64,
) -> Result<InMemoryIndex, IndexError> {
    info!("Creating new Gi2taxid binary structure");
    let start = Instant::now();

    let mut max_gi = None;
    let mut tail_sized = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.as_ref();
        let last = if is_gzipped(source)? {
            None
        } else {
            read_last_gi(source)?
        };
        tail_sized.push(last.is_some());
        max_gi = max_gi.max(last);
    }
    let mut index = InMemoryIndex::new().with_gi_limit(gi_limit);
    if let Some(max_gi) = max_gi {
        if max_gi > gi_limit {
            warn!(
                "last GI {} is above the limit of {}; sizing from the records instead",
                max_gi, gi_limit
            );
        } else {
            index.reserve_gi(max_gi)?;
        }
    }

    let mut warned = false;
    for (source, &sized) in sources.iter().zip(&tail_sized) {
        let source = source.as_ref();
        info!("({}) ...", source.display());
        let file_start = Instant::now();
        let (pairs, grew) = index.load_pairs(open_input(source)?, source)?;
        if grew && sized && !warned {
            warn!(
                "{} is not sorted by GI; index buffer had to grow",
                source.display()
            );
            warned = true;
        }
        info!(
            "Done ({} pairs, {:.3} secs)",
            pairs,
            file_start.elapsed().as_secs_f64()
        );
    }

    info!(
        "Index of {} bytes built ({:.3} secs)",
        index.byte_len(),
        start.elapsed().as_secs_f64()
    );
    Ok(index)
}
