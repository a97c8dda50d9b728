use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Size of the read buffer for large inputs (alignment files can be many GB).
pub const INPUT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Returns true if the file at `path` starts with the gzip magic bytes.
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file.read(&mut magic[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(magic == GZIP_MAGIC)
}

/// Opens `path` for buffered line reading, decompressing it on the fly when it is
/// gzipped. `-` reads standard input.
pub fn open_input<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::with_capacity(
            INPUT_BUFFER_SIZE,
            io::stdin(),
        )));
    }

    let file = File::open(path)?;
    if is_gzipped(path)? {
        let decoder = MultiGzDecoder::new(file);
        Ok(Box::new(BufReader::with_capacity(INPUT_BUFFER_SIZE, decoder)))
    } else {
        Ok(Box::new(BufReader::with_capacity(INPUT_BUFFER_SIZE, file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_open_plain_and_gzipped() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        let packed = dir.path().join("packed.txt.gz");

        std::fs::write(&plain, "a\tb\nc\td\n").unwrap();
        let mut encoder = GzEncoder::new(File::create(&packed).unwrap(), Compression::default());
        encoder.write_all(b"a\tb\nc\td\n").unwrap();
        encoder.finish().unwrap();

        assert!(!is_gzipped(&plain).unwrap());
        assert!(is_gzipped(&packed).unwrap());

        for path in [&plain, &packed] {
            let lines: Vec<String> = open_input(path).unwrap().lines().map(|l| l.unwrap()).collect();
            assert_eq!(lines, vec!["a\tb", "c\td"]);
        }
    }

    #[test]
    fn test_empty_file_is_not_gzipped() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(!is_gzipped(file.path()).unwrap());
    }
}
