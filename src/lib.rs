use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;

/// Read-only scanners over ARPA files and vocabulary checks
pub mod arpa;
/// Error taxonomy for loading and editing models
pub mod error;
/// Back-off language model store
pub mod model;
/// A single language model entry
pub mod ngram;
/// Log-probability conversions and clamping
pub mod prob;

pub use arpa::{Arpa, Wordset};
pub use error::LmError;
pub use model::LanguageModel;
pub use ngram::{Backoff, Ngram};

/// Open a text file for streaming reads, decompressing transparently when
/// the path ends in ".gz"
pub fn open_reader(path: impl AsRef<Path>) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let fh = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(fh))))
    } else {
        Ok(Box::new(BufReader::new(fh)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn it_opens_plain_files() {
        let lines: Vec<String> = open_reader("testdata/small.arpa")
            .unwrap()
            .lines()
            .map(|line| line.unwrap())
            .collect();
        assert!(lines.contains(&"\\data\\".to_owned()));
        assert!(lines.contains(&"\\end\\".to_owned()));
    }

    #[test]
    fn it_opens_gzipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(b"hello\nworld\n").unwrap();
        encoder.finish().unwrap();
        let lines: Vec<String> = open_reader(&path)
            .unwrap()
            .lines()
            .map(|line| line.unwrap())
            .collect();
        assert_eq!(lines, ["hello".to_owned(), "world".to_owned()]);
    }

    #[test]
    fn it_reports_missing_files() {
        assert!(open_reader("testdata/no_such_file.arpa").is_err());
    }
}
