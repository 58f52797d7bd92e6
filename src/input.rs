use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use s2dem::utils::bit_cursor::{Source, Streamed};

/// Average outer record size used to guess the record count of a file.
const BYTES_PER_RECORD: u64 = 256;

/// Unified input that handles both seekable files and pipe input
pub struct InputReader {
    source: Box<dyn Source>,
    len: Option<u64>,
}

impl InputReader {
    /// Create a new InputReader from a path
    /// Use "-" for stdin pipe input
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path = input_path.as_ref();

        if path.as_os_str() == "-" {
            return Ok(Self {
                source: Box::new(Streamed(io::stdin().lock())),
                len: None,
            });
        }

        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file.metadata().ok().map(|m| m.len());

        Ok(Self {
            source: Box::new(BufReader::new(file)),
            len,
        })
    }

    /// Check if this is pipe input
    pub fn is_pipe(&self) -> bool {
        self.len.is_none()
    }

    pub fn len(&self) -> Option<u64> {
        self.len
    }

    /// Rough number of records in the input, for sizing the dispatch queue.
    pub fn expected_records(&self) -> Option<usize> {
        self.len.map(|len| (len / BYTES_PER_RECORD) as usize)
    }

    pub fn into_source(self) -> Box<dyn Source> {
        self.source
    }
}
