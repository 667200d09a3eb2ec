//! Decompress line-delimited archives and group lines into fixed-size batches

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use crate::error::{Error, Result};

/// One raw archive line, without its line terminator
pub type Line = Vec<u8>;

/// Supported archive compression, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// `.bz2` (multi-stream bzip2)
    Bzip2,
    /// `.zst`
    Zstd,
}

impl Compression {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .ok_or_else(|| Error::MissingExtension(path.to_path_buf()))?;

        match ext {
            "bz2" => Ok(Compression::Bzip2),
            "zst" => Ok(Compression::Zstd),
            other => Err(Error::UnsupportedCompression {
                path: path.to_path_buf(),
                extension: other.to_string(),
            }),
        }
    }

    /// Wrap a compressed byte stream in a single-pass decoder
    pub fn decoder<R: Read + Send + 'static>(self, input: R) -> Result<Box<dyn Read + Send>> {
        Ok(match self {
            Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(input)),
            Compression::Zstd => {
                let mut decoder = zstd::stream::read::Decoder::new(input)?;
                // dumps are written with --long=31
                decoder.window_log_max(31)?;
                Box::new(decoder)
            }
        })
    }
}

/// Lazy sequence of line batches over a buffered reader
///
/// Every batch holds `batch_size` lines except possibly the last one.
/// Reading is single-pass; the reader is released when the iterator drops.
pub struct LineBatches<R> {
    reader: R,
    batch_size: usize,
    done: bool,
}

impl<R: BufRead> LineBatches<R> {
    pub fn new(reader: R, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        Ok(Self { reader, batch_size, done: false })
    }

    fn read_line(&mut self) -> Result<Option<Line>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

impl<R: BufRead> Iterator for LineBatches<R> {
    type Item = Result<Vec<Line>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.read_line() {
                Ok(Some(line)) => batch.push(line),
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

/// Open a compressed archive as batches of `batch_size` lines.
///
/// Fails fast on a missing or unsupported extension, before opening the file.
pub fn open_archive<P: AsRef<Path>>(
    path: P,
    batch_size: usize,
) -> Result<LineBatches<BufReader<Box<dyn Read + Send>>>> {
    let path = path.as_ref();
    let compression = Compression::from_path(path)?;
    let file = File::open(path)?;
    let decoder = compression.decoder(file)?;
    LineBatches::new(BufReader::new(decoder), batch_size)
}
