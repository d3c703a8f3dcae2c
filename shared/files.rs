//! Line-oriented and whole-file access to the pipeline's text inputs.
//!
//! Every input of the simulation (mutation lists, intersected annotations,
//! coefficient tables, beta matrices) is plain text, optionally gzip
//! compressed. The readers here hide the compression so that parsers only ever
//! see one line at a time, with the trailing `\n`/`\r\n` removed.

use flate2::read::MultiGzDecoder;
use log::debug;
use natord::compare;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("Opening {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Error reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Listing directory {path}: {source}")]
    List {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Line {line} of {path} is not valid UTF-8")]
    Utf8 { path: String, line: usize },
}

/// A trait that abstracts sequential, line-oriented access to text data,
/// regardless of whether the file on disk is compressed.
pub trait TextSource {
    /// Human readable name of the underlying file, used in error messages.
    fn path_display(&self) -> &str;

    /// Number of lines handed out so far (1-based line number of the last line).
    fn line_number(&self) -> usize;

    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, FileError>;

    /// Convenience wrapper around `next_line` that validates UTF-8.
    fn next_str<'a>(&'a mut self) -> Result<Option<&'a str>, FileError> {
        let line = self.line_number() + 1;
        let path = self.path_display().to_string();
        match self.next_line()? {
            Some(bytes) => std::str::from_utf8(bytes)
                .map(Some)
                .map_err(|_| FileError::Utf8 { path, line }),
            None => Ok(None),
        }
    }
}

struct LocalTextSource<R: BufRead> {
    reader: R,
    line: Vec<u8>,
    line_active: bool,
    line_number: usize,
    path_display: String,
}

impl<R: BufRead> LocalTextSource<R> {
    fn new(path: &Path, reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(1024),
            line_active: false,
            line_number: 0,
            path_display: path.display().to_string(),
        }
    }
}

impl<R: BufRead> TextSource for LocalTextSource<R> {
    fn path_display(&self) -> &str {
        &self.path_display
    }

    fn line_number(&self) -> usize {
        self.line_number
    }

    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, FileError> {
        if self.line_active {
            self.line.clear();
            self.line_active = false;
        }

        let bytes_read =
            self.reader
                .read_until(b'\n', &mut self.line)
                .map_err(|source| FileError::Read {
                    path: self.path_display.clone(),
                    source,
                })?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        self.line_active = true;
        self.line_number += 1;
        Ok(Some(&self.line))
    }
}

/// Returns true when the path carries a `.gz` extension.
pub fn is_gzip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

fn open_file(path: &Path) -> Result<File, FileError> {
    File::open(path).map_err(|source| FileError::Open {
        path: path.display().to_string(),
        source,
    })
}

pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>, FileError> {
    let file = open_file(path)?;
    if is_gzip(path) {
        debug!("Opening {} through a gzip decoder", path.display());
        let reader = BufReader::new(MultiGzDecoder::new(file));
        Ok(Box::new(LocalTextSource::new(path, reader)))
    } else {
        Ok(Box::new(LocalTextSource::new(path, BufReader::new(file))))
    }
}

/// Reads a whole file into memory, decompressing it when needed. Used for the
/// tables handed to the columnar CSV reader.
pub fn read_to_bytes(path: &Path) -> Result<Vec<u8>, FileError> {
    let file = open_file(path)?;
    let mut bytes = Vec::new();
    let result = if is_gzip(path) {
        MultiGzDecoder::new(file).read_to_end(&mut bytes)
    } else {
        BufReader::new(file).read_to_end(&mut bytes)
    };
    result.map_err(|source| FileError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(bytes)
}

/// Lists the regular, non-hidden files of a directory in natural order
/// (`file2` before `file10`), so that every run visits them identically.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, FileError> {
    let list_error = |source| FileError::List {
        path: dir.display().to_string(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_error)? {
        let entry = entry.map_err(list_error)?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.'));
        if path.is_file() && !hidden {
            files.push(path);
        }
    }
    files.sort_by(|a, b| compare(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(files)
}

/// File name of `path` as UTF-8, or an empty string.
pub fn file_name_str(path: &Path) -> &str {
    path.file_name().and_then(|name| name.to_str()).unwrap_or("")
}

/// Creates the parent directory of an output path if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn collect_lines(path: &Path) -> Vec<String> {
        let mut source = open_text_source(path).unwrap();
        let mut lines = Vec::new();
        while let Some(line) = source.next_str().unwrap() {
            lines.push(line.to_string());
        }
        lines
    }

    #[test]
    fn plain_source_strips_line_endings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, "a\tb\r\nc\td\n\nlast").unwrap();

        assert_eq!(collect_lines(&path), vec!["a\tb", "c\td", "", "last"]);
    }

    #[test]
    fn gzip_source_is_transparent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packed.txt.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"header\nrow1\nrow2\n").unwrap();
        encoder.finish().unwrap();

        assert_eq!(collect_lines(&path), vec!["header", "row1", "row2"]);
        assert_eq!(read_to_bytes(&path).unwrap(), b"header\nrow1\nrow2\n");
    }

    #[test]
    fn line_numbers_track_consumed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("numbers.txt");
        fs::write(&path, "one\ntwo\n").unwrap();

        let mut source = open_text_source(&path).unwrap();
        assert_eq!(source.line_number(), 0);
        source.next_line().unwrap();
        source.next_line().unwrap();
        assert_eq!(source.line_number(), 2);
        assert!(source.next_line().unwrap().is_none());
    }

    #[test]
    fn listing_uses_natural_order_and_skips_hidden_files() {
        let dir = tempdir().unwrap();
        for name in ["file10.csv", "file2.csv", ".hidden", "file1.csv"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();

        let names: Vec<String> = list_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| file_name_str(p).to_string())
            .collect();
        assert_eq!(names, vec!["file1.csv", "file2.csv", "file10.csv"]);
    }
}
