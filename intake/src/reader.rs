//! Streaming reader for intake files.

use serde_json::Value;
use snafu::Snafu;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Errors while reading an intake file.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Intake file not found: {}", path))]
    NotFound { path: String },

    #[snafu(display("Cannot read intake file {}: {}", path, source))]
    Read {
        path: String,
        source: std::io::Error,
    },
}

/// Result with a reader [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One consumed line of an intake file.
///
/// `line_number` is 1-based and counts every physical line, so it can be
/// stored directly in a checkpoint. Blank lines are consumed silently (the
/// counter still advances) and never surface as items.
#[derive(Debug)]
pub enum LineItem {
    /// A line that parsed as a JSON object.
    Valid {
        /// 1-based physical line number.
        line_number: u64,
        /// The parsed value.
        value: Value,
    },
    /// A non-blank line that is not valid JSON.
    Invalid {
        /// 1-based physical line number.
        line_number: u64,
        /// The raw line content.
        raw: String,
        /// The parse failure.
        error: serde_json::Error,
    },
}

/// Iterator over the lines of an intake file, starting after `start_line`.
#[derive(Debug)]
pub struct JsonlStream {
    path: String,
    lines: Lines<BufReader<File>>,
    line_number: u64,
    start_line: u64,
}

impl JsonlStream {
    /// The number of the last physical line consumed.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }
}

impl Iterator for JsonlStream {
    type Item = Result<LineItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    return Some(Err(Error::Read {
                        path: self.path.clone(),
                        source,
                    }))
                }
            };
            self.line_number += 1;

            // Resume support: everything at or before the checkpoint has
            // already been ingested.
            if self.line_number <= self.start_line {
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Some(Ok(match serde_json::from_str(trimmed) {
                Ok(value) => LineItem::Valid {
                    line_number: self.line_number,
                    value,
                },
                Err(error) => LineItem::Invalid {
                    line_number: self.line_number,
                    raw: trimmed.to_string(),
                    error,
                },
            }));
        }
    }
}

/// Open `path` for streaming, resuming after `start_line` physical lines.
pub fn stream_lines(path: &Path, start_line: u64) -> Result<JsonlStream> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound {
                path: path.display().to_string(),
            }
        } else {
            Error::Read {
                path: path.display().to_string(),
                source,
            }
        }
    })?;

    Ok(JsonlStream {
        path: path.display().to_string(),
        lines: BufReader::new(file).lines(),
        line_number: 0,
        start_line,
    })
}

/// Count the non-blank lines of an intake file.
pub fn count_lines(path: &Path) -> Result<u64> {
    let mut count = 0;
    for item in stream_lines(path, 0)? {
        item?;
        count += 1;
    }
    Ok(count)
}
