//! JSON-lines event reader.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use tracing::debug;

use crate::error::EnvError;
use crate::event::Event;
use crate::source::EventSource;

/// Reads one JSON-encoded [`Event`] per line. Blank lines are skipped.
pub struct JsonLinesSource<R> {
    name: String,
    lines: Lines<R>,
    line_number: usize,
}

impl JsonLinesSource<BufReader<File>> {
    /// Opens a JSON-lines file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EnvError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!("Opened event file {}", path.display());
        Ok(Self::from_reader(path.display().to_string(), BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn from_reader(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> EventSource for JsonLinesSource<R> {
    fn next_event(&mut self) -> Option<Result<Event, EnvError>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            return Some(
                serde_json::from_str(&line).map_err(|e| EnvError::parse(self.line_number, e)),
            );
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
