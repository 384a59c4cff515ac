//! Event-source abstraction.

use std::collections::VecDeque;

use crate::error::EnvError;
use crate::event::Event;

/// Where events come from.
///
/// # Implementations
///
/// - **Files**: `JsonLinesSource` - one JSON-encoded `Event` per line
/// - **Memory**: `MemorySource` - a prepared queue (tests, generators)
///
/// A source yields `Some(Err(_))` for a record it could not retrieve and
/// keeps going; `None` ends the job.
pub trait EventSource {
    /// Retrieves the next event.
    fn next_event(&mut self) -> Option<Result<Event, EnvError>>;

    /// Human-readable name for log lines.
    fn name(&self) -> &str;
}

/// In-memory queue of events.
#[derive(Debug, Default)]
pub struct MemorySource {
    name: String,
    events: VecDeque<Event>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            name: name.into(),
            events: events.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl EventSource for MemorySource {
    fn next_event(&mut self) -> Option<Result<Event, EnvError>> {
        self.events.pop_front().map(Ok)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
