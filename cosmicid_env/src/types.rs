//! Identifier types shared by every data product.

use serde::{Deserialize, Serialize};

/// Reconstructed track identifier (stable within an event).
pub type TrackId = i32;

/// Simulated particle identifier. Zero is reserved for "no mother".
pub type ParticleId = i32;

/// Particle-candidate identifier (the candidate's `self` key in the hierarchy).
pub type CandidateId = usize;

/// Reconstructed shower identifier.
pub type ShowerId = i32;

/// Run / subrun / event triple identifying one readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EventId {
    pub run: u32,
    pub subrun: u32,
    pub event: u32,
}

impl EventId {
    pub fn new(run: u32, subrun: u32, event: u32) -> Self {
        Self { run, subrun, event }
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Run = {}, SubRun = {}, Event = {}", self.run, self.subrun, self.event)
    }
}
