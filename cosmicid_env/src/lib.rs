//! Cosmic-ID Environment Layer
//!
//! Data products and the event-source abstraction that the classifier
//! consumes. The classifier never touches files or generators directly:
//!
//! - **Files**: `JsonLinesSource` streams recorded events
//! - **Simulation**: the `cosmicid_sim` oracle implements `EventSource`
//!
//! # Example
//!
//! ```ignore
//! use cosmicid_env::{EventSource, JsonLinesSource};
//!
//! let mut source = JsonLinesSource::open("events.jsonl")?;
//! while let Some(event) = source.next_event() {
//!     match event {
//!         Ok(event) => analyzer.analyze(&event),
//!         Err(e) => tracing::warn!("skipping record: {}", e),
//!     }
//! }
//! ```

mod error;
mod event;
mod json_source;
mod products;
mod source;
mod types;

pub use error::EnvError;
pub use event::Event;
pub use json_source::JsonLinesSource;
pub use products::{
    Calorimetry, CalorimetryPoint, CrtHit, CrtTagger, CrtTrack, EnergyDeposit, Hit, Origin,
    ParticleCandidate, Shower, Track, TrueParticle,
};
pub use source::{EventSource, MemorySource};
pub use types::{CandidateId, EventId, ParticleId, ShowerId, TrackId};
