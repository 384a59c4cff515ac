//! Cosmic-ID Core - Cosmic-ray rejection for liquid-argon TPC events
//!
//! Beam-hypothesis tracks pass through seven ordered cuts; whatever survives
//! is kept. The cuts draw on three kinds of evidence:
//! 1. **Geometry**: fiducial containment, detection TPC, stopping-particle
//!    energy loss
//! 2. **Timing**: cathode stitching, CRT tracks, CRT hits and anode
//!    crossings, each yielding an optional T0
//! 3. **Truth**: hit-level back-tracking scores every verdict in a
//!    confusion matrix
//!
//! [`CosmicRemovalAnalyzer`] drives one event at a time and accumulates into
//! a caller-owned [`ConfusionCounters`].

pub mod analyzer;
pub mod calorimetry;
pub mod config;
pub mod crt;
pub mod geometry;
pub mod hierarchy;
pub mod pipeline;
pub mod scoring;
pub mod t0;
pub mod truth;

// Re-export key types for convenience
pub use analyzer::{AnalysisError, CosmicRemovalAnalyzer, EventOutcome, EventSummary, TrackVerdict};
pub use calorimetry::{StoppingCut, StoppingFit};
pub use config::{ConfigError, CosmicIdConfig};
pub use crt::{apa_crossing_times, build_crt_tracks, CrtTrackParams};
pub use geometry::{detected_in_tpc, ActiveVolume, Tpc};
pub use hierarchy::{Diagnostic, FinalStates};
pub use pipeline::{CosmicClassifier, Cut, Verdict};
pub use scoring::{ConfusionCounters, ScoreReport, Tally};
pub use t0::{EventEstimators, StitchMatch, T0Estimate, T0Estimators};
pub use truth::{TruthIndex, TruthLabel};
