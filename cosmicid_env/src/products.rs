//! Event data products.
//!
//! Everything here is produced upstream (simulation, reconstruction, CRT
//! reconstruction) and read-only to the classifier. Units: centimetres for
//! positions, nanoseconds for raw times, MeV/cm for dE/dx.

use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::types::{CandidateId, ParticleId, ShowerId, TrackId};

// ============================================================================
// TRUTH
// ============================================================================

/// Physics source of a simulated particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    BeamNeutrino,
    Cosmic,
    Unknown,
}

/// A simulated particle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrueParticle {
    /// Simulation track id (unique within the event, never 0)
    pub track_id: ParticleId,

    /// Mother's track id, 0 for primaries
    pub mother: ParticleId,

    /// PDG particle-type code
    pub pdg: i32,

    /// Generator that produced the particle
    pub origin: Origin,

    pub start: Point3<f64>,
    pub end: Point3<f64>,

    /// Production time [ns]
    pub time_ns: f64,

    /// Total trajectory length [cm]
    pub trajectory_length: f64,

    /// Interaction vertex of the parent neutrino (beam-neutrino origin only)
    #[serde(default)]
    pub neutrino_vertex: Option<Point3<f64>>,
}

impl TrueParticle {
    pub fn is_primary(&self) -> bool {
        self.mother == 0
    }
}

// ============================================================================
// HITS & CALORIMETRY
// ============================================================================

/// Energy a simulated particle left in one hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyDeposit {
    pub track_id: ParticleId,
    /// Deposited energy [MeV]
    pub energy: f64,
}

/// A reconstructed TPC hit with its back-tracked energy deposits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    /// Readout TPC index (0: x < 0, 1: x > 0)
    pub tpc: usize,

    /// Peak time [ticks]
    pub peak_time: f64,

    #[serde(default)]
    pub deposits: Vec<EnergyDeposit>,
}

/// One (residual range, dE/dx) sample of a calorimetry profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalorimetryPoint {
    /// Distance to the end of the track along the trajectory [cm]
    pub residual_range: f64,
    /// [MeV/cm]
    pub dedx: f64,
    pub position: Point3<f64>,
}

/// Energy-loss profile of a track measured on one readout plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Calorimetry {
    pub plane: usize,
    pub points: Vec<CalorimetryPoint>,
}

// ============================================================================
// TRACKS & SHOWERS
// ============================================================================

/// A reconstructed trajectory: an ordered polyline plus its hits and
/// per-plane calorimetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub trajectory: Vec<Point3<f64>>,
    #[serde(default)]
    pub hits: Vec<Hit>,
    #[serde(default)]
    pub calorimetry: Vec<Calorimetry>,
}

impl Track {
    /// First trajectory point (the "vertex").
    pub fn start(&self) -> Point3<f64> {
        self.trajectory.first().copied().unwrap_or_else(Point3::origin)
    }

    /// Last trajectory point.
    pub fn end(&self) -> Point3<f64> {
        self.trajectory.last().copied().unwrap_or_else(Point3::origin)
    }

    /// Length along the polyline [cm].
    pub fn length(&self) -> f64 {
        self.trajectory
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).norm())
            .sum()
    }

    /// Unit direction of the first segment, pointing into the track.
    pub fn vertex_direction(&self) -> Vector3<f64> {
        match self.trajectory.as_slice() {
            [first, second, ..] => unit(second - first),
            _ => Vector3::zeros(),
        }
    }

    /// Unit direction of the last segment, pointing out of the track.
    pub fn end_direction(&self) -> Vector3<f64> {
        match self.trajectory.as_slice() {
            [.., penultimate, last] => unit(last - penultimate),
            _ => Vector3::zeros(),
        }
    }
}

fn unit(v: Vector3<f64>) -> Vector3<f64> {
    v.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros)
}

/// A reconstructed electromagnetic shower.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shower {
    pub id: ShowerId,
    pub start: Point3<f64>,
    pub direction: Vector3<f64>,
    pub length: f64,
}

// ============================================================================
// CRT
// ============================================================================

/// Cosmic-ray tagger planes surrounding the TPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CrtTagger {
    TopHigh,
    TopLow,
    Bottom,
    South,
    North,
    West,
    East,
}

impl CrtTagger {
    pub fn is_top(&self) -> bool {
        matches!(self, CrtTagger::TopHigh | CrtTagger::TopLow)
    }
}

/// A space point measured by one tagger plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrtHit {
    pub tagger: CrtTagger,
    pub position: Point3<f64>,
    /// Hit time relative to the beam trigger [ns]
    pub time_ns: f64,
    /// Photo-electrons
    #[serde(default)]
    pub pe: f64,
}

/// A straight line through two CRT hits on different taggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrtTrack {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
    /// Track time relative to the beam trigger [ns]
    pub time_ns: f64,
    /// Whether both ends come from measured hits (as opposed to one
    /// hit plus a direction)
    #[serde(default = "default_true")]
    pub complete: bool,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// PARTICLE HIERARCHY
// ============================================================================

/// A reconstructed particle candidate in the parent/daughter hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleCandidate {
    /// Stable per-event key
    pub id: CandidateId,

    /// Parent key, `None` for primaries
    #[serde(default)]
    pub parent: Option<CandidateId>,

    #[serde(default)]
    pub daughters: Vec<CandidateId>,

    /// Hypothesised PDG code (neutrino flavours mark the beam hypothesis)
    pub pdg: i32,

    /// Associated tracks
    #[serde(default)]
    pub tracks: Vec<TrackId>,

    /// Associated showers
    #[serde(default)]
    pub showers: Vec<ShowerId>,

    /// T0s attached by an upstream reconstruction pass [ns]
    #[serde(default)]
    pub t0s_ns: Vec<f64>,

    /// Free-form properties (e.g. topological scores)
    #[serde(default)]
    pub metadata: BTreeMap<String, f64>,
}

impl ParticleCandidate {
    pub fn is_primary(&self) -> bool {
        self.parent.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_track() -> Track {
        Track {
            id: 1,
            trajectory: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.0, 3.0, 4.0),
                Point3::new(0.0, 6.0, 8.0),
            ],
            hits: vec![],
            calorimetry: vec![],
        }
    }

    #[test]
    fn test_track_length_and_ends() {
        let track = straight_track();
        assert_eq!(track.start(), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(track.end(), Point3::new(0.0, 6.0, 8.0));
        assert!((track.length() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_track_directions_are_unit() {
        let track = straight_track();
        let dir = track.vertex_direction();
        assert!((dir.norm() - 1.0).abs() < 1e-12);
        assert!((dir.y - 0.6).abs() < 1e-12);
        assert_eq!(track.end_direction(), dir);
    }

    #[test]
    fn test_single_point_track_has_zero_direction() {
        let track = Track {
            id: 2,
            trajectory: vec![Point3::new(1.0, 1.0, 1.0)],
            hits: vec![],
            calorimetry: vec![],
        };
        assert_eq!(track.vertex_direction(), Vector3::zeros());
        assert_eq!(track.length(), 0.0);
    }

    #[test]
    fn test_candidate_deserializes_with_defaults() {
        let json = r#"{"id": 4, "pdg": 14}"#;
        let candidate: ParticleCandidate = serde_json::from_str(json).unwrap();
        assert!(candidate.is_primary());
        assert!(candidate.daughters.is_empty());
        assert!(candidate.t0s_ns.is_empty());
    }
}
