//! Detector geometry: active volume, fiducial containment and TPC assignment.
//!
//! The detector is a box split into two drift volumes by a cathode plane at
//! x = 0. TPC 0 occupies x < 0 with its anode at `min.x`; TPC 1 occupies
//! x > 0 with its anode at `max.x`.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use cosmicid_env::Hit;

/// x position of the cathode plane [cm].
pub const CATHODE_X: f64 = 0.0;

// ============================================================================
// TPC
// ============================================================================

/// One of the two drift volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tpc {
    /// x < 0
    Zero,
    /// x > 0
    One,
}

impl Tpc {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Tpc::Zero),
            1 => Some(Tpc::One),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Tpc::Zero => 0,
            Tpc::One => 1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Tpc::Zero => Tpc::One,
            Tpc::One => Tpc::Zero,
        }
    }

    /// Sign of the x axis pointing from the cathode toward this TPC's anode.
    pub fn anode_sign(&self) -> f64 {
        match self {
            Tpc::Zero => -1.0,
            Tpc::One => 1.0,
        }
    }
}

/// Majority vote over the readout TPCs of a track's hits.
///
/// Returns `None` for no hits, a tie, or hits only on unknown TPC indices.
pub fn detected_in_tpc(hits: &[Hit]) -> Option<Tpc> {
    let (zero, one) = hits.iter().fold((0usize, 0usize), |(zero, one), hit| {
        match Tpc::from_index(hit.tpc) {
            Some(Tpc::Zero) => (zero + 1, one),
            Some(Tpc::One) => (zero, one + 1),
            None => (zero, one),
        }
    });

    match zero.cmp(&one) {
        std::cmp::Ordering::Greater => Some(Tpc::Zero),
        std::cmp::Ordering::Less => Some(Tpc::One),
        std::cmp::Ordering::Equal => None,
    }
}

// ============================================================================
// ACTIVE VOLUME
// ============================================================================

/// Axis-aligned active volume of the detector [cm].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveVolume {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Default for ActiveVolume {
    fn default() -> Self {
        Self {
            min: Point3::new(-200.0, -200.0, 0.0),
            max: Point3::new(200.0, 200.0, 500.0),
        }
    }
}

impl ActiveVolume {
    /// True if `point` lies strictly inside the volume shrunk by
    /// `margin_side` on every face except the top (max y), which is shrunk
    /// by `margin_top`. Points on the shrunk boundary are outside.
    pub fn in_fiducial(&self, point: &Point3<f64>, margin_side: f64, margin_top: f64) -> bool {
        point.x > self.min.x + margin_side
            && point.x < self.max.x - margin_side
            && point.y > self.min.y + margin_side
            && point.y < self.max.y - margin_top
            && point.z > self.min.z + margin_side
            && point.z < self.max.z - margin_side
    }

    /// True if `point` lies inside the volume (boundary included).
    pub fn contains(&self, point: &Point3<f64>) -> bool {
        (self.min.x..=self.max.x).contains(&point.x)
            && (self.min.y..=self.max.y).contains(&point.y)
            && (self.min.z..=self.max.z).contains(&point.z)
    }

    /// True if the y-z projection of `point` falls on the anode face.
    pub fn contains_yz(&self, point: &Point3<f64>) -> bool {
        (self.min.y..=self.max.y).contains(&point.y) && (self.min.z..=self.max.z).contains(&point.z)
    }

    /// x position of the anode plane of `tpc`.
    pub fn anode_x(&self, tpc: Tpc) -> f64 {
        match tpc {
            Tpc::Zero => self.min.x,
            Tpc::One => self.max.x,
        }
    }

    /// Distance travelled from `point` along `direction` until leaving the
    /// volume. Zero if the point is already outside or the direction is null.
    pub fn exit_distance(&self, point: &Point3<f64>, direction: &Vector3<f64>) -> f64 {
        if !self.contains(point) {
            return 0.0;
        }

        let mut t_exit = f64::INFINITY;
        for axis in 0..3 {
            let d = direction[axis];
            if d > 0.0 {
                t_exit = t_exit.min((self.max[axis] - point[axis]) / d);
            } else if d < 0.0 {
                t_exit = t_exit.min((self.min[axis] - point[axis]) / d);
            }
        }

        if t_exit.is_finite() {
            t_exit.max(0.0)
        } else {
            0.0
        }
    }
}

// ============================================================================
// LINE HELPERS
// ============================================================================

/// Distance of closest approach from `point` to the infinite line through
/// `a` and `b`. Falls back to the point distance when `a == b`.
pub fn distance_to_line(point: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let axis = b - a;
    let norm = axis.norm();
    if norm <= f64::EPSILON {
        return (point - a).norm();
    }
    (point - a).cross(&axis).norm() / norm
}

/// Moves a reconstructed point to where it would be for a particle that
/// crossed at `time_us` instead of at the trigger.
///
/// Charge from a late particle arrives late, so it is reconstructed too
/// close to the cathode; the correction moves it toward the anode. An
/// unknown TPC leaves the point untouched.
pub fn drift_correct(point: &Point3<f64>, tpc: Option<Tpc>, time_us: f64, drift_velocity: f64) -> Point3<f64> {
    match tpc {
        Some(tpc) => Point3::new(
            point.x + tpc.anode_sign() * time_us * drift_velocity,
            point.y,
            point.z,
        ),
        None => *point,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hit(tpc: usize) -> Hit {
        Hit {
            tpc,
            peak_time: 0.0,
            deposits: vec![],
        }
    }

    #[test]
    fn test_centre_is_fiducial() {
        let volume = ActiveVolume::default();
        assert!(volume.in_fiducial(&Point3::new(0.0, 0.0, 250.0), 10.0, 20.0));
    }

    #[test]
    fn test_boundary_is_exclusive_with_zero_margin() {
        let volume = ActiveVolume::default();
        assert!(!volume.in_fiducial(&Point3::new(200.0, 0.0, 250.0), 0.0, 0.0));
        assert!(!volume.in_fiducial(&Point3::new(0.0, -200.0, 250.0), 0.0, 0.0));
        assert!(!volume.in_fiducial(&Point3::new(0.0, 0.0, 0.0), 0.0, 0.0));
        assert!(volume.in_fiducial(&Point3::new(199.999, 0.0, 250.0), 0.0, 0.0));
    }

    #[test]
    fn test_top_margin_only_applies_to_top() {
        let volume = ActiveVolume::default();
        // 15 cm below the top, 15 cm above the bottom
        let near_top = Point3::new(0.0, 185.0, 250.0);
        let near_bottom = Point3::new(0.0, -185.0, 250.0);

        assert!(!volume.in_fiducial(&near_top, 10.0, 20.0));
        assert!(volume.in_fiducial(&near_bottom, 10.0, 20.0));
    }

    #[test]
    fn test_detected_in_tpc_majority() {
        let hits = vec![hit(0), hit(0), hit(1)];
        assert_eq!(detected_in_tpc(&hits), Some(Tpc::Zero));

        let hits = vec![hit(1), hit(1), hit(0), hit(7)];
        assert_eq!(detected_in_tpc(&hits), Some(Tpc::One));
    }

    #[test]
    fn test_detected_in_tpc_ambiguous() {
        assert_eq!(detected_in_tpc(&[]), None);
        assert_eq!(detected_in_tpc(&[hit(0), hit(1)]), None);
    }

    #[test]
    fn test_distance_to_line() {
        let d = distance_to_line(
            &Point3::new(0.0, 5.0, 0.0),
            &Point3::new(-1.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
        );
        assert_relative_eq!(d, 5.0, epsilon = 1e-12);

        let degenerate = distance_to_line(
            &Point3::new(3.0, 4.0, 0.0),
            &Point3::origin(),
            &Point3::origin(),
        );
        assert_relative_eq!(degenerate, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_drift_correction_moves_toward_anode() {
        let p = Point3::new(-50.0, 0.0, 100.0);
        let corrected = drift_correct(&p, Some(Tpc::Zero), 100.0, 0.1);
        assert_relative_eq!(corrected.x, -60.0, epsilon = 1e-12);

        let q = Point3::new(50.0, 0.0, 100.0);
        let corrected = drift_correct(&q, Some(Tpc::One), 100.0, 0.1);
        assert_relative_eq!(corrected.x, 60.0, epsilon = 1e-12);

        assert_eq!(drift_correct(&q, None, 100.0, 0.1), q);
    }

    #[test]
    fn test_exit_distance() {
        let volume = ActiveVolume::default();
        let d = volume.exit_distance(&Point3::new(0.0, 200.0, 250.0), &Vector3::new(0.0, -1.0, 0.0));
        assert_relative_eq!(d, 400.0, epsilon = 1e-9);

        let outside = volume.exit_distance(&Point3::new(0.0, 300.0, 250.0), &Vector3::new(0.0, -1.0, 0.0));
        assert_eq!(outside, 0.0);
    }
}
