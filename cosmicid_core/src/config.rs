//! Classifier configuration.
//!
//! A flat set of thresholds supplied once at startup. Every field has a
//! default so a JSON file only needs to name what it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::ActiveVolume;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Could not read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Thresholds for the cosmic-rejection pipeline.
///
/// Distances in cm, times in µs, angles as noted per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmicIdConfig {
    /// Emit per-track and per-candidate detail at debug level
    pub verbose: bool,

    // === Fiducial volume ===
    /// Fiducial margin on the sides and bottom
    pub fiducial: f64,
    /// Fiducial margin on the top face
    pub fiducial_top: f64,
    /// Fiducial margin (all faces) used by the stopping-particle cut
    pub fiducial_stop: f64,

    // === CPA stitching ===
    /// Maximum y-z distance between the pieces at the cathode
    pub cpa_stitch_distance: f64,
    /// Maximum angle between the pieces [degrees]
    pub cpa_stitch_angle: f64,
    /// Maximum difference of the pieces' closest approach to the cathode
    pub cpa_x_difference: f64,

    // === APA crossing ===
    /// How close a shifted endpoint must come to the anode plane
    pub apa_distance: f64,

    // === Stopping particle ===
    /// Residual-range window start
    pub res_rg_min: f64,
    /// Residual-range window end
    pub res_rg_max: f64,
    /// Upper bound on the mean dE/dx in the window [MeV/cm]
    pub dedx_max: f64,
    /// Upper bound on χ²(stopping) / χ²(flat)
    pub stopping_chi2_limit: f64,

    // === CRT hit matching ===
    pub min_track_length: f64,
    /// Fraction of trajectory points used to estimate end directions
    pub track_direction_frac: f64,
    /// Maximum distance of closest approach to a CRT hit
    pub distance_limit: f64,

    // === CRT track matching ===
    /// Maximum angle between TPC and CRT track [radians]
    pub max_angle_diff: f64,
    /// Maximum mean endpoint distance to the CRT track
    pub max_distance: f64,

    /// Half-width of the beam window
    pub beam_time_limit: f64,

    // === Detector constants ===
    /// Electron drift velocity [cm/µs]
    pub drift_velocity: f64,
    /// Largest |T0| a crossing time can have and still be in the readout
    pub max_drift_time: f64,
    pub active_volume: ActiveVolume,

    // === CRT track building ===
    /// Hits closer than this in time belong to the same crossing
    pub crt_time_limit: f64,
    /// Same-tagger hits closer than this are averaged into one point
    pub crt_average_limit: f64,
    /// Build tracks that use the top tagger
    pub crt_use_top_plane: bool,
    /// Candidate tracks closer than this to an accepted one are duplicates
    pub crt_distance_limit: f64,
}

impl Default for CosmicIdConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            fiducial: 10.0,
            fiducial_top: 10.0,
            fiducial_stop: 2.0,
            cpa_stitch_distance: 30.0,
            cpa_stitch_angle: 10.0,
            cpa_x_difference: 10.0,
            apa_distance: 2.0,
            res_rg_min: 1.0,
            res_rg_max: 30.0,
            dedx_max: 15.0,
            stopping_chi2_limit: 0.5,
            min_track_length: 20.0,
            track_direction_frac: 0.5,
            distance_limit: 30.0,
            max_angle_diff: 0.1,
            max_distance: 40.0,
            beam_time_limit: 2.0,
            drift_velocity: 0.1565,
            max_drift_time: 1280.0,
            active_volume: ActiveVolume::default(),
            crt_time_limit: 0.2,
            crt_average_limit: 30.0,
            crt_use_top_plane: true,
            crt_distance_limit: 25.0,
        }
    }
}

impl CosmicIdConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks every threshold for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("fiducial", self.fiducial),
            ("fiducial_top", self.fiducial_top),
            ("fiducial_stop", self.fiducial_stop),
            ("cpa_stitch_distance", self.cpa_stitch_distance),
            ("cpa_stitch_angle", self.cpa_stitch_angle),
            ("cpa_x_difference", self.cpa_x_difference),
            ("apa_distance", self.apa_distance),
            ("res_rg_min", self.res_rg_min),
            ("min_track_length", self.min_track_length),
            ("distance_limit", self.distance_limit),
            ("max_angle_diff", self.max_angle_diff),
            ("max_distance", self.max_distance),
            ("crt_time_limit", self.crt_time_limit),
            ("crt_average_limit", self.crt_average_limit),
            ("crt_distance_limit", self.crt_distance_limit),
        ];
        for (field, value) in non_negative {
            if !(value >= 0.0) {
                return Err(invalid(field, format!("must be >= 0, got {}", value)));
            }
        }

        let positive = [
            ("beam_time_limit", self.beam_time_limit),
            ("drift_velocity", self.drift_velocity),
            ("max_drift_time", self.max_drift_time),
            ("dedx_max", self.dedx_max),
            ("stopping_chi2_limit", self.stopping_chi2_limit),
        ];
        for (field, value) in positive {
            if !(value > 0.0) {
                return Err(invalid(field, format!("must be > 0, got {}", value)));
            }
        }

        if self.res_rg_max <= self.res_rg_min {
            return Err(invalid(
                "res_rg_max",
                format!("must exceed res_rg_min ({} <= {})", self.res_rg_max, self.res_rg_min),
            ));
        }

        if !(self.track_direction_frac > 0.0 && self.track_direction_frac <= 1.0) {
            return Err(invalid(
                "track_direction_frac",
                format!("must be in (0, 1], got {}", self.track_direction_frac),
            ));
        }

        let volume = &self.active_volume;
        if !(volume.min.x < 0.0 && volume.max.x > 0.0) {
            return Err(invalid("active_volume", "cathode (x = 0) must lie inside the volume"));
        }
        if !(volume.min.y < volume.max.y && volume.min.z < volume.max.z) {
            return Err(invalid("active_volume", "min corner must be below max corner"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CosmicIdConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CosmicIdConfig::from_json_str(r#"{"beam_time_limit": 100.0, "verbose": true}"#).unwrap();
        assert_eq!(config.beam_time_limit, 100.0);
        assert!(config.verbose);
        assert_eq!(config.fiducial, CosmicIdConfig::default().fiducial);
    }

    #[test]
    fn test_rejects_negative_margin() {
        let err = CosmicIdConfig::from_json_str(r#"{"fiducial": -1.0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "fiducial", .. }));
    }

    #[test]
    fn test_rejects_inverted_residual_range_window() {
        let config = CosmicIdConfig {
            res_rg_min: 10.0,
            res_rg_max: 5.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "res_rg_max", .. })
        ));
    }

    #[test]
    fn test_rejects_zero_beam_window() {
        let config = CosmicIdConfig {
            beam_time_limit: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_nan() {
        let config = CosmicIdConfig {
            max_distance: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            CosmicIdConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"fiducial_stop": 5.0}}"#).unwrap();
        let config = CosmicIdConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.fiducial_stop, 5.0);
    }
}
