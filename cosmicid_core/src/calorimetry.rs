//! Stopping-particle identification from the energy-loss profile.
//!
//! A particle that stops inside the detector shows a Bragg rise: dE/dx
//! grows as the residual range shrinks. Near the endpoint the profile is
//! compared against two hypotheses:
//! - **Stopping**: a power law `dE/dx = A * R^b` with `b < 0`
//! - **Through-going**: a flat line at the mean dE/dx
//!
//! The end is called stopping when the power law describes the samples
//! much better than the flat line.

use nalgebra::Point3;

use cosmicid_env::Calorimetry;

use crate::config::CosmicIdConfig;

/// Fewest in-window samples the fit will accept.
pub const MIN_STOPPING_SAMPLES: usize = 10;

/// Thresholds of the stopping test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingCut {
    pub range_min: f64,
    pub range_max: f64,
    pub dedx_max: f64,
    pub chi2_limit: f64,
}

impl StoppingCut {
    pub fn from_config(config: &CosmicIdConfig) -> Self {
        Self {
            range_min: config.res_rg_min,
            range_max: config.res_rg_max,
            dedx_max: config.dedx_max,
            chi2_limit: config.stopping_chi2_limit,
        }
    }

    /// True if the profile near `endpoint` is consistent with a particle
    /// stopping there.
    pub fn is_stopping(&self, calorimetry: &[Calorimetry], endpoint: &Point3<f64>) -> bool {
        match self.fit(calorimetry, endpoint) {
            Some(fit) => {
                fit.mean_dedx < self.dedx_max && fit.exponent < 0.0 && fit.chi2_ratio < self.chi2_limit
            }
            None => false,
        }
    }

    /// Fits the profile near `endpoint`. `None` when there is no profile or
    /// too few samples fall in the residual-range window.
    pub fn fit(&self, calorimetry: &[Calorimetry], endpoint: &Point3<f64>) -> Option<StoppingFit> {
        let profile = best_plane(calorimetry)?;
        let samples = oriented_samples(profile, endpoint);

        let window: Vec<(f64, f64)> = samples
            .into_iter()
            .filter(|(range, _)| (self.range_min..=self.range_max).contains(range))
            .collect();

        if window.len() < MIN_STOPPING_SAMPLES {
            return None;
        }

        StoppingFit::from_samples(&window)
    }
}

/// Result of comparing the stopping and flat hypotheses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingFit {
    pub samples: usize,
    pub mean_dedx: f64,
    /// `A` in `A * R^b`
    pub amplitude: f64,
    /// `b` in `A * R^b`
    pub exponent: f64,
    /// Pearson χ² of the power law over that of the flat mean
    pub chi2_ratio: f64,
}

impl StoppingFit {
    /// Fits `(residual range, dE/dx)` pairs. Non-positive values cannot
    /// enter the log-log fit and are dropped.
    fn from_samples(samples: &[(f64, f64)]) -> Option<Self> {
        let positive: Vec<(f64, f64)> = samples
            .iter()
            .copied()
            .filter(|&(range, dedx)| range > 0.0 && dedx > 0.0)
            .collect();
        if positive.len() < MIN_STOPPING_SAMPLES {
            return None;
        }

        let n = positive.len() as f64;
        let mean_dedx = positive.iter().map(|&(_, dedx)| dedx).sum::<f64>() / n;

        // Least squares of ln(dE/dx) = ln(A) + b ln(R)
        let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
        for &(range, dedx) in &positive {
            let (x, y) = (range.ln(), dedx.ln());
            sx += x;
            sy += y;
            sxx += x * x;
            sxy += x * y;
        }
        let denom = n * sxx - sx * sx;
        if denom.abs() <= f64::EPSILON {
            return None;
        }
        let exponent = (n * sxy - sx * sy) / denom;
        let amplitude = ((sy - exponent * sx) / n).exp();

        let chi2_power: f64 = positive
            .iter()
            .map(|&(range, dedx)| pearson(dedx, amplitude * range.powf(exponent)))
            .sum();
        let chi2_flat: f64 = positive.iter().map(|&(_, dedx)| pearson(dedx, mean_dedx)).sum();

        let chi2_ratio = if chi2_flat > f64::EPSILON {
            chi2_power / chi2_flat
        } else {
            f64::INFINITY
        };

        Some(Self {
            samples: positive.len(),
            mean_dedx,
            amplitude,
            exponent,
            chi2_ratio,
        })
    }
}

fn pearson(observed: f64, expected: f64) -> f64 {
    (observed - expected).powi(2) / expected
}

/// The plane with the most samples carries the profile.
fn best_plane(calorimetry: &[Calorimetry]) -> Option<&Calorimetry> {
    calorimetry
        .iter()
        .filter(|c| !c.points.is_empty())
        .max_by_key(|c| c.points.len())
}

/// Returns `(residual range, dE/dx)` with the residual range measured from
/// `endpoint`.
///
/// Residual range is stored relative to whichever end reconstruction
/// thought the particle stopped at. If that is the far end from
/// `endpoint`, it is mirrored within its stored span, so the sample next
/// to `endpoint` takes the offset the sample next to the far end had.
fn oriented_samples(profile: &Calorimetry, endpoint: &Point3<f64>) -> Vec<(f64, f64)> {
    let (first, last) = match (profile.points.first(), profile.points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Vec::new(),
    };

    let near_first = (first.position - endpoint).norm() < (last.position - endpoint).norm();
    let reversed = if near_first {
        first.residual_range > last.residual_range
    } else {
        first.residual_range < last.residual_range
    };
    let flip_from = reversed.then(|| first.residual_range + last.residual_range);

    profile
        .points
        .iter()
        .map(|p| {
            let range = match flip_from {
                Some(origin) => origin - p.residual_range,
                None => p.residual_range,
            };
            (range, p.dedx)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cosmicid_env::CalorimetryPoint;

    /// A track along +z from z = 0 to z = 31 that stops at z = 0:
    /// residual range equals z.
    fn bragg_profile() -> Calorimetry {
        Calorimetry {
            plane: 2,
            points: (1..=31)
                .map(|i| {
                    let range = i as f64;
                    CalorimetryPoint {
                        residual_range: range,
                        dedx: 17.0 * range.powf(-0.42),
                        position: Point3::new(0.0, 0.0, range),
                    }
                })
                .collect(),
        }
    }

    fn mip_profile() -> Calorimetry {
        Calorimetry {
            plane: 2,
            points: (1..=31)
                .map(|i| {
                    let range = i as f64;
                    CalorimetryPoint {
                        residual_range: range,
                        dedx: 2.1 + 0.1 * (i as f64).sin(),
                        position: Point3::new(0.0, 0.0, range),
                    }
                })
                .collect(),
        }
    }

    fn cut() -> StoppingCut {
        StoppingCut::from_config(&CosmicIdConfig::default())
    }

    #[test]
    fn test_bragg_peak_is_stopping() {
        let calos = vec![bragg_profile()];
        let start = Point3::new(0.0, 0.0, 0.0);

        let fit = cut().fit(&calos, &start).unwrap();
        assert_relative_eq!(fit.exponent, -0.42, epsilon = 1e-9);
        assert_relative_eq!(fit.amplitude, 17.0, epsilon = 1e-9);
        assert!(fit.chi2_ratio < 1e-6);
        assert!(cut().is_stopping(&calos, &start));
    }

    #[test]
    fn test_flat_profile_is_not_stopping() {
        let calos = vec![mip_profile()];
        assert!(!cut().is_stopping(&calos, &Point3::new(0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_far_end_flips_residual_range() {
        // Asking about the other end reverses the profile: dE/dx now falls
        // toward the endpoint.
        let calos = vec![bragg_profile()];
        let far_end = Point3::new(0.0, 0.0, 32.0);

        assert!(!cut().is_stopping(&calos, &far_end));
        let fit = cut().fit(&calos, &far_end).unwrap();
        assert!(fit.exponent > 0.0);
    }

    #[test]
    fn test_reversed_storage_keeps_endpoint_sample() {
        // Same Bragg rise toward z = 0, but residual range stored from the
        // other end.
        let mut profile = bragg_profile();
        for p in &mut profile.points {
            p.residual_range = 32.0 - p.residual_range;
        }
        let calos = vec![profile];
        let start = Point3::new(0.0, 0.0, 0.0);

        let samples = oriented_samples(&calos[0], &start);
        assert_relative_eq!(samples[0].0, 1.0);
        assert_relative_eq!(samples[30].0, 31.0);

        let fit = cut().fit(&calos, &start).unwrap();
        assert_eq!(fit.samples, 30);
        assert_relative_eq!(fit.exponent, -0.42, epsilon = 1e-9);
        assert_relative_eq!(fit.amplitude, 17.0, epsilon = 1e-9);
        assert!(cut().is_stopping(&calos, &start));
    }

    #[test]
    fn test_too_few_samples() {
        let mut profile = bragg_profile();
        profile.points.truncate(MIN_STOPPING_SAMPLES - 1);
        let calos = vec![profile];

        assert!(cut().fit(&calos, &Point3::origin()).is_none());
        assert!(!cut().is_stopping(&calos, &Point3::origin()));
    }

    #[test]
    fn test_high_mean_dedx_is_not_stopping() {
        let mut profile = bragg_profile();
        for p in &mut profile.points {
            p.dedx *= 5.0;
        }
        assert!(!cut().is_stopping(&[profile], &Point3::origin()));
    }

    #[test]
    fn test_uses_plane_with_most_samples() {
        let mut sparse = mip_profile();
        sparse.plane = 0;
        sparse.points.truncate(12);
        let calos = vec![sparse, bragg_profile()];

        assert!(cut().is_stopping(&calos, &Point3::origin()));
    }

    #[test]
    fn test_no_calorimetry() {
        assert!(!cut().is_stopping(&[], &Point3::origin()));
    }
}
