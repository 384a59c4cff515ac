//! T0 estimators.
//!
//! Four independent sources of a track's time offset relative to the
//! trigger, plus the prior T0 an upstream reconstruction pass may have
//! attached. Every estimator returns `None` when it has no estimate, so an
//! absent value can never be confused with a computed one.

use std::borrow::Cow;
use std::collections::HashMap;

use nalgebra::{Point3, Vector3};

use cosmicid_env::{CrtHit, CrtTrack, Event, ParticleCandidate, Track, TrackId};

use crate::config::CosmicIdConfig;
use crate::crt::{apa_crossing_times, build_crt_tracks, CrtTrackParams};
use crate::geometry::{detected_in_tpc, distance_to_line, drift_correct, Tpc, CATHODE_X};

/// A track time [µs], or `None` when the estimator found no match.
pub type T0Estimate = Option<f64>;

/// True when a valid estimate lies outside the beam window. No estimate is
/// never outside.
pub fn outside_beam_window(estimate: T0Estimate, beam_time_limit: f64) -> bool {
    estimate.is_some_and(|time| time.abs() > beam_time_limit)
}

// ============================================================================
// ESTIMATOR SEAM
// ============================================================================

/// Outcome of a successful cathode stitch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StitchMatch {
    /// [µs]
    pub time: f64,
    /// Both far ends of the stitched pair lie outside the fiducial volume
    pub exits_fiducial: bool,
    pub partner: TrackId,
}

/// The T0 sources the classification pipeline consults.
///
/// Implementations must be pure with respect to the track: calling an
/// estimator twice gives the same answer and changes no shared state.
pub trait T0Estimators {
    /// Cathode stitch against tracks of the opposite TPC.
    fn cpa_stitch(&self, track: &Track, tpc: Tpc) -> Option<StitchMatch>;

    /// First T0 attached upstream to the track's candidate.
    fn prior_t0(&self, track: &Track) -> T0Estimate;

    /// Match against reconstructed CRT tracks.
    fn crt_track(&self, track: &Track, tpc: Option<Tpc>) -> T0Estimate;

    /// Match against individual CRT hits.
    fn crt_hit(&self, track: &Track, tpc: Option<Tpc>) -> T0Estimate;

    /// Match against through-going anode-crossing times.
    fn apa_cross(&self, track: &Track, tpc: Option<Tpc>) -> T0Estimate;
}

// ============================================================================
// PER-EVENT INPUTS
// ============================================================================

/// Beam-hypothesis tracks split by drift volume, candidates for stitching.
///
/// A track joins a pool only if its hits vote for that TPC and both its
/// endpoints lie on that side of the cathode.
#[derive(Debug, Default)]
pub struct StitchPools<'a> {
    tpc0: Vec<&'a Track>,
    tpc1: Vec<&'a Track>,
}

impl<'a> StitchPools<'a> {
    pub fn build(tracks: impl IntoIterator<Item = &'a Track>) -> Self {
        let mut pools = Self::default();
        for track in tracks {
            let (start_x, end_x) = (track.start().x, track.end().x);
            match detected_in_tpc(&track.hits) {
                Some(Tpc::Zero) if start_x <= CATHODE_X && end_x <= CATHODE_X => pools.tpc0.push(track),
                Some(Tpc::One) if start_x >= CATHODE_X && end_x >= CATHODE_X => pools.tpc1.push(track),
                _ => {}
            }
        }
        pools
    }

    pub fn pool(&self, tpc: Tpc) -> &[&'a Track] {
        match tpc {
            Tpc::Zero => &self.tpc0,
            Tpc::One => &self.tpc1,
        }
    }
}

/// T0s [µs] attached to candidates, keyed by the candidates' tracks.
#[derive(Debug, Clone, Default)]
pub struct PriorT0Map {
    times: HashMap<TrackId, Vec<f64>>,
}

impl PriorT0Map {
    pub fn from_candidates(candidates: &[ParticleCandidate]) -> Self {
        let mut times: HashMap<TrackId, Vec<f64>> = HashMap::new();
        for candidate in candidates {
            for &track in &candidate.tracks {
                times
                    .entry(track)
                    .or_default()
                    .extend(candidate.t0s_ns.iter().map(|t| t * 1e-3));
            }
        }
        Self { times }
    }

    pub fn first(&self, track: TrackId) -> T0Estimate {
        self.times.get(&track).and_then(|times| times.first().copied())
    }
}

/// The production estimator set, bound to one event.
pub struct EventEstimators<'a> {
    config: &'a CosmicIdConfig,
    pools: StitchPools<'a>,
    crt_tracks: Cow<'a, [CrtTrack]>,
    crt_hits: &'a [CrtHit],
    crossing_times: Vec<f64>,
    prior_t0s: PriorT0Map,
}

impl<'a> EventEstimators<'a> {
    /// Prepares the per-event inputs. CRT tracks are built from hits when
    /// the event carries none.
    pub fn new(config: &'a CosmicIdConfig, event: &'a Event, beam_tracks: &[&'a Track]) -> Self {
        let crt_hits = event.crt_hits();
        let crt_tracks = match event.crt_tracks() {
            Some(tracks) => Cow::Borrowed(tracks),
            None => Cow::Owned(build_crt_tracks(crt_hits, &CrtTrackParams::from_config(config))),
        };
        let crossing_times = apa_crossing_times(&crt_tracks, &config.active_volume);
        let prior_t0s = event
            .candidates
            .as_deref()
            .map(PriorT0Map::from_candidates)
            .unwrap_or_default();

        Self {
            config,
            pools: StitchPools::build(beam_tracks.iter().copied()),
            crt_tracks,
            crt_hits,
            crossing_times,
            prior_t0s,
        }
    }

    pub fn crt_tracks(&self) -> &[CrtTrack] {
        &self.crt_tracks
    }

    pub fn crossing_times(&self) -> &[f64] {
        &self.crossing_times
    }
}

impl T0Estimators for EventEstimators<'_> {
    fn cpa_stitch(&self, track: &Track, tpc: Tpc) -> Option<StitchMatch> {
        t0_from_cpa_stitching(track, self.pools.pool(tpc.opposite()), self.config)
    }

    fn prior_t0(&self, track: &Track) -> T0Estimate {
        self.prior_t0s.first(track.id)
    }

    fn crt_track(&self, track: &Track, tpc: Option<Tpc>) -> T0Estimate {
        t0_from_crt_tracks(track, &self.crt_tracks, tpc, self.config)
    }

    fn crt_hit(&self, track: &Track, tpc: Option<Tpc>) -> T0Estimate {
        t0_from_crt_hits(track, self.crt_hits, tpc, self.config)
    }

    fn apa_cross(&self, track: &Track, tpc: Option<Tpc>) -> T0Estimate {
        t0_from_apa_cross(track, &self.crossing_times, tpc, self.config)
    }
}

// ============================================================================
// CPA STITCHING
// ============================================================================

/// The endpoint nearest the cathode, the far endpoint, and the direction
/// at the near end.
fn cathode_side(track: &Track) -> (Point3<f64>, Point3<f64>, Vector3<f64>) {
    let (start, end) = (track.start(), track.end());
    if end.x.abs() < start.x.abs() {
        (end, start, track.end_direction())
    } else {
        (start, end, track.vertex_direction())
    }
}

/// Pairs `track` with the best-aligned piece in `pool` across the cathode.
///
/// Both pieces are displaced from the cathode by the same drift offset, so
/// their closest approaches must agree within `cpa_x_difference`; projected
/// onto the cathode plane their near ends must meet within
/// `cpa_stitch_distance` and their directions agree within
/// `cpa_stitch_angle` degrees. The best candidate has the largest |cos|.
pub fn t0_from_cpa_stitching(track: &Track, pool: &[&Track], config: &CosmicIdConfig) -> Option<StitchMatch> {
    let (near1, far1, dir1) = cathode_side(track);
    let closest1 = near1.x.abs();
    let min_cos = config.cpa_stitch_angle.to_radians().cos();
    let volume = &config.active_volume;

    pool.iter()
        .filter(|other| other.id != track.id)
        .filter_map(|other| {
            let (near2, far2, dir2) = cathode_side(other);
            let closest2 = near2.x.abs();
            if (closest1 - closest2).abs() >= config.cpa_x_difference {
                return None;
            }

            let cos = dir1.dot(&dir2).abs();
            let gap = ((near1.y - near2.y).powi(2) + (near1.z - near2.z).powi(2)).sqrt();
            if gap >= config.cpa_stitch_distance || cos <= min_cos {
                return None;
            }

            let exits_fiducial = !volume.in_fiducial(&far1, config.fiducial, config.fiducial_top)
                && !volume.in_fiducial(&far2, config.fiducial, config.fiducial_top);
            let shift = 0.5 * (closest1 + closest2);

            Some((
                cos,
                StitchMatch {
                    time: shift / config.drift_velocity,
                    exits_fiducial,
                    partner: other.id,
                },
            ))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, stitch)| stitch)
}

// ============================================================================
// CRT TRACK MATCHING
// ============================================================================

/// Time of the CRT track that best matches `track` once the track is
/// drift-corrected to that time.
pub fn t0_from_crt_tracks(
    track: &Track,
    crt_tracks: &[CrtTrack],
    tpc: Option<Tpc>,
    config: &CosmicIdConfig,
) -> T0Estimate {
    let (start, end) = (track.start(), track.end());
    if (end - start).norm() <= f64::EPSILON {
        return None;
    }

    let mut best: Option<(f64, f64)> = None;
    for crt in crt_tracks {
        let crt_dir = crt.end - crt.start;
        if crt_dir.norm() <= f64::EPSILON {
            continue;
        }
        let time = crt.time_ns * 1e-3;
        let shifted_start = drift_correct(&start, tpc, time, config.drift_velocity);
        let shifted_end = drift_correct(&end, tpc, time, config.drift_velocity);
        if !stays_in_tpc(&[shifted_start, shifted_end], tpc) {
            continue;
        }

        let mut angle = crt_dir.angle(&(shifted_end - shifted_start));
        if angle > std::f64::consts::FRAC_PI_2 {
            angle = std::f64::consts::PI - angle;
        }
        let dca = 0.5
            * (distance_to_line(&shifted_start, &crt.start, &crt.end)
                + distance_to_line(&shifted_end, &crt.start, &crt.end));

        let closer = best.map_or(true, |(best_dca, _)| dca < best_dca);
        if angle < config.max_angle_diff && dca < config.max_distance && closer {
            best = Some((dca, time));
        }
    }

    best.map(|(_, time)| time)
}

/// A drift-corrected track may not cross the cathode.
fn stays_in_tpc(points: &[Point3<f64>], tpc: Option<Tpc>) -> bool {
    match tpc {
        Some(Tpc::Zero) => points.iter().all(|p| p.x <= CATHODE_X),
        Some(Tpc::One) => points.iter().all(|p| p.x >= CATHODE_X),
        None => true,
    }
}

// ============================================================================
// CRT HIT MATCHING
// ============================================================================

/// Time of the CRT hit closest to either extrapolated end of `track`.
pub fn t0_from_crt_hits(track: &Track, crt_hits: &[CrtHit], tpc: Option<Tpc>, config: &CosmicIdConfig) -> T0Estimate {
    if track.length() < config.min_track_length || track.trajectory.len() < 2 {
        return None;
    }

    let points = &track.trajectory;
    let last = points.len() - 1;
    let span = ((last as f64 * config.track_direction_frac).ceil() as usize).clamp(1, last);
    let start = points[0];
    let end = points[last];
    let start_dir = points[span] - start;
    let end_dir = points[last - span] - end;

    let mut best: Option<(f64, f64)> = None;
    for hit in crt_hits {
        let time = hit.time_ns * 1e-3;
        let shifted_start = drift_correct(&start, tpc, time, config.drift_velocity);
        let shifted_end = drift_correct(&end, tpc, time, config.drift_velocity);

        let dca = distance_to_line(&hit.position, &shifted_start, &(shifted_start + start_dir))
            .min(distance_to_line(&hit.position, &shifted_end, &(shifted_end + end_dir)));

        if best.map_or(true, |(best_dca, _)| dca < best_dca) {
            best = Some((dca, time));
        }
    }

    best.filter(|&(dca, _)| dca < config.distance_limit)
        .map(|(_, time)| time)
}

// ============================================================================
// APA CROSSING
// ============================================================================

/// Matches a track that reaches the anode once shifted by one of the
/// through-going `crossing_times` [µs].
///
/// The near end must land within `apa_distance` of the anode plane and the
/// far end must sit more than `fiducial` inside it. The closest landing
/// wins. Needs a known TPC.
pub fn t0_from_apa_cross(
    track: &Track,
    crossing_times: &[f64],
    tpc: Option<Tpc>,
    config: &CosmicIdConfig,
) -> T0Estimate {
    let tpc = tpc?;
    let anode = config.active_volume.anode_x(tpc);
    let inward = -tpc.anode_sign();

    let mut best: Option<(f64, f64)> = None;
    for &time in crossing_times {
        if time.abs() > config.max_drift_time {
            continue;
        }
        let start = drift_correct(&track.start(), Some(tpc), time, config.drift_velocity);
        let end = drift_correct(&track.end(), Some(tpc), time, config.drift_velocity);

        // Signed depth inside the drift volume, measured from the anode.
        let start_depth = (start.x - anode) * inward;
        let end_depth = (end.x - anode) * inward;
        let (near, far) = if start_depth.abs() < end_depth.abs() {
            (start_depth, end_depth)
        } else {
            (end_depth, start_depth)
        };

        let closer = best.map_or(true, |(best_near, _)| near.abs() < best_near);
        if near.abs() < config.apa_distance && far > config.fiducial && closer {
            best = Some((near.abs(), time));
        }
    }

    best.map(|(_, time)| time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cosmicid_env::{CrtTagger, EventId, Hit};
    use proptest::prelude::*;

    fn hits(tpc: usize, n: usize) -> Vec<Hit> {
        (0..n)
            .map(|i| Hit {
                tpc,
                peak_time: i as f64,
                deposits: vec![],
            })
            .collect()
    }

    fn line_track(id: TrackId, from: Point3<f64>, to: Point3<f64>, tpc: usize) -> Track {
        let steps = 20;
        Track {
            id,
            trajectory: (0..=steps)
                .map(|i| from + (to - from) * (i as f64 / steps as f64))
                .collect(),
            hits: hits(tpc, 10),
            calorimetry: vec![],
        }
    }

    #[test]
    fn test_outside_beam_window() {
        assert!(!outside_beam_window(None, 2.0));
        assert!(!outside_beam_window(Some(1.5), 2.0));
        assert!(!outside_beam_window(Some(-2.0), 2.0));
        assert!(outside_beam_window(Some(-2.5), 2.0));
        assert!(outside_beam_window(Some(-99999.0), 2.0));
    }

    #[test]
    fn test_stitch_pools_require_consistent_side() {
        let left = line_track(1, Point3::new(-150.0, 0.0, 100.0), Point3::new(-20.0, 0.0, 100.0), 0);
        let right = line_track(2, Point3::new(20.0, 0.0, 100.0), Point3::new(150.0, 0.0, 100.0), 1);
        let straddling = line_track(3, Point3::new(-20.0, 0.0, 100.0), Point3::new(20.0, 0.0, 100.0), 0);

        let tracks = [left, right, straddling];
        let pools = StitchPools::build(tracks.iter());

        assert_eq!(pools.pool(Tpc::Zero).len(), 1);
        assert_eq!(pools.pool(Tpc::One).len(), 1);
        assert_eq!(pools.pool(Tpc::One)[0].id, 2);
    }

    #[test]
    fn test_cpa_stitch_matches_aligned_pieces() {
        let config = CosmicIdConfig::default();
        // A line through the cathode at (0, 0, 250), each piece pulled
        // 15.65 cm away from the cathode (100 µs of drift).
        let gap = 100.0 * config.drift_velocity;
        let left = line_track(1, Point3::new(-150.0, 150.0, 100.0), Point3::new(-gap, 0.0, 250.0), 0);
        let right = line_track(2, Point3::new(gap, 0.0, 250.0), Point3::new(150.0, -150.0, 400.0), 1);

        let stitch = t0_from_cpa_stitching(&left, &[&right], &config).unwrap();
        assert_relative_eq!(stitch.time, 100.0, epsilon = 1e-9);
        assert_eq!(stitch.partner, 2);
        assert!(!stitch.exits_fiducial);
    }

    #[test]
    fn test_cpa_stitch_exit_flag() {
        let config = CosmicIdConfig::default();
        let left = line_track(1, Point3::new(-150.0, 200.0, 100.0), Point3::new(-5.0, 0.0, 250.0), 0);
        let right = line_track(2, Point3::new(5.0, 0.0, 250.0), Point3::new(150.0, -200.0, 400.0), 1);

        let stitch = t0_from_cpa_stitching(&left, &[&right], &config).unwrap();
        assert!(stitch.exits_fiducial);
    }

    #[test]
    fn test_cpa_stitch_rejects_misaligned() {
        let config = CosmicIdConfig::default();
        let left = line_track(1, Point3::new(-150.0, 0.0, 250.0), Point3::new(-5.0, 0.0, 250.0), 0);
        let perpendicular = line_track(2, Point3::new(5.0, 0.0, 250.0), Point3::new(5.0, 150.0, 250.0), 1);
        let far_away = line_track(3, Point3::new(5.0, 100.0, 250.0), Point3::new(150.0, 100.0, 250.0), 1);
        let different_gap = line_track(4, Point3::new(60.0, 0.0, 250.0), Point3::new(150.0, 0.0, 250.0), 1);

        assert!(t0_from_cpa_stitching(&left, &[&perpendicular, &far_away, &different_gap], &config).is_none());
    }

    #[test]
    fn test_crt_track_match_with_drift_correction() {
        let config = CosmicIdConfig::default();
        let time_us = 200.0;
        let shift = time_us * config.drift_velocity;
        // True line x = -100; reconstructed 31.3 cm closer to the cathode.
        let track = line_track(1, Point3::new(-100.0 + shift, 150.0, 250.0), Point3::new(-100.0 + shift, -150.0, 250.0), 0);
        let crt = CrtTrack {
            start: Point3::new(-100.0, 360.0, 250.0),
            end: Point3::new(-100.0, -360.0, 250.0),
            time_ns: time_us * 1e3,
            complete: true,
        };

        let t0 = t0_from_crt_tracks(&track, &[crt.clone()], Some(Tpc::Zero), &config).unwrap();
        assert_relative_eq!(t0, 200.0, epsilon = 1e-9);

        // Without the correction the track sits 31 cm off the CRT line.
        let strict = CosmicIdConfig {
            max_distance: 10.0,
            ..config.clone()
        };
        assert!(t0_from_crt_tracks(&track, &[crt], None, &strict).is_none());
    }

    #[test]
    fn test_crt_track_angle_cut() {
        let config = CosmicIdConfig::default();
        let track = line_track(1, Point3::new(-100.0, 150.0, 250.0), Point3::new(-100.0, -150.0, 250.0), 0);
        let tilted = CrtTrack {
            start: Point3::new(-100.0, 360.0, 150.0),
            end: Point3::new(-100.0, -360.0, 350.0),
            time_ns: 0.0,
            complete: true,
        };
        assert!(t0_from_crt_tracks(&track, &[tilted], Some(Tpc::Zero), &config).is_none());
    }

    #[test]
    fn test_crt_hit_match() {
        let config = CosmicIdConfig::default();
        let track = line_track(1, Point3::new(-100.0, 150.0, 250.0), Point3::new(-100.0, -150.0, 250.0), 0);
        let on_line = CrtHit {
            tagger: CrtTagger::TopLow,
            position: Point3::new(-100.0, 360.0, 252.0),
            time_ns: 0.0,
            pe: 60.0,
        };
        let off_line = CrtHit {
            tagger: CrtTagger::West,
            position: Point3::new(-300.0, 0.0, 600.0),
            time_ns: 900_000.0,
            pe: 60.0,
        };

        let t0 = t0_from_crt_hits(&track, &[off_line.clone(), on_line], Some(Tpc::Zero), &config).unwrap();
        assert_relative_eq!(t0, 0.0);
        assert!(t0_from_crt_hits(&track, &[off_line], Some(Tpc::Zero), &config).is_none());
    }

    #[test]
    fn test_crt_hit_requires_min_length() {
        let config = CosmicIdConfig::default();
        let short = line_track(1, Point3::new(-100.0, 0.0, 250.0), Point3::new(-100.0, -5.0, 250.0), 0);
        let hit = CrtHit {
            tagger: CrtTagger::Bottom,
            position: Point3::new(-100.0, -360.0, 250.0),
            time_ns: 0.0,
            pe: 60.0,
        };
        assert!(t0_from_crt_hits(&short, &[hit], Some(Tpc::Zero), &config).is_none());
    }

    #[test]
    fn test_apa_cross_match() {
        let config = CosmicIdConfig::default();
        let time_us = 300.0;
        let shift = time_us * config.drift_velocity;
        // Crosses the TPC 0 anode at x = -200; reconstructed 46.95 cm inward.
        let track = line_track(1, Point3::new(-200.0 + shift, 0.0, 250.0), Point3::new(-80.0 + shift, -50.0, 250.0), 0);

        let t0 = t0_from_apa_cross(&track, &[50.0, time_us, 5000.0], Some(Tpc::Zero), &config).unwrap();
        assert_relative_eq!(t0, time_us);
        assert!(t0_from_apa_cross(&track, &[time_us], None, &config).is_none());
    }

    #[test]
    fn test_prior_t0_map_converts_to_us() {
        let candidates = vec![ParticleCandidate {
            id: 3,
            parent: None,
            daughters: vec![],
            pdg: 13,
            tracks: vec![7],
            showers: vec![],
            t0s_ns: vec![1500.0, 9000.0],
            metadata: Default::default(),
        }];
        let map = PriorT0Map::from_candidates(&candidates);
        assert_relative_eq!(map.first(7).unwrap(), 1.5, epsilon = 1e-12);
        assert_eq!(map.first(8), None);
    }

    #[test]
    fn test_event_estimators_build_crt_tracks_from_hits() {
        let config = CosmicIdConfig::default();
        let mut event = Event::new(EventId::new(1, 0, 1));
        event.crt_hits = Some(vec![
            CrtHit {
                tagger: CrtTagger::West,
                position: Point3::new(-300.0, 100.0, 250.0),
                time_ns: 10_000.0,
                pe: 60.0,
            },
            CrtHit {
                tagger: CrtTagger::East,
                position: Point3::new(300.0, -100.0, 250.0),
                time_ns: 10_010.0,
                pe: 60.0,
            },
        ]);

        let estimators = EventEstimators::new(&config, &event, &[]);
        assert_eq!(estimators.crt_tracks().len(), 1);
        assert_eq!(estimators.crossing_times().len(), 1);
        assert_relative_eq!(estimators.crossing_times()[0], 10.005, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn prop_valid_time_never_reads_as_absent(
            time in prop_oneof![
                -1.0e6f64..1.0e6,
                -100_000.0f64..-99_998.0,
                prop::num::f64::NORMAL,
            ],
            limit in 0.1f64..1.0e4,
        ) {
            // A computed time is judged on its magnitude alone, even one
            // sitting right at -99999.
            prop_assert_eq!(outside_beam_window(Some(time), limit), time.abs() > limit);
            prop_assert!(!outside_beam_window(None, limit));
        }
    }
}
