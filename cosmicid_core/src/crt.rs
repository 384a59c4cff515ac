//! CRT track building and through-going anode-crossing times.

use std::collections::BTreeMap;

use nalgebra::Point3;

use cosmicid_env::{CrtHit, CrtTagger, CrtTrack};

use crate::config::CosmicIdConfig;
use crate::geometry::{distance_to_line, ActiveVolume};

/// Parameters of the CRT track builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrtTrackParams {
    /// [µs]
    pub time_limit: f64,
    pub average_limit: f64,
    pub use_top_plane: bool,
    pub distance_limit: f64,
}

impl CrtTrackParams {
    pub fn from_config(config: &CosmicIdConfig) -> Self {
        Self {
            time_limit: config.crt_time_limit,
            average_limit: config.crt_average_limit,
            use_top_plane: config.crt_use_top_plane,
            distance_limit: config.crt_distance_limit,
        }
    }
}

/// A hit (or the average of nearby hits) on one tagger.
#[derive(Debug, Clone, Copy)]
struct TaggerPoint {
    tagger: CrtTagger,
    position: Point3<f64>,
    time_ns: f64,
}

/// Builds straight CRT tracks from individual tagger hits.
///
/// 1. Hits within `time_limit` of the first hit of a group form one crossing
/// 2. Same-tagger hits within `average_limit` are averaged
/// 3. Averaged points on different taggers are joined pairwise
/// 4. Candidates lying along an already accepted, longer track are dropped
pub fn build_crt_tracks(hits: &[CrtHit], params: &CrtTrackParams) -> Vec<CrtTrack> {
    let mut sorted: Vec<&CrtHit> = hits
        .iter()
        .filter(|hit| params.use_top_plane || !hit.tagger.is_top())
        .collect();
    sorted.sort_by(|a, b| a.time_ns.total_cmp(&b.time_ns));

    let time_limit_ns = params.time_limit * 1e3;
    let mut tracks = Vec::new();

    let mut group_start = 0;
    while group_start < sorted.len() {
        let t0 = sorted[group_start].time_ns;
        let group_end = sorted[group_start..]
            .iter()
            .position(|hit| hit.time_ns - t0 > time_limit_ns)
            .map_or(sorted.len(), |offset| group_start + offset);

        let points = average_hits(&sorted[group_start..group_end], params.average_limit);
        tracks.extend(join_points(&points, params.distance_limit));

        group_start = group_end;
    }

    tracks
}

/// Averages same-tagger hits that lie within `average_limit` of a seed hit.
fn average_hits(hits: &[&CrtHit], average_limit: f64) -> Vec<TaggerPoint> {
    let mut by_tagger: BTreeMap<CrtTagger, Vec<&CrtHit>> = BTreeMap::new();
    for hit in hits {
        by_tagger.entry(hit.tagger).or_default().push(*hit);
    }

    let mut points = Vec::new();
    for (tagger, tagger_hits) in by_tagger {
        let mut used = vec![false; tagger_hits.len()];
        for seed in 0..tagger_hits.len() {
            if used[seed] {
                continue;
            }
            let mut sum = tagger_hits[seed].position.coords;
            let mut time = tagger_hits[seed].time_ns;
            let mut count = 1.0;
            used[seed] = true;

            for other in (seed + 1)..tagger_hits.len() {
                if !used[other]
                    && (tagger_hits[other].position - tagger_hits[seed].position).norm() < average_limit
                {
                    sum += tagger_hits[other].position.coords;
                    time += tagger_hits[other].time_ns;
                    count += 1.0;
                    used[other] = true;
                }
            }

            points.push(TaggerPoint {
                tagger,
                position: Point3::from(sum / count),
                time_ns: time / count,
            });
        }
    }
    points
}

/// Joins points on different taggers, longest candidates first, skipping
/// any candidate whose endpoints both lie near an accepted track.
fn join_points(points: &[TaggerPoint], distance_limit: f64) -> Vec<CrtTrack> {
    let mut candidates = Vec::new();
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            if a.tagger == b.tagger {
                continue;
            }
            // Start at the higher point so tracks read downward like cosmics.
            let (start, end) = if a.position.y >= b.position.y { (a, b) } else { (b, a) };
            candidates.push(CrtTrack {
                start: start.position,
                end: end.position,
                time_ns: 0.5 * (a.time_ns + b.time_ns),
                complete: true,
            });
        }
    }

    candidates.sort_by(|a, b| {
        let la = (a.end - a.start).norm();
        let lb = (b.end - b.start).norm();
        lb.total_cmp(&la)
    });

    let mut accepted: Vec<CrtTrack> = Vec::new();
    for candidate in candidates {
        let duplicate = accepted.iter().any(|track| {
            distance_to_line(&candidate.start, &track.start, &track.end) < distance_limit
                && distance_to_line(&candidate.end, &track.start, &track.end) < distance_limit
        });
        if !duplicate {
            accepted.push(candidate);
        }
    }
    accepted
}

/// Times [µs] of CRT tracks whose line crosses an anode plane on the
/// active face.
pub fn apa_crossing_times(tracks: &[CrtTrack], volume: &ActiveVolume) -> Vec<f64> {
    tracks
        .iter()
        .filter(|track| {
            let dx = track.end.x - track.start.x;
            if dx.abs() <= f64::EPSILON {
                return false;
            }
            [volume.min.x, volume.max.x].iter().any(|&anode| {
                let s = (anode - track.start.x) / dx;
                let crossing = track.start + (track.end - track.start) * s;
                (0.0..=1.0).contains(&s) && volume.contains_yz(&crossing)
            })
        })
        .map(|track| track.time_ns * 1e-3)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hit(tagger: CrtTagger, x: f64, y: f64, z: f64, time_ns: f64) -> CrtHit {
        CrtHit {
            tagger,
            position: Point3::new(x, y, z),
            time_ns,
            pe: 50.0,
        }
    }

    fn params() -> CrtTrackParams {
        CrtTrackParams::from_config(&CosmicIdConfig::default())
    }

    #[test]
    fn test_two_hits_make_one_track() {
        let hits = vec![
            hit(CrtTagger::Bottom, 10.0, -360.0, 250.0, 1_050.0),
            hit(CrtTagger::TopLow, 0.0, 360.0, 250.0, 1_000.0),
        ];
        let tracks = build_crt_tracks(&hits, &params());

        assert_eq!(tracks.len(), 1);
        assert_relative_eq!(tracks[0].start.y, 360.0);
        assert_relative_eq!(tracks[0].time_ns, 1_025.0);
    }

    #[test]
    fn test_hits_far_apart_in_time_do_not_pair() {
        let hits = vec![
            hit(CrtTagger::TopLow, 0.0, 360.0, 250.0, 0.0),
            hit(CrtTagger::Bottom, 0.0, -360.0, 250.0, 5_000.0),
        ];
        assert!(build_crt_tracks(&hits, &params()).is_empty());
    }

    #[test]
    fn test_same_tagger_hits_are_averaged() {
        let hits = vec![
            hit(CrtTagger::TopLow, 0.0, 360.0, 250.0, 0.0),
            hit(CrtTagger::TopLow, 10.0, 360.0, 250.0, 10.0),
            hit(CrtTagger::Bottom, 0.0, -360.0, 250.0, 20.0),
        ];
        let tracks = build_crt_tracks(&hits, &params());

        assert_eq!(tracks.len(), 1);
        assert_relative_eq!(tracks[0].start.x, 5.0);
    }

    #[test]
    fn test_top_plane_can_be_excluded() {
        let hits = vec![
            hit(CrtTagger::TopLow, 0.0, 360.0, 250.0, 0.0),
            hit(CrtTagger::Bottom, 0.0, -360.0, 250.0, 20.0),
        ];
        let params = CrtTrackParams {
            use_top_plane: false,
            ..params()
        };
        assert!(build_crt_tracks(&hits, &params).is_empty());
    }

    #[test]
    fn test_collinear_triplet_keeps_longest() {
        // Top, side and bottom hits on one straight line: the top-bottom
        // track is kept, the two shorter segments along it are dropped.
        let hits = vec![
            hit(CrtTagger::TopLow, 0.0, 360.0, 250.0, 0.0),
            hit(CrtTagger::West, 0.0, 0.0, 250.0, 10.0),
            hit(CrtTagger::Bottom, 0.0, -360.0, 250.0, 20.0),
        ];
        let tracks = build_crt_tracks(&hits, &params());

        assert_eq!(tracks.len(), 1);
        assert_relative_eq!((tracks[0].end - tracks[0].start).norm(), 720.0);
    }

    #[test]
    fn test_apa_crossing_times() {
        let volume = ActiveVolume::default();
        let crossing = CrtTrack {
            start: Point3::new(-300.0, 100.0, 250.0),
            end: Point3::new(300.0, -100.0, 250.0),
            time_ns: 2_000.0,
            complete: true,
        };
        let vertical = CrtTrack {
            start: Point3::new(0.0, 360.0, 250.0),
            end: Point3::new(0.0, -360.0, 250.0),
            time_ns: 3_000.0,
            complete: true,
        };

        let times = apa_crossing_times(&[crossing, vertical], &volume);
        assert_eq!(times.len(), 1);
        assert_relative_eq!(times[0], 2.0);
    }
}
