//! Per-event analysis driver.
//!
//! Wires the partitioner, truth index, estimators, classifier and scorer
//! together for one event at a time:
//!
//! ```text
//! candidates ─► partition ─► beam tracks ──► classify ─► beam_post
//!                   │             │
//!                   │             └──────────────────► beam_pre
//!                   └─────────► cosmic tracks ───────► cosmic_pre
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let analyzer = CosmicRemovalAnalyzer::new(config)?;
//! let mut counters = ConfusionCounters::new();
//!
//! analyzer.begin_job(&mut counters);
//! while let Some(Ok(event)) = source.next_event() {
//!     analyzer.analyze(&event, &mut counters);
//! }
//! println!("{}", analyzer.end_job(&counters));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use cosmicid_env::{EnvError, Event, EventId, ParticleCandidate, TrackId};

use crate::config::{ConfigError, CosmicIdConfig};
use crate::hierarchy::{candidate_map, collect_tracks_and_showers, partition_final_states, Diagnostic};
use crate::pipeline::{CosmicClassifier, Verdict};
use crate::scoring::{ConfusionCounters, ScoreReport};
use crate::t0::EventEstimators;
use crate::truth::{TruthIndex, TruthLabel};

/// Errors surfaced by the analysis layer.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Decision and truth label for one beam-hypothesis track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackVerdict {
    pub track: TrackId,
    pub verdict: Verdict,
    pub label: TruthLabel,
}

/// What one processed event contributed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: EventId,
    pub cosmic_candidates: usize,
    pub cosmic_tracks: usize,
    pub cosmic_showers: usize,
    pub beam_candidates: usize,
    pub beam_tracks: usize,
    pub beam_showers: usize,
    pub verdicts: Vec<TrackVerdict>,
    pub diagnostics: Vec<Diagnostic>,
}

impl EventSummary {
    pub fn kept(&self) -> usize {
        self.verdicts.iter().filter(|v| v.verdict.is_kept()).count()
    }
}

/// Result of [`CosmicRemovalAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// A required product was missing; the counters were not touched.
    Skipped { id: EventId, reason: String },
    Processed(EventSummary),
}

impl EventOutcome {
    pub fn summary(&self) -> Option<&EventSummary> {
        match self {
            EventOutcome::Processed(summary) => Some(summary),
            EventOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, EventOutcome::Skipped { .. })
    }
}

/// Runs cosmic removal and scores it against truth.
///
/// Holds only immutable configuration; all accumulated state lives in the
/// caller's [`ConfusionCounters`].
#[derive(Debug, Clone)]
pub struct CosmicRemovalAnalyzer {
    classifier: CosmicClassifier,
}

impl CosmicRemovalAnalyzer {
    pub fn new(config: CosmicIdConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            classifier: CosmicClassifier::new(config),
        })
    }

    pub fn config(&self) -> &CosmicIdConfig {
        self.classifier.config()
    }

    pub fn classifier(&self) -> &CosmicClassifier {
        &self.classifier
    }

    pub fn begin_job(&self, counters: &mut ConfusionCounters) {
        if self.config().verbose {
            info!("----------------- Cosmic Removal Analysis -------------------");
        }
        counters.reset();
    }

    /// Processes one event. Counters change only if the event is processed
    /// in full.
    pub fn analyze(&self, event: &Event, counters: &mut ConfusionCounters) -> EventOutcome {
        if self.config().verbose {
            debug!("Run = {}, SubRun = {}, Event = {}", event.id.run, event.id.subrun, event.id.event);
        }

        let mut delta = ConfusionCounters::new();
        match self.process(event, &mut delta) {
            Ok(summary) => {
                delta.events_processed = 1;
                counters.merge(&delta);
                EventOutcome::Processed(summary)
            }
            Err(e) => {
                warn!("Skipping {}: {}", event.id, e);
                counters.events_skipped += 1;
                EventOutcome::Skipped {
                    id: event.id,
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn end_job(&self, counters: &ConfusionCounters) -> ScoreReport {
        let report = counters.report();
        info!("End of job:\n{}", report);
        report
    }

    fn process(&self, event: &Event, delta: &mut ConfusionCounters) -> Result<EventSummary, AnalysisError> {
        let config = self.config();

        // Required products, fetched up front so a missing one leaves no
        // partial counts behind.
        let candidates = event.candidates()?;
        let particles = event.particles()?;
        event.tracks()?;

        if config.verbose {
            dump_metadata(candidates);
        }

        let mut diagnostics = Vec::new();
        let map = candidate_map(candidates, &mut diagnostics);
        let states = partition_final_states(&map, &mut diagnostics);
        let beam = collect_tracks_and_showers(&states.beam, event, &mut diagnostics);
        let cosmic = collect_tracks_and_showers(&states.cosmic, event, &mut diagnostics);

        info!(
            "{}: {} cosmic primaries ({} track-like, {} shower-like), {} neutrino final states ({} track-like, {} shower-like)",
            event.id,
            states.cosmic.len(),
            cosmic.tracks.len(),
            cosmic.showers.len(),
            states.beam.len(),
            beam.tracks.len(),
            beam.showers.len()
        );

        let truth = TruthIndex::build(particles, &config.active_volume);
        delta.true_muons += truth.true_muons() as u64;
        if config.verbose {
            debug!("Number of true particles = {}", truth.len());
        }

        for track in &cosmic.tracks {
            delta.cosmic_pre.record(truth.label(&track.hits));
        }

        let estimators = EventEstimators::new(config, event, &beam.tracks);
        let mut verdicts = Vec::with_capacity(beam.tracks.len());

        for track in &beam.tracks {
            let label = truth.label(&track.hits);
            if config.verbose && label == TruthLabel::Unmatched {
                debug!("Track {} has no true particle", track.id);
            }
            delta.beam_pre.record(label);

            let verdict = self.classifier.classify(track, &estimators);
            if verdict.is_kept() {
                delta.beam_post.record(label);
            }
            verdicts.push(TrackVerdict {
                track: track.id,
                verdict,
                label,
            });
        }

        Ok(EventSummary {
            id: event.id,
            cosmic_candidates: states.cosmic.len(),
            cosmic_tracks: cosmic.tracks.len(),
            cosmic_showers: cosmic.showers.len(),
            beam_candidates: states.beam.len(),
            beam_tracks: beam.tracks.len(),
            beam_showers: beam.showers.len(),
            verdicts,
            diagnostics,
        })
    }
}

fn dump_metadata(candidates: &[ParticleCandidate]) {
    for candidate in candidates.iter().filter(|c| !c.metadata.is_empty()) {
        debug!("Candidate {} with:", candidate.id);
        for (key, value) in &candidate.metadata {
            debug!("  - {} = {}", key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Cut;
    use cosmicid_env::{EnergyDeposit, Hit, Origin, Track, TrueParticle};
    use nalgebra::Point3;

    fn hits(tpc: usize, particle: i32) -> Vec<Hit> {
        (0..8)
            .map(|i| Hit {
                tpc,
                peak_time: i as f64,
                deposits: vec![EnergyDeposit {
                    track_id: particle,
                    energy: 1.0,
                }],
            })
            .collect()
    }

    fn candidate(id: usize, parent: Option<usize>, pdg: i32, tracks: Vec<TrackId>) -> ParticleCandidate {
        ParticleCandidate {
            id,
            parent,
            daughters: vec![],
            pdg,
            tracks,
            showers: vec![],
            t0s_ns: vec![],
            metadata: Default::default(),
        }
    }

    fn particle(track_id: i32, pdg: i32, origin: Origin) -> TrueParticle {
        let vertex = Point3::new(-100.0, 0.0, 150.0);
        TrueParticle {
            track_id,
            mother: 0,
            pdg,
            origin,
            start: vertex,
            end: vertex,
            time_ns: 0.0,
            trajectory_length: 0.0,
            neutrino_vertex: (origin == Origin::BeamNeutrino).then_some(vertex),
        }
    }

    /// One neutrino with a contained muon (kept) and a through-going track
    /// from a cosmic (rejected by the fiducial cut), plus one clear cosmic.
    fn event() -> Event {
        let mut neutrino = candidate(0, None, 14, vec![]);
        neutrino.daughters = vec![1, 2];

        let mut event = Event::new(EventId::new(1, 2, 3));
        event.candidates = Some(vec![
            neutrino,
            candidate(1, Some(0), 13, vec![10]),
            candidate(2, Some(0), 211, vec![11]),
            candidate(3, None, 13, vec![12]),
        ]);
        event.tracks = Some(vec![
            Track {
                id: 10,
                trajectory: vec![Point3::new(-100.0, 0.0, 150.0), Point3::new(-60.0, 20.0, 250.0)],
                hits: hits(0, 1),
                calorimetry: vec![],
            },
            Track {
                id: 11,
                trajectory: vec![Point3::new(-100.0, 199.0, 150.0), Point3::new(-100.0, -199.0, 150.0)],
                hits: hits(0, 2),
                calorimetry: vec![],
            },
            Track {
                id: 12,
                trajectory: vec![Point3::new(100.0, 199.0, 300.0), Point3::new(100.0, -199.0, 300.0)],
                hits: hits(1, 2),
                calorimetry: vec![],
            },
        ]);
        event.particles = Some(vec![
            particle(1, 13, Origin::BeamNeutrino),
            particle(2, 13, Origin::Cosmic),
        ]);
        event
    }

    fn analyzer() -> CosmicRemovalAnalyzer {
        CosmicRemovalAnalyzer::new(CosmicIdConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CosmicIdConfig {
            drift_velocity: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            CosmicRemovalAnalyzer::new(config),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn test_analyze_event() {
        let analyzer = analyzer();
        let mut counters = ConfusionCounters::new();
        analyzer.begin_job(&mut counters);

        let outcome = analyzer.analyze(&event(), &mut counters);
        let summary = outcome.summary().unwrap();

        assert_eq!(summary.beam_tracks, 2);
        assert_eq!(summary.cosmic_tracks, 1);
        assert_eq!(summary.kept(), 1);
        assert_eq!(summary.verdicts[0].verdict, Verdict::Kept);
        assert_eq!(summary.verdicts[0].label, TruthLabel::BeamLepton);
        assert_eq!(summary.verdicts[1].verdict, Verdict::Rejected(Cut::Fiducial));
        assert_eq!(summary.verdicts[1].label, TruthLabel::Cosmic);

        assert_eq!(counters.true_muons, 1);
        assert_eq!(counters.beam_pre.total, 2);
        assert_eq!(counters.beam_pre.beam, 1);
        assert_eq!(counters.beam_pre.muon, 1);
        assert_eq!(counters.beam_pre.cosmic, 1);
        assert_eq!(counters.beam_post.total, 1);
        assert_eq!(counters.beam_post.muon, 1);
        assert_eq!(counters.beam_post.cosmic, 0);
        assert_eq!(counters.cosmic_pre.cosmic, 1);
        assert_eq!(counters.events_processed, 1);
    }

    #[test]
    fn test_missing_candidates_skips_event() {
        let analyzer = analyzer();
        let mut counters = ConfusionCounters::new();
        let mut event = event();
        event.candidates = None;

        let outcome = analyzer.analyze(&event, &mut counters);
        assert!(outcome.is_skipped());
        assert_eq!(counters.beam_pre, Default::default());
        assert_eq!(counters.true_muons, 0);
        assert_eq!(counters.events_skipped, 1);
    }

    #[test]
    fn test_missing_tracks_skips_event() {
        let analyzer = analyzer();
        let mut counters = ConfusionCounters::new();
        let mut event = event();
        event.tracks = None;

        assert!(analyzer.analyze(&event, &mut counters).is_skipped());
        assert_eq!(counters.events_processed, 0);
        assert_eq!(counters.cosmic_pre, Default::default());
    }

    #[test]
    fn test_diagnostics_do_not_skip() {
        let analyzer = analyzer();
        let mut counters = ConfusionCounters::new();
        let mut event = event();
        if let Some(candidates) = event.candidates.as_mut() {
            candidates[0].daughters.push(77);
        }

        let outcome = analyzer.analyze(&event, &mut counters);
        let summary = outcome.summary().unwrap();
        assert_eq!(
            summary.diagnostics,
            vec![Diagnostic::UnresolvedDaughter { parent: 0, daughter: 77 }]
        );
        assert_eq!(counters.beam_pre.total, 2);
    }

    #[test]
    fn test_shared_track_is_classified_once() {
        let analyzer = analyzer();
        let mut counters = ConfusionCounters::new();
        let mut event = event();
        if let Some(candidates) = event.candidates.as_mut() {
            candidates[0].daughters = vec![1, 1, 2];
            candidates[2].tracks = vec![10];
        }

        let outcome = analyzer.analyze(&event, &mut counters);
        let summary = outcome.summary().unwrap();

        assert_eq!(summary.verdicts.len(), 1);
        assert_eq!(summary.verdicts[0].track, 10);
        assert_eq!(
            summary.diagnostics,
            vec![
                Diagnostic::DuplicateDaughter { parent: 0, daughter: 1 },
                Diagnostic::DuplicateTrack { candidate: 2, track: 10 },
            ]
        );
        assert_eq!(counters.beam_pre.total, 1);
        assert_eq!(counters.beam_post.total, 1);
        assert_eq!(counters.cosmic_pre.total, 1);
    }

    #[test]
    fn test_end_job_report() {
        let analyzer = analyzer();
        let mut counters = ConfusionCounters::new();
        analyzer.begin_job(&mut counters);
        analyzer.analyze(&event(), &mut counters);
        analyzer.analyze(&event(), &mut counters);

        let report = analyzer.end_job(&counters);
        assert_eq!(report.beam_pre.total, 4);
        assert_eq!(report.events_processed, 2);
        assert_eq!(report.beam_efficiency(), Some(1.0));
    }
}
