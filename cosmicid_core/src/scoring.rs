//! Confusion-matrix bookkeeping.
//!
//! Counts tracks per truth label for three populations: beam-hypothesis
//! tracks before and after the cuts, and cosmic-hypothesis tracks before
//! them. Only aggregates are kept.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::truth::TruthLabel;

/// Track counts per truth label for one population.
///
/// A beam lepton counts toward both `beam` and `muon`, so the label
/// counts do not sum to `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: u64,
    pub beam: u64,
    pub muon: u64,
    pub cosmic: u64,
    pub unmatched: u64,
}

impl Tally {
    pub fn record(&mut self, label: TruthLabel) {
        self.total += 1;
        match label {
            TruthLabel::BeamLepton => {
                self.muon += 1;
                self.beam += 1;
            }
            TruthLabel::BeamNeutrino => self.beam += 1,
            TruthLabel::Cosmic => self.cosmic += 1,
            TruthLabel::Unmatched => self.unmatched += 1,
        }
    }

    pub fn merge(&mut self, other: &Tally) {
        self.total += other.total;
        self.beam += other.beam;
        self.muon += other.muon;
        self.cosmic += other.cosmic;
        self.unmatched += other.unmatched;
    }

    /// Every per-label count of `self` is at most that of `other`.
    pub fn is_subset_of(&self, other: &Tally) -> bool {
        self.total <= other.total
            && self.beam <= other.beam
            && self.muon <= other.muon
            && self.cosmic <= other.cosmic
            && self.unmatched <= other.unmatched
    }
}

/// Job-wide accumulator, passed by `&mut` through the event loop.
///
/// Workers processing events in parallel each keep their own and
/// [`merge`](Self::merge) at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounters {
    /// In-fiducial primary beam muons in the truth record
    pub true_muons: u64,
    /// Beam-hypothesis tracks entering the cuts
    pub beam_pre: Tally,
    /// Beam-hypothesis tracks kept by the cuts
    pub beam_post: Tally,
    /// Cosmic-hypothesis tracks
    pub cosmic_pre: Tally,
    pub events_processed: u64,
    pub events_skipped: u64,
}

impl ConfusionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn merge(&mut self, other: &ConfusionCounters) {
        self.true_muons += other.true_muons;
        self.beam_pre.merge(&other.beam_pre);
        self.beam_post.merge(&other.beam_post);
        self.cosmic_pre.merge(&other.cosmic_pre);
        self.events_processed += other.events_processed;
        self.events_skipped += other.events_skipped;
    }

    pub fn report(&self) -> ScoreReport {
        ScoreReport {
            true_muons: self.true_muons,
            beam_pre: self.beam_pre,
            cosmic_pre: self.cosmic_pre,
            beam_post: self.beam_post,
            events_processed: self.events_processed,
            events_skipped: self.events_skipped,
        }
    }
}

impl From<ScoreReport> for ConfusionCounters {
    fn from(report: ScoreReport) -> Self {
        Self {
            true_muons: report.true_muons,
            beam_pre: report.beam_pre,
            beam_post: report.beam_post,
            cosmic_pre: report.cosmic_pre,
            events_processed: report.events_processed,
            events_skipped: report.events_skipped,
        }
    }
}

/// End-of-job summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub true_muons: u64,
    pub beam_pre: Tally,
    pub cosmic_pre: Tally,
    pub beam_post: Tally,
    pub events_processed: u64,
    pub events_skipped: u64,
}

impl ScoreReport {
    /// Fraction of in-fiducial beam tracks kept by the cuts.
    pub fn beam_efficiency(&self) -> Option<f64> {
        ratio(self.beam_post.beam, self.beam_pre.beam)
    }

    /// Fraction of cosmic-labelled beam-hypothesis tracks the cuts removed.
    pub fn cosmic_rejection(&self) -> Option<f64> {
        ratio(self.beam_pre.cosmic - self.beam_post.cosmic.min(self.beam_pre.cosmic), self.beam_pre.cosmic)
    }
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

const RULE: &str = "-----------------------------------------------------------";

impl fmt::Display for ScoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: [(&str, u64); 16] = [
            ("Beam-hypothesis tracks", self.beam_pre.total),
            ("True beam muons", self.true_muons),
            ("  matched to beam", self.beam_pre.beam),
            ("  matched to beam muon", self.beam_pre.muon),
            ("  matched to cosmic", self.beam_pre.cosmic),
            ("  unmatched", self.beam_pre.unmatched),
            ("Cosmic-hypothesis tracks", self.cosmic_pre.total),
            ("  matched to cosmic", self.cosmic_pre.cosmic),
            ("  matched to beam", self.cosmic_pre.beam),
            ("  matched to beam muon", self.cosmic_pre.muon),
            ("  unmatched", self.cosmic_pre.unmatched),
            ("Beam-hypothesis tracks kept", self.beam_post.total),
            ("  matched to beam", self.beam_post.beam),
            ("  matched to beam muon", self.beam_post.muon),
            ("  matched to cosmic", self.beam_post.cosmic),
            ("  unmatched", self.beam_post.unmatched),
        ];

        for (i, (label, value)) in rows.iter().enumerate() {
            if i == 6 || i == 11 {
                writeln!(f, "{}", RULE)?;
            }
            writeln!(f, "{:<32}= {}", label, value)?;
        }
        writeln!(f, "{}", RULE)?;
        write!(
            f,
            "Events processed = {}, skipped = {}",
            self.events_processed, self.events_skipped
        )
    }
}
