//! Named scenarios with known verdicts.
//!
//! Each scenario hand-places particles through the oracle so that the
//! outcome for every beam-hypothesis track is known in advance.

use std::fmt;
use std::str::FromStr;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use cosmicid_core::{CosmicIdConfig, Cut, Tpc, TruthLabel, Verdict};
use cosmicid_env::{Event, EventId, TrackId};

use crate::oracle::{CosmicMuon, EventMix, EventOracle, Slice};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioId {
    /// SCN-A: contained neutrino interaction, everything kept
    ContainedBeam,

    /// SCN-B: cosmic entering from the top and stopping inside
    StoppingCosmic,

    /// SCN-C: cathode-crossing cosmic tagged by the CRT
    CrtTagged,

    /// SCN-D: cathode-stitched cosmics just outside and inside a wide beam window
    CathodeStitch,

    /// SCN-E: random events from the default mix
    Mixed,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ContainedBeam,
            ScenarioId::StoppingCosmic,
            ScenarioId::CrtTagged,
            ScenarioId::CathodeStitch,
            ScenarioId::Mixed,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ContainedBeam => "contained_beam",
            ScenarioId::StoppingCosmic => "stopping_cosmic",
            ScenarioId::CrtTagged => "crt_tagged",
            ScenarioId::CathodeStitch => "cathode_stitch",
            ScenarioId::Mixed => "mixed",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ContainedBeam => "Contained neutrino muon and proton survive every cut",
            ScenarioId::StoppingCosmic => "Stopping cosmic filed as beam is removed by the stopping exception",
            ScenarioId::CrtTagged => "Cathode-crossing cosmic is matched to a CRT track",
            ScenarioId::CathodeStitch => "Stitch time 150 µs is rejected, 50 µs passes a 100 µs window",
            ScenarioId::Mixed => "Random events, checked for bookkeeping invariants only",
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}

/// What one beam-hypothesis track must come out as.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub event: EventId,
    pub track: TrackId,
    pub verdict: Verdict,
    pub label: TruthLabel,
}

/// A ready-to-run scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: ScenarioId,
    pub config: CosmicIdConfig,
    pub events: Vec<Event>,
    pub expectations: Vec<Expectation>,
}

/// Number of random events in the mixed scenario.
pub const MIXED_EVENTS: u32 = 50;

impl Scenario {
    pub fn build(id: ScenarioId, seed: u64) -> Self {
        let mut oracle = EventOracle::new(seed).with_position_noise(0.0);
        let mut scenario = Scenario {
            id,
            config: CosmicIdConfig::default(),
            events: Vec::new(),
            expectations: Vec::new(),
        };

        match id {
            ScenarioId::ContainedBeam => scenario.contained_beam(&mut oracle),
            ScenarioId::StoppingCosmic => scenario.stopping_cosmic(&mut oracle),
            ScenarioId::CrtTagged => scenario.crt_tagged(&mut oracle),
            ScenarioId::CathodeStitch => scenario.cathode_stitch(&mut oracle),
            ScenarioId::Mixed => {
                let mut oracle = EventOracle::new(seed);
                let mix = EventMix::default();
                for n in 1..=MIXED_EVENTS {
                    let event = oracle.generate_event(EventId::new(1, 0, n), &mix);
                    scenario.events.push(event);
                }
            }
        }

        scenario
    }

    fn next_id(&self) -> EventId {
        EventId::new(1, 0, self.events.len() as u32 + 1)
    }

    fn expect(&mut self, event: EventId, track: TrackId, verdict: Verdict, label: TruthLabel) {
        self.expectations.push(Expectation {
            event,
            track,
            verdict,
            label,
        });
    }

    fn contained_beam(&mut self, oracle: &mut EventOracle) {
        let id = self.next_id();
        let vertex = Point3::new(-100.0, 0.0, 150.0);
        oracle.add_neutrino(vertex);
        oracle.add_beam_particle(13, vertex, Point3::new(-100.0, 0.0, 250.0), 0.0, true);
        oracle.add_beam_particle(2212, vertex, Point3::new(-100.0, 20.0, 140.0), 0.0, true);
        self.events.push(oracle.finish(id));

        self.expect(id, 0, Verdict::Kept, TruthLabel::BeamLepton);
        self.expect(id, 1, Verdict::Kept, TruthLabel::BeamNeutrino);
    }

    fn stopping_cosmic(&mut self, oracle: &mut EventOracle) {
        let id = self.next_id();
        let vertex = Point3::new(-100.0, 0.0, 150.0);
        oracle.add_neutrino(vertex);
        oracle.add_beam_particle(13, vertex, Point3::new(-100.0, 0.0, 250.0), 0.0, true);
        oracle.add_cosmic(
            CosmicMuon::new(Point3::new(120.0, 200.0, 400.0), Point3::new(120.0, 50.0, 400.0), 0.0)
                .stopping()
                .in_slice(Slice::Neutrino),
        );
        self.events.push(oracle.finish(id));

        self.expect(id, 0, Verdict::Kept, TruthLabel::BeamLepton);
        self.expect(id, 1, Verdict::Rejected(Cut::StoppingException), TruthLabel::Cosmic);
    }

    fn crt_tagged(&mut self, oracle: &mut EventOracle) {
        let id = self.next_id();
        let vertex = Point3::new(-100.0, 0.0, 150.0);
        oracle.add_neutrino(vertex);
        oracle.add_beam_particle(13, vertex, Point3::new(-100.0, 0.0, 250.0), 0.0, true);
        // Only the TPC 0 piece is filed as beam, so nothing stitches it
        oracle.add_cosmic(
            CosmicMuon::new(Point3::new(-150.0, 200.0, 350.0), Point3::new(150.0, -200.0, 350.0), -300.0)
                .with_crt()
                .in_slice(Slice::NeutrinoIn(Tpc::Zero)),
        );
        self.events.push(oracle.finish(id));

        self.expect(id, 0, Verdict::Kept, TruthLabel::BeamLepton);
        self.expect(id, 1, Verdict::Rejected(Cut::CrtTrack), TruthLabel::Cosmic);
    }

    fn cathode_stitch(&mut self, oracle: &mut EventOracle) {
        self.config.beam_time_limit = 100.0;

        // Through-going, 150 µs early
        let id = self.next_id();
        oracle.add_cosmic(
            CosmicMuon::new(Point3::new(-150.0, 200.0, 300.0), Point3::new(150.0, -200.0, 300.0), -150.0)
                .in_slice(Slice::Neutrino),
        );
        self.events.push(oracle.finish(id));
        self.expect(id, 0, Verdict::Rejected(Cut::CpaStitch), TruthLabel::Cosmic);
        self.expect(id, 1, Verdict::Rejected(Cut::CpaStitch), TruthLabel::Cosmic);

        // 50 µs early and stopping in TPC 1: the stitch does not exit, and
        // nothing after it has evidence
        let id = self.next_id();
        oracle.add_cosmic(
            CosmicMuon::new(Point3::new(-150.0, 200.0, 300.0), Point3::new(60.0, -80.0, 300.0), -50.0)
                .stopping()
                .in_slice(Slice::Neutrino),
        );
        self.events.push(oracle.finish(id));
        self.expect(id, 0, Verdict::Kept, TruthLabel::Cosmic);
        self.expect(id, 1, Verdict::Kept, TruthLabel::Cosmic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
        }
        assert!("chaos".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_every_scenario_has_events() {
        for id in ScenarioId::all() {
            let scenario = Scenario::build(id, 42);
            assert!(!scenario.events.is_empty(), "{} has no events", id);
            if id != ScenarioId::Mixed {
                assert!(!scenario.expectations.is_empty(), "{} has no expectations", id);
            }
        }
    }

    #[test]
    fn test_stitch_window_is_widened() {
        let scenario = Scenario::build(ScenarioId::CathodeStitch, 1);
        assert_eq!(scenario.config.beam_time_limit, 100.0);
        assert_eq!(scenario.events.len(), 2);
        for event in &scenario.events {
            assert_eq!(event.tracks().unwrap().len(), 2);
        }
    }
}
