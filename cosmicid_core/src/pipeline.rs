//! The cosmic-rejection pipeline.
//!
//! Seven cuts run in a fixed order against one beam-hypothesis track. The
//! first cut that fires is terminal: later cuts are never evaluated, and
//! their estimators are never called. A track that survives all seven is
//! kept.

use std::fmt;
use std::ops::ControlFlow;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cosmicid_env::Track;

use crate::calorimetry::StoppingCut;
use crate::config::CosmicIdConfig;
use crate::geometry::{detected_in_tpc, Tpc, CATHODE_X};
use crate::t0::{outside_beam_window, T0Estimators};

/// A named rejection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Cut {
    /// Both endpoints outside the fiducial volume
    Fiducial,
    /// Enters from outside and stops inside
    StoppingException,
    /// Hits in one TPC, endpoints in the other
    CrossTpc,
    /// Cathode-stitch (or prior) time outside the beam, or the stitched
    /// pair exits
    CpaStitch,
    /// Any CRT track match
    CrtTrack,
    /// CRT hit time outside the beam
    CrtHit,
    /// Anode-crossing time outside the beam
    ApaCross,
}

impl Cut {
    /// Evaluation order.
    pub const ORDER: [Cut; 7] = [
        Cut::Fiducial,
        Cut::StoppingException,
        Cut::CrossTpc,
        Cut::CpaStitch,
        Cut::CrtTrack,
        Cut::CrtHit,
        Cut::ApaCross,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Cut::Fiducial => "fiducial",
            Cut::StoppingException => "stopping_exception",
            Cut::CrossTpc => "cross_tpc",
            Cut::CpaStitch => "cpa_stitch",
            Cut::CrtTrack => "crt_track",
            Cut::CrtHit => "crt_hit",
            Cut::ApaCross => "apa_cross",
        }
    }
}

impl fmt::Display for Cut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal decision for one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Kept,
    Rejected(Cut),
}

impl Verdict {
    pub fn is_kept(&self) -> bool {
        matches!(self, Verdict::Kept)
    }

    pub fn rejected_by(&self) -> Option<Cut> {
        match self {
            Verdict::Kept => None,
            Verdict::Rejected(cut) => Some(*cut),
        }
    }
}

/// Geometry of one track, computed once and shared by every stage.
struct TrackView<'t> {
    track: &'t Track,
    start: Point3<f64>,
    end: Point3<f64>,
    start_in_fiducial: bool,
    end_in_fiducial: bool,
    tpc: Option<Tpc>,
}

/// Classifies beam-hypothesis tracks as kept or rejected.
#[derive(Debug, Clone)]
pub struct CosmicClassifier {
    config: CosmicIdConfig,
    stopping: StoppingCut,
}

impl CosmicClassifier {
    pub fn new(config: CosmicIdConfig) -> Self {
        let stopping = StoppingCut::from_config(&config);
        Self { config, stopping }
    }

    pub fn config(&self) -> &CosmicIdConfig {
        &self.config
    }

    /// Runs the cuts in [`Cut::ORDER`] and stops at the first rejection.
    pub fn classify<E: T0Estimators + ?Sized>(&self, track: &Track, estimators: &E) -> Verdict {
        let config = &self.config;
        let volume = &config.active_volume;
        let (start, end) = (track.start(), track.end());
        let view = TrackView {
            track,
            start,
            end,
            start_in_fiducial: volume.in_fiducial(&start, config.fiducial, config.fiducial_top),
            end_in_fiducial: volume.in_fiducial(&end, config.fiducial, config.fiducial_top),
            tpc: detected_in_tpc(&track.hits),
        };

        for cut in Cut::ORDER {
            if let ControlFlow::Break(cut) = self.apply(cut, &view, estimators) {
                debug!("Track {} rejected by {} cut", track.id, cut);
                return Verdict::Rejected(cut);
            }
        }

        debug!("Track {} kept", track.id);
        Verdict::Kept
    }

    fn apply<E: T0Estimators + ?Sized>(&self, cut: Cut, view: &TrackView<'_>, estimators: &E) -> ControlFlow<Cut> {
        match cut {
            Cut::Fiducial => self.fiducial(view),
            Cut::StoppingException => self.stopping_exception(view),
            Cut::CrossTpc => self.cross_tpc(view),
            Cut::CpaStitch => self.cpa_stitch(view, estimators),
            Cut::CrtTrack => self.crt_track(view, estimators),
            Cut::CrtHit => self.crt_hit(view, estimators),
            Cut::ApaCross => self.apa_cross(view, estimators),
        }
    }

    // ========================================================================
    // STAGES
    // ========================================================================

    fn fiducial(&self, view: &TrackView<'_>) -> ControlFlow<Cut> {
        reject_if(!view.start_in_fiducial && !view.end_in_fiducial, Cut::Fiducial)
    }

    /// One end inside the looser stopping volume, the other outside, and
    /// the contained end shows a Bragg rise.
    fn stopping_exception(&self, view: &TrackView<'_>) -> ControlFlow<Cut> {
        let margin = self.config.fiducial_stop;
        let volume = &self.config.active_volume;
        let start_in = volume.in_fiducial(&view.start, margin, margin);
        let end_in = volume.in_fiducial(&view.end, margin, margin);
        let calorimetry = &view.track.calorimetry;

        let stops_inside = match (start_in, end_in) {
            (false, true) => self.stopping.is_stopping(calorimetry, &view.end),
            (true, false) => self.stopping.is_stopping(calorimetry, &view.start),
            _ => false,
        };
        reject_if(stops_inside, Cut::StoppingException)
    }

    fn cross_tpc(&self, view: &TrackView<'_>) -> ControlFlow<Cut> {
        let (start_x, end_x) = (view.start.x, view.end.x);
        let crosses = match view.tpc {
            Some(Tpc::Zero) => start_x > CATHODE_X || end_x > CATHODE_X,
            Some(Tpc::One) => start_x < CATHODE_X || end_x < CATHODE_X,
            None => false,
        };
        reject_if(crosses, Cut::CrossTpc)
    }

    /// Stitch time, or the prior T0 when no stitch is found.
    fn cpa_stitch<E: T0Estimators + ?Sized>(&self, view: &TrackView<'_>, estimators: &E) -> ControlFlow<Cut> {
        let stitch = view.tpc.and_then(|tpc| estimators.cpa_stitch(view.track, tpc));
        let (time, exits) = match stitch {
            Some(stitch) => (Some(stitch.time), stitch.exits_fiducial),
            None => (estimators.prior_t0(view.track), false),
        };

        let out_of_time = outside_beam_window(time, self.config.beam_time_limit);
        reject_if(time.is_some() && (out_of_time || exits), Cut::CpaStitch)
    }

    fn crt_track<E: T0Estimators + ?Sized>(&self, view: &TrackView<'_>, estimators: &E) -> ControlFlow<Cut> {
        reject_if(estimators.crt_track(view.track, view.tpc).is_some(), Cut::CrtTrack)
    }

    fn crt_hit<E: T0Estimators + ?Sized>(&self, view: &TrackView<'_>, estimators: &E) -> ControlFlow<Cut> {
        let time = estimators.crt_hit(view.track, view.tpc);
        reject_if(outside_beam_window(time, self.config.beam_time_limit), Cut::CrtHit)
    }

    /// An out-of-time anode crosser is rejected when its end away from the
    /// anode leaves the fiducial volume, or its start is not contained. The
    /// TPC 0 and TPC 1 branches mirror each other in x; an ambiguous TPC
    /// never rejects here.
    fn apa_cross<E: T0Estimators + ?Sized>(&self, view: &TrackView<'_>, estimators: &E) -> ControlFlow<Cut> {
        let time = estimators.apa_cross(view.track, view.tpc);
        if !outside_beam_window(time, self.config.beam_time_limit) {
            return ControlFlow::Continue(());
        }

        let start_nearer_anode = match view.tpc {
            Some(Tpc::Zero) => view.start.x < view.end.x,
            Some(Tpc::One) => view.start.x > view.end.x,
            None => return ControlFlow::Continue(()),
        };
        let through_going = start_nearer_anode && !view.end_in_fiducial;
        reject_if(through_going || !view.start_in_fiducial, Cut::ApaCross)
    }
}

fn reject_if(condition: bool, cut: Cut) -> ControlFlow<Cut> {
    if condition {
        ControlFlow::Break(cut)
    } else {
        ControlFlow::Continue(())
    }
}
