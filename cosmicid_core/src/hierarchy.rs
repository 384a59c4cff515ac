//! Final-state partitioning of the particle-candidate hierarchy.
//!
//! Primaries with a neutrino type code are the beam hypothesis and
//! contribute their daughters; every other primary is a cosmic candidate
//! in its own right. Each final-state candidate is then resolved to exactly
//! one track or one shower.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use cosmicid_env::{CandidateId, Event, ParticleCandidate, Shower, ShowerId, Track, TrackId};

/// A recoverable inconsistency in the hierarchy. The offending item is
/// dropped (or the first one kept) and processing continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    DuplicateCandidate { id: CandidateId },
    MultipleNeutrinos { kept: CandidateId, ignored: CandidateId },
    UnresolvedDaughter { parent: CandidateId, daughter: CandidateId },
    DuplicateDaughter { parent: CandidateId, daughter: CandidateId },
    /// A track already claimed by an earlier candidate
    DuplicateTrack { candidate: CandidateId, track: TrackId },
    DuplicateShower { candidate: CandidateId, shower: ShowerId },
    NoAssociation { candidate: CandidateId },
    AmbiguousAssociation { candidate: CandidateId, tracks: usize, showers: usize },
    /// The candidate names a track or shower the event does not contain
    DanglingAssociation { candidate: CandidateId },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DuplicateCandidate { id } => {
                write!(f, "candidate collection repeats id {}", id)
            }
            Diagnostic::MultipleNeutrinos { kept, ignored } => {
                write!(f, "multiple reconstructed neutrinos: keeping {}, ignoring {}", kept, ignored)
            }
            Diagnostic::UnresolvedDaughter { parent, daughter } => {
                write!(f, "candidate {} lists unknown daughter {}", parent, daughter)
            }
            Diagnostic::DuplicateDaughter { parent, daughter } => {
                write!(f, "candidate {} lists daughter {} more than once", parent, daughter)
            }
            Diagnostic::DuplicateTrack { candidate, track } => {
                write!(f, "track {} of candidate {} is already taken", track, candidate)
            }
            Diagnostic::DuplicateShower { candidate, shower } => {
                write!(f, "shower {} of candidate {} is already taken", shower, candidate)
            }
            Diagnostic::NoAssociation { candidate } => {
                write!(f, "no tracks or showers associated to candidate {}", candidate)
            }
            Diagnostic::AmbiguousAssociation { candidate, tracks, showers } => write!(
                f,
                "{} tracks and {} showers associated to candidate {}",
                tracks, showers, candidate
            ),
            Diagnostic::DanglingAssociation { candidate } => {
                write!(f, "candidate {} is associated to a missing track or shower", candidate)
            }
        }
    }
}

fn emit(diagnostics: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
    warn!("{}", diagnostic);
    diagnostics.push(diagnostic);
}

/// |pdg| of the three neutrino flavours.
pub fn is_neutrino(pdg: i32) -> bool {
    matches!(pdg.abs(), 12 | 14 | 16)
}

/// Indexes candidates by id. The first of any repeated id wins.
pub fn candidate_map<'a>(
    candidates: &'a [ParticleCandidate],
    diagnostics: &mut Vec<Diagnostic>,
) -> BTreeMap<CandidateId, &'a ParticleCandidate> {
    let mut map = BTreeMap::new();
    for candidate in candidates {
        if map.contains_key(&candidate.id) {
            emit(diagnostics, Diagnostic::DuplicateCandidate { id: candidate.id });
        } else {
            map.insert(candidate.id, candidate);
        }
    }
    map
}

/// Candidates split by reconstruction hypothesis.
#[derive(Debug, Default)]
pub struct FinalStates<'a> {
    pub cosmic: Vec<&'a ParticleCandidate>,
    pub beam: Vec<&'a ParticleCandidate>,
    /// The neutrino primary whose daughters form `beam`
    pub neutrino: Option<CandidateId>,
}

/// Walks the primaries in id order.
pub fn partition_final_states<'a>(
    map: &BTreeMap<CandidateId, &'a ParticleCandidate>,
    diagnostics: &mut Vec<Diagnostic>,
) -> FinalStates<'a> {
    let mut states = FinalStates::default();

    for candidate in map.values().copied().filter(|c| c.is_primary()) {
        if !is_neutrino(candidate.pdg) {
            states.cosmic.push(candidate);
            continue;
        }

        if let Some(kept) = states.neutrino {
            emit(
                diagnostics,
                Diagnostic::MultipleNeutrinos {
                    kept,
                    ignored: candidate.id,
                },
            );
            continue;
        }
        states.neutrino = Some(candidate.id);

        let mut seen = BTreeSet::new();
        for &daughter in &candidate.daughters {
            if !seen.insert(daughter) {
                emit(
                    diagnostics,
                    Diagnostic::DuplicateDaughter {
                        parent: candidate.id,
                        daughter,
                    },
                );
                continue;
            }
            match map.get(&daughter).copied() {
                Some(daughter) => states.beam.push(daughter),
                None => emit(
                    diagnostics,
                    Diagnostic::UnresolvedDaughter {
                        parent: candidate.id,
                        daughter,
                    },
                ),
            }
        }
    }

    states
}

/// Tracks and showers resolved from a set of final-state candidates.
#[derive(Debug, Default)]
pub struct Associated<'a> {
    pub tracks: Vec<&'a Track>,
    pub showers: Vec<&'a Shower>,
}

/// Resolves each candidate to its single track or single shower. A track
/// or shower is handed out once; later candidates claiming it are dropped.
pub fn collect_tracks_and_showers<'a>(
    candidates: &[&ParticleCandidate],
    event: &'a Event,
    diagnostics: &mut Vec<Diagnostic>,
) -> Associated<'a> {
    let mut associated = Associated::default();
    let mut seen_tracks = BTreeSet::new();
    let mut seen_showers = BTreeSet::new();

    for candidate in candidates {
        match (candidate.tracks.as_slice(), candidate.showers.as_slice()) {
            ([], []) => emit(diagnostics, Diagnostic::NoAssociation { candidate: candidate.id }),
            ([track], []) => match event.track(*track) {
                Some(track) if !seen_tracks.insert(track.id) => emit(
                    diagnostics,
                    Diagnostic::DuplicateTrack {
                        candidate: candidate.id,
                        track: track.id,
                    },
                ),
                Some(track) => associated.tracks.push(track),
                None => emit(diagnostics, Diagnostic::DanglingAssociation { candidate: candidate.id }),
            },
            ([], [shower]) => match event.shower(*shower) {
                Some(shower) if !seen_showers.insert(shower.id) => emit(
                    diagnostics,
                    Diagnostic::DuplicateShower {
                        candidate: candidate.id,
                        shower: shower.id,
                    },
                ),
                Some(shower) => associated.showers.push(shower),
                None => emit(diagnostics, Diagnostic::DanglingAssociation { candidate: candidate.id }),
            },
            (tracks, showers) => emit(
                diagnostics,
                Diagnostic::AmbiguousAssociation {
                    candidate: candidate.id,
                    tracks: tracks.len(),
                    showers: showers.len(),
                },
            ),
        }
    }

    associated
}
