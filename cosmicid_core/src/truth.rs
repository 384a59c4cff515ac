//! Truth labelling of reconstructed tracks.
//!
//! A track is matched to the true particle that deposited the most energy
//! in its hits, then labelled by that particle's provenance.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use cosmicid_env::{Hit, Origin, ParticleId, TrueParticle};

use crate::geometry::ActiveVolume;

/// Provenance of a reconstructed track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TruthLabel {
    /// From an in-fiducial beam-neutrino interaction
    BeamNeutrino,
    /// The primary muon of an in-fiducial beam-neutrino interaction
    BeamLepton,
    /// Anything else with a true particle, including beam particles from
    /// interactions outside the detector
    Cosmic,
    /// No true particle behind the hits
    Unmatched,
}

impl TruthLabel {
    /// Beam leptons are beam-neutrino particles too.
    pub fn is_beam(&self) -> bool {
        matches!(self, TruthLabel::BeamNeutrino | TruthLabel::BeamLepton)
    }
}

/// Particle that deposited the most energy across `hits`. Ties go to the
/// smaller id; no deposits gives `None`.
pub fn true_particle_from_hits(hits: &[Hit]) -> Option<ParticleId> {
    let mut energies: BTreeMap<ParticleId, f64> = BTreeMap::new();
    for deposit in hits.iter().flat_map(|hit| &hit.deposits) {
        *energies.entry(deposit.track_id).or_default() += deposit.energy;
    }

    // BTreeMap iterates in ascending id; keep the first maximum.
    energies
        .into_iter()
        .fold(None, |best: Option<(ParticleId, f64)>, (id, energy)| match best {
            Some((_, best_energy)) if best_energy >= energy => best,
            _ => Some((id, energy)),
        })
        .map(|(id, _)| id)
}

/// Per-event truth lookup.
#[derive(Debug, Clone, Default)]
pub struct TruthIndex {
    particles: HashMap<ParticleId, TrueParticle>,
    beam_ids: HashSet<ParticleId>,
    lepton_ids: HashSet<ParticleId>,
}

impl TruthIndex {
    /// Indexes `particles`. Beam-neutrino particles count as beam only when
    /// their interaction vertex lies inside `volume`; primary muons among
    /// them are the beam leptons.
    pub fn build(particles: &[TrueParticle], volume: &ActiveVolume) -> Self {
        let mut index = Self::default();
        for particle in particles {
            if particle.origin == Origin::BeamNeutrino {
                let vertex = particle.neutrino_vertex.unwrap_or(particle.start);
                if volume.in_fiducial(&vertex, 0.0, 0.0) {
                    if particle.pdg.abs() == 13 && particle.is_primary() {
                        index.lepton_ids.insert(particle.track_id);
                    }
                    index.beam_ids.insert(particle.track_id);
                }
            }
            index.particles.insert(particle.track_id, particle.clone());
        }
        index
    }

    pub fn particle(&self, id: ParticleId) -> Option<&TrueParticle> {
        self.particles.get(&id)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Number of in-fiducial primary beam muons.
    pub fn true_muons(&self) -> usize {
        self.lepton_ids.len()
    }

    /// Labels a track from its hits.
    pub fn label(&self, hits: &[Hit]) -> TruthLabel {
        match true_particle_from_hits(hits) {
            Some(id) if self.particles.contains_key(&id) => self.label_particle(id),
            _ => TruthLabel::Unmatched,
        }
    }

    fn label_particle(&self, id: ParticleId) -> TruthLabel {
        if self.lepton_ids.contains(&id) {
            TruthLabel::BeamLepton
        } else if self.beam_ids.contains(&id) {
            TruthLabel::BeamNeutrino
        } else {
            TruthLabel::Cosmic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmicid_env::EnergyDeposit;
    use nalgebra::Point3;

    fn particle(track_id: ParticleId, mother: ParticleId, pdg: i32, origin: Origin, vertex: Point3<f64>) -> TrueParticle {
        TrueParticle {
            track_id,
            mother,
            pdg,
            origin,
            start: vertex,
            end: vertex + nalgebra::Vector3::new(0.0, 0.0, 50.0),
            time_ns: 0.0,
            trajectory_length: 50.0,
            neutrino_vertex: (origin == Origin::BeamNeutrino).then_some(vertex),
        }
    }

    fn hit_with(deposits: &[(ParticleId, f64)]) -> Hit {
        Hit {
            tpc: 0,
            peak_time: 0.0,
            deposits: deposits
                .iter()
                .map(|&(track_id, energy)| EnergyDeposit { track_id, energy })
                .collect(),
        }
    }

    fn index() -> TruthIndex {
        let inside = Point3::new(-50.0, 0.0, 200.0);
        let outside = Point3::new(-50.0, 0.0, 600.0);
        TruthIndex::build(
            &[
                particle(1, 0, 13, Origin::BeamNeutrino, inside),
                particle(2, 0, 2212, Origin::BeamNeutrino, inside),
                particle(3, 0, 13, Origin::BeamNeutrino, outside),
                particle(4, 0, 13, Origin::Cosmic, inside),
                particle(5, 1, -13, Origin::BeamNeutrino, inside),
            ],
            &ActiveVolume::default(),
        )
    }

    #[test]
    fn test_majority_energy_wins() {
        let hits = vec![hit_with(&[(1, 1.0), (2, 0.5)]), hit_with(&[(2, 2.0)])];
        assert_eq!(true_particle_from_hits(&hits), Some(2));
    }

    #[test]
    fn test_tie_goes_to_smaller_id() {
        let hits = vec![hit_with(&[(7, 1.0)]), hit_with(&[(3, 1.0)])];
        assert_eq!(true_particle_from_hits(&hits), Some(3));
    }

    #[test]
    fn test_no_deposits() {
        assert_eq!(true_particle_from_hits(&[hit_with(&[])]), None);
        assert_eq!(true_particle_from_hits(&[]), None);
    }

    #[test]
    fn test_labels() {
        let index = index();
        assert_eq!(index.label(&[hit_with(&[(1, 1.0)])]), TruthLabel::BeamLepton);
        assert_eq!(index.label(&[hit_with(&[(2, 1.0)])]), TruthLabel::BeamNeutrino);
        assert_eq!(index.label(&[hit_with(&[(4, 1.0)])]), TruthLabel::Cosmic);
        assert_eq!(index.label(&[hit_with(&[(42, 1.0)])]), TruthLabel::Unmatched);
        assert_eq!(index.label(&[]), TruthLabel::Unmatched);
    }

    #[test]
    fn test_out_of_fiducial_beam_is_cosmic() {
        assert_eq!(index().label(&[hit_with(&[(3, 1.0)])]), TruthLabel::Cosmic);
    }

    #[test]
    fn test_secondary_muon_is_not_lepton() {
        assert_eq!(index().label(&[hit_with(&[(5, 1.0)])]), TruthLabel::BeamNeutrino);
    }

    #[test]
    fn test_true_muons() {
        let index = index();
        assert_eq!(index.true_muons(), 1);
        assert_eq!(index.len(), 5);
        assert!(TruthLabel::BeamLepton.is_beam());
        assert!(!TruthLabel::Cosmic.is_beam());
    }
}
