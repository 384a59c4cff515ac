//! One readout's worth of data products.

use serde::{Deserialize, Serialize};

use crate::error::EnvError;
use crate::products::{CrtHit, CrtTrack, ParticleCandidate, Shower, Track, TrueParticle};
use crate::types::{EventId, ShowerId, TrackId};

/// An event as handed over by the host pipeline.
///
/// Every collection is optional: a producer that did not run leaves its
/// product absent, which is different from an empty collection. Required
/// products are fetched through the `Result`-returning accessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub particles: Option<Vec<TrueParticle>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<Track>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub showers: Option<Vec<Shower>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crt_hits: Option<Vec<CrtHit>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crt_tracks: Option<Vec<CrtTrack>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<ParticleCandidate>>,
}

impl Event {
    /// Creates an event with no products attached.
    pub fn new(id: EventId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn particles(&self) -> Result<&[TrueParticle], EnvError> {
        self.particles
            .as_deref()
            .ok_or_else(|| EnvError::missing("true particles"))
    }

    pub fn tracks(&self) -> Result<&[Track], EnvError> {
        self.tracks.as_deref().ok_or_else(|| EnvError::missing("tracks"))
    }

    pub fn candidates(&self) -> Result<&[ParticleCandidate], EnvError> {
        self.candidates
            .as_deref()
            .ok_or_else(|| EnvError::missing("particle candidates"))
    }

    /// Showers; an absent collection reads as empty.
    pub fn showers(&self) -> &[Shower] {
        self.showers.as_deref().unwrap_or(&[])
    }

    /// CRT hits; an absent collection reads as empty.
    pub fn crt_hits(&self) -> &[CrtHit] {
        self.crt_hits.as_deref().unwrap_or(&[])
    }

    /// Externally reconstructed CRT tracks, if the producer ran.
    pub fn crt_tracks(&self) -> Option<&[CrtTrack]> {
        self.crt_tracks.as_deref()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.as_deref()?.iter().find(|t| t.id == id)
    }

    pub fn shower(&self, id: ShowerId) -> Option<&Shower> {
        self.showers().iter().find(|s| s.id == id)
    }
}
