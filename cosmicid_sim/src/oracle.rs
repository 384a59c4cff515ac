//! Ground truth oracle for synthetic detector events.
//!
//! The oracle knows where every particle really went and when. From that
//! it produces what reconstruction would have seen:
//! - Tracks displaced along the drift axis by the particle's time offset,
//!   split at the cathode and clipped at the anodes
//! - Hits carrying the true energy deposits, and per-track calorimetry
//!   with a Bragg rise at stopping ends
//! - CRT hits where the particle's line crosses a tagger plane
//! - The particle-candidate hierarchy, with cosmics optionally mis-filed
//!   into the neutrino slice

use nalgebra::{Point3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Poisson};
use serde::{Deserialize, Serialize};

use cosmicid_core::{ActiveVolume, Tpc};
use cosmicid_env::{
    Calorimetry, CalorimetryPoint, CandidateId, CrtHit, CrtTagger, EnergyDeposit, Event, EventId,
    EventSource, EnvError, Hit, Origin, ParticleCandidate, ParticleId, Shower, Track, TrackId,
    TrueParticle,
};

/// Trajectory sampling step [cm].
const TRAJECTORY_STEP: f64 = 2.0;

/// Calorimetry sampling step [cm].
const CALORIMETRY_STEP: f64 = 1.0;

/// Minimum-ionising dE/dx [MeV/cm].
const MIP_DEDX: f64 = 2.1;

/// A CRT tagger plane: fixed coordinate on one axis, bounded extent on the
/// other two.
struct TaggerPlane {
    tagger: CrtTagger,
    axis: usize,
    position: f64,
}

const TAGGER_PLANES: [TaggerPlane; 6] = [
    TaggerPlane { tagger: CrtTagger::TopLow, axis: 1, position: 360.0 },
    TaggerPlane { tagger: CrtTagger::Bottom, axis: 1, position: -360.0 },
    TaggerPlane { tagger: CrtTagger::West, axis: 0, position: -360.0 },
    TaggerPlane { tagger: CrtTagger::East, axis: 0, position: 360.0 },
    TaggerPlane { tagger: CrtTagger::South, axis: 2, position: -160.0 },
    TaggerPlane { tagger: CrtTagger::North, axis: 2, position: 660.0 },
];

/// Tagger extent on the axes a plane does not fix: (min, max) per axis.
const TAGGER_EXTENT: [(f64, f64); 3] = [(-400.0, 400.0), (-400.0, 400.0), (-160.0, 660.0)];

/// Which reconstruction hypothesis a particle's tracks are filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slice {
    /// Each piece is its own cosmic-hypothesis primary
    Cosmic,
    /// Every piece is a daughter of the event's neutrino candidate
    Neutrino,
    /// Only the piece in this TPC is a neutrino daughter
    NeutrinoIn(Tpc),
}

/// A cosmic muon crossing the detector.
#[derive(Debug, Clone, Copy)]
pub struct CosmicMuon {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
    /// Crossing time relative to the trigger [µs]
    pub time_us: f64,
    /// Comes to rest at `end`
    pub stops: bool,
    /// Leaves hits in the CRT
    pub crt: bool,
    /// Reconstruction attaches the true time as a prior T0
    pub prior_t0: bool,
    pub slice: Slice,
}

impl CosmicMuon {
    pub fn new(start: Point3<f64>, end: Point3<f64>, time_us: f64) -> Self {
        Self {
            start,
            end,
            time_us,
            stops: false,
            crt: false,
            prior_t0: false,
            slice: Slice::Cosmic,
        }
    }

    pub fn stopping(mut self) -> Self {
        self.stops = true;
        self
    }

    pub fn with_crt(mut self) -> Self {
        self.crt = true;
        self
    }

    pub fn with_prior_t0(mut self) -> Self {
        self.prior_t0 = true;
        self
    }

    pub fn in_slice(mut self, slice: Slice) -> Self {
        self.slice = slice;
        self
    }
}

/// Composition of randomly generated events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMix {
    /// Chance an event contains a beam-neutrino interaction
    pub neutrino_probability: f64,
    /// Mean number of cosmic muons per readout
    pub mean_cosmics: f64,
    /// Half-width of the readout window [µs]
    pub readout_us: f64,
    pub crt_efficiency: f64,
    pub stopping_fraction: f64,
    /// Chance a cosmic is filed into the neutrino slice
    pub misid_fraction: f64,
    /// Chance a cosmic carries a prior T0
    pub prior_t0_fraction: f64,
}

impl Default for EventMix {
    fn default() -> Self {
        Self {
            neutrino_probability: 0.8,
            mean_cosmics: 6.0,
            readout_us: 1250.0,
            crt_efficiency: 0.8,
            stopping_fraction: 0.15,
            misid_fraction: 0.2,
            prior_t0_fraction: 0.1,
        }
    }
}

/// The oracle: accumulates one event's truth and reconstruction at a time.
pub struct EventOracle {
    /// Master seed
    seed: u64,
    rng: ChaCha8Rng,
    volume: ActiveVolume,
    /// [cm/µs]
    drift_velocity: f64,
    /// Position smearing of reconstructed points [cm]
    position_noise_std: f64,
    /// Relative dE/dx smearing
    dedx_noise: f64,

    // Per-event state
    particles: Vec<TrueParticle>,
    tracks: Vec<Track>,
    showers: Vec<Shower>,
    crt_hits: Vec<CrtHit>,
    candidates: Vec<ParticleCandidate>,
    neutrino: Option<(CandidateId, Point3<f64>)>,
    next_particle: ParticleId,
    next_track: TrackId,
}

impl EventOracle {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            volume: ActiveVolume::default(),
            drift_velocity: 0.1565,
            position_noise_std: 0.1,
            dedx_noise: 0.03,
            particles: Vec::new(),
            tracks: Vec::new(),
            showers: Vec::new(),
            crt_hits: Vec::new(),
            candidates: Vec::new(),
            neutrino: None,
            next_particle: 1,
            next_track: 0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn with_volume(mut self, volume: ActiveVolume) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_drift_velocity(mut self, drift_velocity: f64) -> Self {
        self.drift_velocity = drift_velocity;
        self
    }

    pub fn with_position_noise(mut self, std_dev: f64) -> Self {
        self.position_noise_std = std_dev;
        self
    }

    // ========================================================================
    // BUILDING AN EVENT
    // ========================================================================

    /// Adds a reconstructed neutrino candidate at `vertex`. Later beam
    /// particles and neutrino-slice cosmics become its daughters.
    pub fn add_neutrino(&mut self, vertex: Point3<f64>) -> CandidateId {
        if let Some((id, _)) = self.neutrino {
            return id;
        }
        let id = self.push_candidate(None, 14, vec![], vec![], vec![]);
        self.neutrino = Some((id, vertex));
        id
    }

    /// Adds a primary product of the neutrino interaction. Beam particles
    /// are in time with the trigger up to `time_us`.
    pub fn add_beam_particle(
        &mut self,
        pdg: i32,
        start: Point3<f64>,
        end: Point3<f64>,
        time_us: f64,
        stops: bool,
    ) -> ParticleId {
        let (neutrino, vertex) = match self.neutrino {
            Some((id, vertex)) => (id, vertex),
            None => (self.add_neutrino(start), start),
        };
        let id = self.push_particle(pdg, Origin::BeamNeutrino, start, end, time_us, Some(vertex));

        let stop = stops.then_some(end);
        for track in self.reconstruct(id, start, end, time_us, stop) {
            let candidate = self.push_candidate(Some(neutrino), pdg, vec![track.id], vec![], vec![]);
            self.adopt(neutrino, candidate);
            self.tracks.push(track);
        }
        id
    }

    /// Adds an electromagnetic shower from the neutrino vertex.
    pub fn add_beam_shower(&mut self, start: Point3<f64>, direction: Vector3<f64>, length: f64) -> ParticleId {
        let neutrino = self.add_neutrino(start);
        let vertex = self.neutrino.map_or(start, |(_, vertex)| vertex);
        let end = start + direction * length;
        let id = self.push_particle(11, Origin::BeamNeutrino, start, end, 0.0, Some(vertex));

        let shower_id = self.showers.len() as i32;
        self.showers.push(Shower {
            id: shower_id,
            start,
            direction,
            length,
        });
        let candidate = self.push_candidate(Some(neutrino), 11, vec![], vec![shower_id], vec![]);
        self.adopt(neutrino, candidate);
        id
    }

    pub fn add_cosmic(&mut self, muon: CosmicMuon) -> ParticleId {
        let id = self.push_particle(13, Origin::Cosmic, muon.start, muon.end, muon.time_us, None);

        if muon.crt {
            self.add_crt_hits(&muon);
        }

        let stop = muon.stops.then_some(muon.end);
        let t0s_ns = if muon.prior_t0 { vec![muon.time_us * 1e3] } else { vec![] };

        for track in self.reconstruct(id, muon.start, muon.end, muon.time_us, stop) {
            let tpc = Tpc::from_index(track.hits.first().map_or(0, |hit| hit.tpc));
            let in_neutrino = match muon.slice {
                Slice::Cosmic => false,
                Slice::Neutrino => true,
                Slice::NeutrinoIn(wanted) => tpc == Some(wanted),
            };

            if in_neutrino {
                let neutrino = self.add_neutrino(track.start());
                let candidate = self.push_candidate(Some(neutrino), 13, vec![track.id], vec![], t0s_ns.clone());
                self.adopt(neutrino, candidate);
            } else {
                self.push_candidate(None, 13, vec![track.id], vec![], t0s_ns.clone());
            }
            self.tracks.push(track);
        }
        id
    }

    /// Hands over everything accumulated since the last call.
    pub fn finish(&mut self, id: EventId) -> Event {
        self.neutrino = None;
        self.next_particle = 1;
        self.next_track = 0;

        let mut event = Event::new(id);
        event.particles = Some(std::mem::take(&mut self.particles));
        event.tracks = Some(std::mem::take(&mut self.tracks));
        event.showers = Some(std::mem::take(&mut self.showers));
        event.crt_hits = Some(std::mem::take(&mut self.crt_hits));
        event.candidates = Some(std::mem::take(&mut self.candidates));
        event
    }

    // ========================================================================
    // RANDOM EVENTS
    // ========================================================================

    /// Generates a random event drawn from `mix`.
    pub fn generate_event(&mut self, id: EventId, mix: &EventMix) -> Event {
        if self.rng.gen_bool(mix.neutrino_probability.clamp(0.0, 1.0)) {
            self.generate_neutrino();
        }

        let n_cosmics = match Poisson::new(mix.mean_cosmics) {
            Ok(poisson) => {
                let n: f64 = poisson.sample(&mut self.rng);
                n as usize
            }
            Err(_) => 0,
        };
        for _ in 0..n_cosmics {
            if let Some(muon) = self.random_cosmic(mix) {
                self.add_cosmic(muon);
            }
        }

        self.finish(id)
    }

    fn generate_neutrino(&mut self) {
        let margin = 20.0;
        let vertex = self.random_point(margin);
        self.add_neutrino(vertex);
        let spill_us = self.rng.gen_range(0.0..1.6);

        // Forward-going muon
        let cos_z: f64 = self.rng.gen_range(0.3..1.0);
        let phi = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let sin_z = (1.0 - cos_z * cos_z).sqrt();
        let direction = Vector3::new(sin_z * phi.cos(), sin_z * phi.sin(), cos_z);
        let range = self.rng.gen_range(50.0..300.0);
        let (end, stops) = self.clip(&vertex, &direction, range);
        self.add_beam_particle(13, vertex, end, spill_us, stops);

        // Short proton
        let direction = self.random_direction();
        let range = self.rng.gen_range(5.0..40.0);
        let (end, stops) = self.clip(&vertex, &direction, range);
        self.add_beam_particle(2212, vertex, end, spill_us, stops);

        if self.rng.gen_bool(0.3) {
            let direction = self.random_direction();
            let length = self.rng.gen_range(20.0..80.0);
            self.add_beam_shower(vertex, direction, length);
        }
    }

    fn random_cosmic(&mut self, mix: &EventMix) -> Option<CosmicMuon> {
        let through = self.random_point(0.0);
        let direction = self.random_cosmic_direction();
        let back = self.volume.exit_distance(&through, &-direction);
        let forward = self.volume.exit_distance(&through, &direction);
        if back + forward < 10.0 {
            return None;
        }

        let start = through - direction * back;
        let time_us = self.uniform(-mix.readout_us, mix.readout_us);
        let stops = self.rng.gen_bool(mix.stopping_fraction.clamp(0.0, 1.0));
        let end = if stops {
            start + direction * (back + forward) * self.rng.gen_range(0.2..0.9)
        } else {
            through + direction * forward
        };

        let mut muon = CosmicMuon::new(start, end, time_us);
        muon.stops = stops;
        muon.crt = self.rng.gen_bool(mix.crt_efficiency.clamp(0.0, 1.0));
        muon.prior_t0 = self.rng.gen_bool(mix.prior_t0_fraction.clamp(0.0, 1.0));
        if self.rng.gen_bool(mix.misid_fraction.clamp(0.0, 1.0)) {
            muon.slice = Slice::Neutrino;
        }
        Some(muon)
    }

    fn random_point(&mut self, margin: f64) -> Point3<f64> {
        let (min, max) = (self.volume.min, self.volume.max);
        Point3::new(
            self.uniform(min.x + margin, max.x - margin),
            self.uniform(min.y + margin, max.y - margin),
            self.uniform(min.z + margin, max.z - margin),
        )
    }

    /// Uniform in `[low, high)`; the midpoint when the interval is empty.
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if low < high && (high - low).is_finite() {
            self.rng.gen_range(low..high)
        } else {
            0.5 * (low + high)
        }
    }

    fn random_direction(&mut self) -> Vector3<f64> {
        let cos_theta: f64 = self.rng.gen_range(-1.0..1.0);
        let phi = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
        Vector3::new(sin_theta * phi.cos(), cos_theta, sin_theta * phi.sin())
    }

    /// Downward-going with the cos²θ zenith distribution of cosmic muons.
    fn random_cosmic_direction(&mut self) -> Vector3<f64> {
        let u: f64 = self.rng.gen_range(1e-6..1.0);
        let cos_theta = u.cbrt();
        let phi = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
        Vector3::new(sin_theta * phi.cos(), -cos_theta, sin_theta * phi.sin())
    }

    /// End point after `range`, stopped at the volume boundary. Returns
    /// whether the particle ranges out inside.
    fn clip(&self, start: &Point3<f64>, direction: &Vector3<f64>, range: f64) -> (Point3<f64>, bool) {
        let to_exit = self.volume.exit_distance(start, direction);
        if range < to_exit {
            (start + direction * range, true)
        } else {
            (start + direction * to_exit, false)
        }
    }

    // ========================================================================
    // RECONSTRUCTION
    // ========================================================================

    fn push_particle(
        &mut self,
        pdg: i32,
        origin: Origin,
        start: Point3<f64>,
        end: Point3<f64>,
        time_us: f64,
        neutrino_vertex: Option<Point3<f64>>,
    ) -> ParticleId {
        let id = self.next_particle;
        self.next_particle += 1;
        self.particles.push(TrueParticle {
            track_id: id,
            mother: 0,
            pdg,
            origin,
            start,
            end,
            time_ns: time_us * 1e3,
            trajectory_length: (end - start).norm(),
            neutrino_vertex,
        });
        id
    }

    fn push_candidate(
        &mut self,
        parent: Option<CandidateId>,
        pdg: i32,
        tracks: Vec<TrackId>,
        showers: Vec<i32>,
        t0s_ns: Vec<f64>,
    ) -> CandidateId {
        let id = self.candidates.len();
        self.candidates.push(ParticleCandidate {
            id,
            parent,
            daughters: vec![],
            pdg,
            tracks,
            showers,
            t0s_ns,
            metadata: Default::default(),
        });
        id
    }

    fn adopt(&mut self, parent: CandidateId, daughter: CandidateId) {
        if let Some(parent) = self.candidates.get_mut(parent) {
            parent.daughters.push(daughter);
        }
    }

    /// Reconstructed tracks of a straight true segment, one per TPC it
    /// crosses. `stop` is where the particle comes to rest, if it does.
    fn reconstruct(
        &mut self,
        particle: ParticleId,
        start: Point3<f64>,
        end: Point3<f64>,
        time_us: f64,
        stop: Option<Point3<f64>>,
    ) -> Vec<Track> {
        let mut tracks = Vec::new();
        for (tpc, a, b) in split_at_cathode(start, end) {
            if let Some(track) = self.reconstruct_piece(particle, tpc, a, b, time_us, stop) {
                tracks.push(track);
            }
        }
        tracks
    }

    fn reconstruct_piece(
        &mut self,
        particle: ParticleId,
        tpc: Tpc,
        a: Point3<f64>,
        b: Point3<f64>,
        time_us: f64,
        stop: Option<Point3<f64>>,
    ) -> Option<Track> {
        let shift = -tpc.anode_sign() * self.drift_velocity * time_us;
        let noise = Normal::new(0.0, self.position_noise_std.max(0.0)).ok()?;
        let dedx_noise = Normal::new(1.0, self.dedx_noise.max(0.0)).ok()?;

        let mut trajectory = Vec::new();
        let mut hits = Vec::new();
        for point in sample_segment(&a, &b, TRAJECTORY_STEP) {
            let reco = Point3::new(point.x + shift, point.y, point.z);
            if !self.in_readout(&reco, tpc) {
                continue;
            }
            let smeared = Point3::new(
                reco.x + noise.sample(&mut self.rng),
                reco.y + noise.sample(&mut self.rng),
                reco.z + noise.sample(&mut self.rng),
            );
            trajectory.push(smeared);
            hits.push(Hit {
                tpc: tpc.index(),
                peak_time: (reco.x - self.volume.anode_x(tpc)).abs() / self.drift_velocity,
                deposits: vec![EnergyDeposit {
                    track_id: particle,
                    energy: MIP_DEDX * TRAJECTORY_STEP,
                }],
            });
        }
        if trajectory.len() < 2 {
            return None;
        }

        let mut points = Vec::new();
        for point in sample_segment(&a, &b, CALORIMETRY_STEP) {
            let reco = Point3::new(point.x + shift, point.y, point.z);
            if !self.in_readout(&reco, tpc) {
                continue;
            }
            let (residual_range, dedx) = match stop {
                Some(stop) => {
                    let range = (stop - point).norm();
                    (range, bragg_dedx(range))
                }
                None => ((b - point).norm(), MIP_DEDX),
            };
            points.push(CalorimetryPoint {
                residual_range,
                dedx: dedx * dedx_noise.sample(&mut self.rng),
                position: reco,
            });
        }

        let id = self.next_track;
        self.next_track += 1;
        Some(Track {
            id,
            trajectory,
            hits,
            calorimetry: vec![Calorimetry { plane: 2, points }],
        })
    }

    /// Charge is read out only between this TPC's cathode and anode.
    fn in_readout(&self, point: &Point3<f64>, tpc: Tpc) -> bool {
        let on_side = match tpc {
            Tpc::Zero => point.x <= 0.0,
            Tpc::One => point.x >= 0.0,
        };
        on_side && self.volume.contains(point)
    }

    fn add_crt_hits(&mut self, muon: &CosmicMuon) {
        let direction = muon.end - muon.start;
        for plane in &TAGGER_PLANES {
            let d = direction[plane.axis];
            if d.abs() <= f64::EPSILON {
                continue;
            }
            let s = (plane.position - muon.start[plane.axis]) / d;
            let crossing = muon.start + direction * s;
            let on_tagger = (0..3)
                .filter(|&axis| axis != plane.axis)
                .all(|axis| (TAGGER_EXTENT[axis].0..=TAGGER_EXTENT[axis].1).contains(&crossing[axis]));
            if on_tagger {
                let pe = self.rng.gen_range(30.0..150.0);
                self.crt_hits.push(CrtHit {
                    tagger: plane.tagger,
                    position: crossing,
                    time_ns: muon.time_us * 1e3,
                    pe,
                });
            }
        }
    }
}

/// Straight segment split into per-TPC pieces.
fn split_at_cathode(start: Point3<f64>, end: Point3<f64>) -> Vec<(Tpc, Point3<f64>, Point3<f64>)> {
    let side = |p: &Point3<f64>, other: &Point3<f64>| {
        if p.x < 0.0 || (p.x == 0.0 && other.x < 0.0) {
            Tpc::Zero
        } else {
            Tpc::One
        }
    };

    if start.x * end.x < 0.0 {
        let s = -start.x / (end.x - start.x);
        let crossing = start + (end - start) * s;
        vec![
            (side(&start, &end), start, crossing),
            (side(&end, &start), crossing, end),
        ]
    } else {
        vec![(side(&start, &end), start, end)]
    }
}

/// Points every `step` from `a` to `b`, both ends included.
fn sample_segment(a: &Point3<f64>, b: &Point3<f64>, step: f64) -> Vec<Point3<f64>> {
    let length = (b - a).norm();
    let n = ((length / step).ceil() as usize).max(1);
    (0..=n).map(|i| a + (b - a) * (i as f64 / n as f64)).collect()
}

/// Mean energy loss of a muon `range` cm before it stops.
fn bragg_dedx(range: f64) -> f64 {
    (17.0 * range.max(0.5).powf(-0.42)).max(MIP_DEDX * 0.8)
}

/// An endless supply of random events.
pub struct OracleSource {
    name: String,
    oracle: EventOracle,
    mix: EventMix,
    run: u32,
    produced: u32,
    limit: u32,
}

impl OracleSource {
    pub fn new(seed: u64, limit: u32, mix: EventMix) -> Self {
        Self {
            name: format!("oracle(seed={})", seed),
            oracle: EventOracle::new(seed),
            mix,
            run: 1,
            produced: 0,
            limit,
        }
    }

    /// Generates in a detector other than the default one.
    pub fn with_detector(mut self, volume: ActiveVolume, drift_velocity: f64) -> Self {
        self.oracle = self.oracle.with_volume(volume).with_drift_velocity(drift_velocity);
        self
    }
}

impl EventSource for OracleSource {
    fn next_event(&mut self) -> Option<Result<Event, EnvError>> {
        if self.produced >= self.limit {
            return None;
        }
        self.produced += 1;
        let id = EventId::new(self.run, 0, self.produced);
        Some(Ok(self.oracle.generate_event(id, &self.mix)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
