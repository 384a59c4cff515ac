//! Scenario runner - drives events through the analyzer and checks verdicts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use cosmicid_core::{
    AnalysisError, ConfusionCounters, CosmicIdConfig, CosmicRemovalAnalyzer, Cut, EventOutcome, ScoreReport,
};
use cosmicid_env::{Event, EventSource};

use crate::scenarios::{Scenario, ScenarioId};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// Everything accumulated over one pass through a set of events.
#[derive(Debug, Clone, Default, PartialEq)]
struct Partial {
    counters: ConfusionCounters,
    rejections: BTreeMap<Cut, u64>,
    diagnostics: u64,
    outcomes: Vec<EventOutcome>,
}

impl Partial {
    fn process(&mut self, analyzer: &CosmicRemovalAnalyzer, event: &Event) {
        let outcome = analyzer.analyze(event, &mut self.counters);
        if let Some(summary) = outcome.summary() {
            self.diagnostics += summary.diagnostics.len() as u64;
            for verdict in &summary.verdicts {
                if let Some(cut) = verdict.verdict.rejected_by() {
                    *self.rejections.entry(cut).or_default() += 1;
                }
            }
        }
        self.outcomes.push(outcome);
    }

    fn merge(&mut self, other: Partial) {
        self.counters.merge(&other.counters);
        for (cut, count) in other.rejections {
            *self.rejections.entry(cut).or_default() += count;
        }
        self.diagnostics += other.diagnostics;
        self.outcomes.extend(other.outcomes);
    }
}

/// Aggregate result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub report: ScoreReport,
    /// Beam-hypothesis tracks rejected, per cut
    pub rejections: BTreeMap<Cut, u64>,
    /// Hierarchy inconsistencies reported across all events
    pub diagnostics: u64,
    /// Per-event outcomes in input order
    pub outcomes: Vec<EventOutcome>,
}

impl RunSummary {
    fn from_partial(analyzer: &CosmicRemovalAnalyzer, partial: Partial) -> Self {
        Self {
            report: analyzer.end_job(&partial.counters),
            rejections: partial.rejections,
            diagnostics: partial.diagnostics,
            outcomes: partial.outcomes,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejections.values().sum()
    }
}

/// Processes events one at a time, in order.
pub fn run_sequential<'a>(
    analyzer: &CosmicRemovalAnalyzer,
    events: impl IntoIterator<Item = &'a Event>,
) -> RunSummary {
    let mut partial = Partial::default();
    analyzer.begin_job(&mut partial.counters);
    for event in events {
        partial.process(analyzer, event);
    }
    RunSummary::from_partial(analyzer, partial)
}

/// Pulls every event from `source`. Records the source cannot deliver
/// count as skipped.
pub fn run_source(analyzer: &CosmicRemovalAnalyzer, source: &mut dyn EventSource) -> RunSummary {
    info!("Reading events from {}", source.name());

    let mut partial = Partial::default();
    analyzer.begin_job(&mut partial.counters);
    while let Some(next) = source.next_event() {
        match next {
            Ok(event) => partial.process(analyzer, &event),
            Err(e) => {
                warn!("{}: {}", source.name(), e);
                partial.counters.events_skipped += 1;
            }
        }
    }
    RunSummary::from_partial(analyzer, partial)
}

/// Splits `events` into contiguous chunks, one per worker. Each worker
/// keeps its own counters; they are merged in chunk order after the join,
/// so the result equals [`run_sequential`].
pub fn run_parallel(
    analyzer: &CosmicRemovalAnalyzer,
    events: &[Event],
    workers: usize,
) -> Result<RunSummary, RunError> {
    let workers = workers.max(1);
    if workers == 1 || events.len() < 2 {
        return Ok(run_sequential(analyzer, events));
    }

    let chunk_size = events.len().div_ceil(workers);
    debug!("Running {} events on {} workers ({} per worker)", events.len(), workers, chunk_size);

    let partials = crossbeam::scope(|scope| {
        let handles: Vec<_> = events
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move |_| {
                    let mut partial = Partial::default();
                    for event in chunk {
                        partial.process(analyzer, event);
                    }
                    partial
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().map_err(|_| RunError::WorkerPanicked))
            .collect::<Result<Vec<_>, _>>()
    })
    .map_err(|_| RunError::WorkerPanicked)??;

    let mut total = Partial::default();
    analyzer.begin_job(&mut total.counters);
    for partial in partials {
        total.merge(partial);
    }
    Ok(RunSummary::from_partial(analyzer, total))
}

/// Outcome of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether every expectation held
    pub passed: bool,

    /// First failed expectation, if any
    pub failure_reason: Option<String>,

    pub events: usize,

    pub report: ScoreReport,
}

/// Runs named scenarios.
pub struct ScenarioRunner {
    /// Master seed
    seed: u64,

    /// Worker threads
    workers: usize,

    /// Replaces each scenario's own configuration
    config: Option<CosmicIdConfig>,
}

impl ScenarioRunner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            workers: 1,
            config: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_config(mut self, config: CosmicIdConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, id: ScenarioId) -> Result<ScenarioResult, RunError> {
        info!("Starting scenario: {} (seed={})", id.name(), self.seed);
        debug!("  {}", id.description());

        let scenario = Scenario::build(id, self.seed);
        let config = self.config.clone().unwrap_or_else(|| scenario.config.clone());
        let analyzer = CosmicRemovalAnalyzer::new(config)?;
        let summary = run_parallel(&analyzer, &scenario.events, self.workers)?;

        let failure_reason = check(&scenario, &summary);
        if let Some(reason) = &failure_reason {
            warn!("{}: {}", id.name(), reason);
        }

        Ok(ScenarioResult {
            scenario: id,
            seed: self.seed,
            passed: failure_reason.is_none(),
            failure_reason,
            events: scenario.events.len(),
            report: summary.report,
        })
    }

    pub fn run_all(&self) -> Result<Vec<ScenarioResult>, RunError> {
        ScenarioId::all().into_iter().map(|id| self.run(id)).collect()
    }
}

/// First expectation the run violates.
fn check(scenario: &Scenario, summary: &RunSummary) -> Option<String> {
    let report = &summary.report;
    if report.events_skipped > 0 {
        return Some(format!("{} events skipped", report.events_skipped));
    }
    if !report.beam_post.is_subset_of(&report.beam_pre) {
        return Some("post-cut tally exceeds pre-cut tally".to_string());
    }

    for expected in &scenario.expectations {
        let found = summary
            .outcomes
            .iter()
            .filter_map(EventOutcome::summary)
            .filter(|s| s.id == expected.event)
            .flat_map(|s| s.verdicts.iter())
            .find(|v| v.track == expected.track);

        match found {
            None => {
                return Some(format!("{}: track {} was not classified", expected.event, expected.track));
            }
            Some(actual) if actual.verdict != expected.verdict || actual.label != expected.label => {
                return Some(format!(
                    "{}: track {} is {:?}/{:?}, expected {:?}/{:?}",
                    expected.event, expected.track, actual.verdict, actual.label, expected.verdict, expected.label
                ));
            }
            Some(_) => {}
        }
    }
    None
}
