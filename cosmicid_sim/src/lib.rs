//! Cosmic-ID Simulation Harness
//!
//! Deterministic synthetic events for exercising the cosmic-removal
//! pipeline end to end.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ScenarioRunner                        │
//! │  ┌──────────────┐  ┌─────────────────┐  ┌─────────────────┐  │
//! │  │ EventOracle  │─▶│  Vec<Event>     │─▶│ worker threads  │  │
//! │  │ (seeded RNG) │  │  (EventSource)  │  │ own counters    │  │
//! │  └──────────────┘  └─────────────────┘  └────────┬────────┘  │
//! │                                                  │ merge     │
//! │                                         ┌────────▼────────┐  │
//! │                                         │   RunSummary    │  │
//! │                                         │   ScoreReport   │  │
//! │                                         └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cosmicid_sim::{ScenarioRunner, ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_workers(4);
//! let result = runner.run(ScenarioId::CathodeStitch)?;
//! assert!(result.passed);
//! ```

pub mod exporter;
pub mod oracle;
pub mod runner;
pub mod scenarios;

pub use exporter::RunExport;
pub use oracle::{CosmicMuon, EventMix, EventOracle, OracleSource, Slice};
pub use runner::{run_parallel, run_sequential, run_source, RunError, RunSummary, ScenarioResult, ScenarioRunner};
pub use scenarios::{Expectation, Scenario, ScenarioId};
