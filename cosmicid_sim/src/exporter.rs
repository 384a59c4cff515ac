//! JSON exporter for run reports.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

use serde::{Deserialize, Serialize};

use cosmicid_core::{ConfusionCounters, CosmicIdConfig, ScoreReport};

use crate::runner::{RunSummary, ScenarioResult};

/// Complete export of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    /// Where events came from
    pub source: String,

    /// Seed used
    pub seed: u64,

    pub config: CosmicIdConfig,

    pub report: ScoreReport,

    /// Kept fraction of beam-matched tracks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beam_efficiency: Option<f64>,

    /// Removed fraction of cosmic-matched beam-hypothesis tracks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosmic_rejection: Option<f64>,

    /// Rejections per cut, keyed by cut name
    pub rejections: BTreeMap<String, u64>,

    pub diagnostics: u64,

    /// Scenario results, if scenarios were run
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub scenarios: Vec<ScenarioResult>,
}

impl RunExport {
    pub fn new(source: &str, seed: u64, config: CosmicIdConfig, summary: &RunSummary) -> Self {
        Self {
            source: source.to_string(),
            seed,
            config,
            report: summary.report,
            beam_efficiency: summary.report.beam_efficiency(),
            cosmic_rejection: summary.report.cosmic_rejection(),
            rejections: summary
                .rejections
                .iter()
                .map(|(cut, count)| (cut.name().to_string(), *count))
                .collect(),
            diagnostics: summary.diagnostics,
            scenarios: Vec::new(),
        }
    }

    /// Export of a scenario sweep. The report sums every scenario's report.
    pub fn from_scenarios(seed: u64, config: CosmicIdConfig, results: Vec<ScenarioResult>) -> Self {
        let mut counters = ConfusionCounters::new();
        for result in &results {
            counters.merge(&ConfusionCounters::from(result.report));
        }
        let report = counters.report();

        Self {
            source: "scenarios".to_string(),
            seed,
            config,
            report,
            beam_efficiency: report.beam_efficiency(),
            cosmic_rejection: report.cosmic_rejection(),
            rejections: BTreeMap::new(),
            diagnostics: 0,
            scenarios: results,
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{EventMix, EventOracle};
    use crate::runner::run_sequential;
    use cosmicid_core::CosmicRemovalAnalyzer;
    use cosmicid_env::EventId;

    #[test]
    fn test_write_and_read_back() {
        let config = CosmicIdConfig::default();
        let analyzer = CosmicRemovalAnalyzer::new(config.clone()).unwrap();
        let mut oracle = EventOracle::new(3);
        let events: Vec<_> = (1..=5)
            .map(|i| oracle.generate_event(EventId::new(1, 0, i), &EventMix::default()))
            .collect();
        let summary = run_sequential(&analyzer, &events);

        let export = RunExport::new("oracle", 3, config, &summary);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        export.write_to_file(path.to_str().unwrap()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: RunExport = serde_json::from_str(&text).unwrap();
        assert_eq!(back.report, summary.report);
        assert_eq!(back.rejections.values().sum::<u64>(), summary.rejected());
        assert!(!text.contains("\"scenarios\""));
    }
}
