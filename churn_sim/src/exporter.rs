//! JSON exporter for churn runs.
//!
//! Writes the per-epoch series, the orchestrator's action log and the
//! expected-vs-observed report so runs can be plotted offline.

use churn_core::{ChurnConfig, ChurnReport, EpochRecord};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::lifecycle::LifecycleEvent;
use crate::runner::ChurnRun;

/// Errors writing or reading an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnExport {
    /// Scenario name or "adhoc"
    pub label: String,

    /// Seed used
    pub seed: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ChurnConfig>,

    /// Per-epoch series
    pub epochs: Vec<EpochRecord>,

    /// Orchestrator actions
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<LifecycleEvent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ChurnReport>,

    /// Final verdict
    pub passed: bool,
}

impl ChurnExport {
    /// Creates an empty export container.
    pub fn new(label: &str, seed: u64) -> Self {
        Self {
            label: label.to_string(),
            seed,
            config: None,
            epochs: Vec::new(),
            events: Vec::new(),
            report: None,
            passed: false,
        }
    }

    /// Copies everything a run produced.
    pub fn from_run(label: &str, seed: u64, run: &ChurnRun) -> Self {
        Self {
            config: Some(run.config.clone()),
            epochs: run.stats.records.clone(),
            events: run.events.clone(),
            report: Some(run.report.clone()),
            ..Self::new(label, seed)
        }
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool) {
        self.passed = passed;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Reads an export back.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[tokio::test]
    async fn test_export_file() {
        let result = ScenarioRunner::new(3).with_epochs(200).run(ScenarioId::SteadyState).await;
        let run = result.run.as_ref().unwrap();

        let mut export = ChurnExport::from_run(result.scenario.name(), result.seed, run);
        export.finalize(result.passed);

        let path = std::env::temp_dir().join(format!("churn_export_{}.json", std::process::id()));
        export.write_to_file(&path).unwrap();
        let back = ChurnExport::read_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(back.label, "steady_state");
        assert_eq!(back.epochs.len(), 200);
        assert_eq!(back.epochs, run.stats.records);
        assert_eq!(back.events.len(), run.events.len());
        assert_eq!(back.config.map(|c| c.nodes), Some(7));
    }

    #[test]
    fn test_empty_export_omits_optional_fields() {
        let json = serde_json::to_value(ChurnExport::new("adhoc", 1)).unwrap();
        assert!(json.get("report").is_none());
        assert!(json.get("events").is_none());
        assert_eq!(json["epochs"], serde_json::json!([]));
    }
}
