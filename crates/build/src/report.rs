//! Build summary
//!
//! Folds every [`ChainOutcome`] into a [`BuildReport`] that is printed at the end of a
//! run and optionally written as JSON.

use crate::scheduler::ChainOutcome;
use serde::Serialize;
use std::{fmt, io::Write, path::PathBuf};

/// A chain that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    /// Source file of the failed chain
    pub source: PathBuf,
    /// Index of the failing step, absent when the chain was rejected before running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    /// Label of the failing step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Error message
    pub error: String,
    /// Output captured from the failing tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// A non-fatal step failure of an otherwise successful chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningEntry {
    pub source: PathBuf,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Aggregated result of a build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub all_succeeded: bool,
    /// Failed chains, sorted by source path
    pub failures: Vec<FailureEntry>,
    /// Warnings, sorted by source path
    pub warnings: Vec<WarningEntry>,
}

impl BuildReport {
    /// Summarizes the outcomes of a run
    pub fn aggregate(outcomes: &[ChainOutcome]) -> Self {
        let mut failures: Vec<_> = outcomes
            .iter()
            .filter_map(|outcome| {
                let failure = outcome.failure()?;
                let step = outcome.failed_step();
                Some(FailureEntry {
                    source: outcome.source().to_path_buf(),
                    step_index: step.map(|step| step.index),
                    step: step.map(|step| step.kind.to_string()),
                    error: failure.to_string(),
                    diagnostic: failure.diagnostic(),
                })
            })
            .collect();
        failures.sort_by(|a, b| a.source.cmp(&b.source));

        let mut warnings: Vec<_> = outcomes
            .iter()
            .flat_map(|outcome| {
                outcome.warnings().iter().map(|warning| WarningEntry {
                    source: outcome.source().to_path_buf(),
                    error: warning.to_string(),
                    diagnostic: warning.diagnostic(),
                })
            })
            .collect();
        // Stable, so warnings of one source keep their step order
        warnings.sort_by(|a, b| a.source.cmp(&b.source));

        let total = outcomes.len();
        let failed = failures.len();
        Self {
            total,
            succeeded: total - failed,
            failed,
            all_succeeded: failed == 0,
            failures,
            warnings,
        }
    }

    /// Whether every chain completed
    pub fn all_succeeded(&self) -> bool {
        self.all_succeeded
    }

    /// Writes the report as pretty-printed JSON
    pub fn write_json(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} shader(s): {} succeeded, {} failed", self.total, self.succeeded, self.failed)?;

        for warning in &self.warnings {
            writeln!(f, "warning: {}: {}", warning.source.display(), warning.error)?;
            write_diagnostic(f, warning.diagnostic.as_deref())?;
        }

        for failure in &self.failures {
            match (failure.step_index, &failure.step) {
                (Some(index), Some(step)) => writeln!(f, "failed: {} at step {index} ({step}): {}", failure.source.display(), failure.error)?,
                _ => writeln!(f, "failed: {}: {}", failure.source.display(), failure.error)?,
            }
            write_diagnostic(f, failure.diagnostic.as_deref())?;
        }

        Ok(())
    }
}

/// Tool output, indented below the entry it belongs to
fn write_diagnostic(f: &mut fmt::Formatter<'_>, diagnostic: Option<&str>) -> fmt::Result {
    for line in diagnostic.into_iter().flat_map(str::lines) {
        writeln!(f, "    {line}")?;
    }
    Ok(())
}
