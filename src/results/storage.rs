//! Results storage and retrieval
//!
//! Provides persistent storage for run reports in JSON format, one file per
//! run under the data directory.

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::report::{FileOutcome, Report, TaggedError};

/// A finished run as written to disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRun {
    /// Unique run ID
    pub id: String,

    /// Runner program the executor invoked
    pub command: String,

    /// Timestamp when the run started
    pub started_at: DateTime<Utc>,

    /// Timestamp when the run completed
    pub completed_at: DateTime<Utc>,

    /// Pool size used
    pub workers: usize,

    /// Batch size used (1 when batching was disabled)
    pub batch_size: usize,

    /// Files originally pending
    pub total_files: usize,

    /// Files whose outcome was fully clean
    pub files_passed: usize,

    /// Files with failures, real or synthetic
    pub files_failed: usize,

    /// Aggregate passing sub-test count
    pub passing: u64,

    /// Aggregate execution time in milliseconds
    pub duration_ms: u64,

    /// Pass rate over files (0.0 - 100.0)
    pub pass_rate: f64,

    /// Per-file outcomes
    pub outcomes: Vec<FileOutcome>,

    /// Errors tagged with their originating assignment
    pub errors: Vec<TaggedError>,
}

impl StoredRun {
    /// Build a stored run from a completed report
    pub fn from_report(
        report: &Report,
        command: impl Into<String>,
        workers: usize,
        batch_size: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            id: format!("run_{}", started_at.format("%Y%m%d_%H%M%S%3f")),
            command: command.into(),
            started_at,
            completed_at,
            workers,
            batch_size,
            total_files: report.total(),
            files_passed: report.files_passed(),
            files_failed: report.files_failed(),
            passing: report.passing(),
            duration_ms: report.duration_ms(),
            pass_rate: report.pass_rate(),
            outcomes: report.outcomes().to_vec(),
            errors: report.errors().to_vec(),
        }
    }
}

/// Results storage manager
pub struct ResultsStorage {
    /// Base directory for results
    base_dir: PathBuf,
}

impl ResultsStorage {
    /// Create a new results storage
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create with default directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("testpool")
            .join("results");
        Self::new(base_dir)
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    /// Save a run
    pub fn save(&self, run: &StoredRun) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).context("Failed to create results directory")?;

        let path = self.run_path(&run.id);
        let file = File::create(&path).context("Failed to create results file")?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, run).context("Failed to write results")?;

        info!("Saved run results to {}", path.display());
        Ok(path)
    }

    /// Load a run by ID
    pub fn load(&self, run_id: &str) -> Result<StoredRun> {
        let path = self.run_path(run_id);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open results file {}", path.display()))?;
        let reader = BufReader::new(file);

        serde_json::from_reader(reader).context("Failed to parse results file")
    }

    /// List all stored runs, newest first
    pub fn list(&self) -> Result<Vec<StoredRun>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir).context("Failed to read results directory")? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let file = File::open(&path)?;
                if let Ok(run) = serde_json::from_reader(BufReader::new(file)) {
                    runs.push(run);
                }
            }
        }

        runs.sort_by(|a: &StoredRun, b: &StoredRun| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Most recent run, if any
    pub fn latest(&self) -> Result<Option<StoredRun>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Export a run's per-file outcomes as CSV
    pub fn export_csv(&self, run: &StoredRun, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())
            .context("Failed to create CSV export file")?;

        writer.write_record(["runner", "file", "passing", "failing", "duration_ms", "kind"])?;
        for outcome in &run.outcomes {
            writer.write_record([
                outcome.runner.tag(),
                &outcome.file.display().to_string(),
                &outcome.passing.to_string(),
                &outcome.errors.len().to_string(),
                &outcome.duration_ms.to_string(),
                &format!("{:?}", outcome.kind).to_lowercase(),
            ])?;
        }

        writer.flush().context("Failed to flush CSV export")?;
        Ok(())
    }
}
