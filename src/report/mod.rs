//! Run accounting and aggregation
//!
//! The coordinator folds every worker outcome into a [`Report`]. Accounting
//! is exactly-once: each originally pending `(runner, file)` pair moves from
//! outstanding to accounted precisely when its outcome (real or synthetic)
//! is merged, and a second outcome for the same pair is an error rather
//! than a silent overwrite.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::{ErrorInfo, RunnerKind, TestAssignment, TestOutcome};

/// Violations of exactly-once accounting
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AccountingError {
    #[error("outcome for {0} was never dispatched")]
    Unknown(TestAssignment),

    #[error("outcome for {0} already accounted")]
    Duplicate(TestAssignment),
}

/// How a file came to be accounted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// The worker reported a real outcome
    Completed,

    /// The coordinator attributed a failure from its own bookkeeping
    Synthetic,
}

/// Final accounting entry for one file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileOutcome {
    pub runner: RunnerKind,
    pub file: PathBuf,
    pub passing: u64,
    pub errors: Vec<ErrorInfo>,
    pub duration_ms: u64,
    pub kind: OutcomeKind,
}

impl FileOutcome {
    /// True when every sub-test passed and nothing was synthesized
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.kind == OutcomeKind::Completed
    }
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = if self.is_clean() { "✓" } else { "✗" };
        write!(
            f,
            "{} {} [{}] {} passing, {} failing [{}ms]",
            symbol,
            self.file.display(),
            self.runner,
            self.passing,
            self.errors.len(),
            self.duration_ms
        )
    }
}

/// An [`ErrorInfo`] tagged with the assignment it arose from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaggedError {
    pub runner: RunnerKind,
    pub file: PathBuf,
    pub info: ErrorInfo,
}

/// Cumulative aggregation of all outcomes for a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    total: usize,
    passing: u64,
    duration_ms: u64,
    outcomes: Vec<FileOutcome>,
    errors: Vec<TaggedError>,
    outstanding: HashSet<TestAssignment>,
    accounted: HashSet<TestAssignment>,
}

impl Report {
    /// Start a report covering the given pending set
    pub fn new(assignments: &[TestAssignment]) -> Self {
        Self {
            total: assignments.len(),
            passing: 0,
            duration_ms: 0,
            outcomes: Vec::with_capacity(assignments.len()),
            errors: Vec::new(),
            outstanding: assignments.iter().cloned().collect(),
            accounted: HashSet::new(),
        }
    }

    /// Merge a real worker outcome
    pub fn merge(&mut self, outcome: &TestOutcome) -> Result<(), AccountingError> {
        let assignment = outcome.assignment();
        self.account(&assignment)?;

        self.passing += outcome.passing;
        self.duration_ms += outcome.duration_ms;
        for info in &outcome.errors {
            self.errors.push(TaggedError {
                runner: outcome.runner,
                file: outcome.file.clone(),
                info: info.clone(),
            });
        }
        self.outcomes.push(FileOutcome {
            runner: outcome.runner,
            file: outcome.file.clone(),
            passing: outcome.passing,
            errors: outcome.errors.clone(),
            duration_ms: outcome.duration_ms,
            kind: OutcomeKind::Completed,
        });

        Ok(())
    }

    /// Merge a coordinator-attributed failure for an assignment that never
    /// produced a real outcome
    pub fn merge_synthetic(
        &mut self,
        assignment: TestAssignment,
        info: ErrorInfo,
    ) -> Result<(), AccountingError> {
        self.account(&assignment)?;

        self.errors.push(TaggedError {
            runner: assignment.runner,
            file: assignment.file.clone(),
            info: info.clone(),
        });
        self.outcomes.push(FileOutcome {
            runner: assignment.runner,
            file: assignment.file,
            passing: 0,
            errors: vec![info],
            duration_ms: 0,
            kind: OutcomeKind::Synthetic,
        });

        Ok(())
    }

    fn account(&mut self, assignment: &TestAssignment) -> Result<(), AccountingError> {
        if !self.outstanding.remove(assignment) {
            if self.accounted.contains(assignment) {
                return Err(AccountingError::Duplicate(assignment.clone()));
            }
            return Err(AccountingError::Unknown(assignment.clone()));
        }
        self.accounted.insert(assignment.clone());
        Ok(())
    }

    /// True once every originally pending file is accounted for
    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Number of files originally pending
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of files accounted so far
    pub fn accounted(&self) -> usize {
        self.accounted.len()
    }

    /// Aggregate count of passing sub-tests
    pub fn passing(&self) -> u64 {
        self.passing
    }

    /// Aggregate execution time in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Every error, tagged with its originating assignment
    pub fn errors(&self) -> &[TaggedError] {
        &self.errors
    }

    /// Per-file outcomes in accounting order
    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    /// Assignments not yet accounted for
    pub fn outstanding(&self) -> impl Iterator<Item = &TestAssignment> {
        self.outstanding.iter()
    }

    /// Count of files whose outcome was fully clean
    pub fn files_passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_clean()).count()
    }

    /// Count of files with failures (real or synthetic)
    pub fn files_failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_clean()).count()
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.files_passed() as f64 / self.total as f64) * 100.0
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for outcome in &self.outcomes {
            writeln!(f, "  {outcome}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Files: {} | Pass: {} | Fail: {} | Passing sub-tests: {} | Errors: {}",
            self.total,
            self.files_passed(),
            self.files_failed(),
            self.passing,
            self.errors.len()
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.duration_ms
        )
    }
}
