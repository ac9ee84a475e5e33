//! Host/worker message protocol
//!
//! Defines the typed messages exchanged between the coordinator and its
//! workers, plus the data they carry. The serialized form of every message
//! is `{ "type": <discriminant>, "payload": <body> }`; this shape is the
//! cross-process contract and is pinned by the tests at the bottom of this
//! file.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Execution strategies a test file may require
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Unit,
    Conformance,
    Project,
}

impl RunnerKind {
    /// Get runner display name
    pub fn name(&self) -> &'static str {
        match self {
            RunnerKind::Unit => "Unit",
            RunnerKind::Conformance => "Conformance",
            RunnerKind::Project => "Project",
        }
    }

    /// Short lowercase tag, as written in manifests and on the wire
    pub fn tag(&self) -> &'static str {
        match self {
            RunnerKind::Unit => "unit",
            RunnerKind::Conformance => "conformance",
            RunnerKind::Project => "project",
        }
    }

    /// One-line description for listings
    pub fn description(&self) -> &'static str {
        match self {
            RunnerKind::Unit => "Isolated unit-style test files",
            RunnerKind::Conformance => "Conformance suites with many sub-tests per file",
            RunnerKind::Project => "Whole-project scenario tests",
        }
    }

    /// Get all runner kinds
    pub fn all() -> Vec<RunnerKind> {
        vec![RunnerKind::Unit, RunnerKind::Conformance, RunnerKind::Project]
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<RunnerKind> {
        match s.to_lowercase().as_str() {
            "unit" | "unittest" => Some(RunnerKind::Unit),
            "conformance" | "conf" => Some(RunnerKind::Conformance),
            "project" | "proj" => Some(RunnerKind::Project),
            _ => None,
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One unit of test work: a file to run under a given runner kind
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestAssignment {
    pub runner: RunnerKind,
    pub file: PathBuf,
}

impl TestAssignment {
    pub fn new(runner: RunnerKind, file: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            file: file.into(),
        }
    }
}

impl fmt::Display for TestAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.file.display(), self.runner)
    }
}

/// Structured record for one failing sub-test within a runner invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Name of the failing sub-test or assertion
    pub name: String,

    /// Human-readable failure message
    pub error: String,

    /// Diagnostic trace text
    pub stack: String,
}

impl ErrorInfo {
    pub fn new(
        name: impl Into<String>,
        error: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            stack: stack.into(),
        }
    }
}

/// Complete outcome of one assignment
///
/// Carried by both `result` and `progress` messages; the discriminant alone
/// distinguishes "assignment done, more follow in this batch" from
/// "assignment done, batch done".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub runner: RunnerKind,
    pub file: PathBuf,

    /// Count of successful sub-tests
    pub passing: u64,

    /// Failed sub-tests; empty means full success, never absent
    pub errors: Vec<ErrorInfo>,

    /// Wall-clock execution time in milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl TestOutcome {
    pub fn new(
        assignment: &TestAssignment,
        passing: u64,
        errors: Vec<ErrorInfo>,
        duration_ms: u64,
    ) -> Self {
        Self {
            runner: assignment.runner,
            file: assignment.file.clone(),
            passing,
            errors,
            duration_ms,
        }
    }

    /// The `(runner, file)` pair this outcome accounts for
    pub fn assignment(&self) -> TestAssignment {
        TestAssignment::new(self.runner, self.file.clone())
    }

    /// True when every sub-test passed
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Payload of a worker `error` message
///
/// Carries no `(runner, file)` attribution; the coordinator reconstructs
/// that from its own dispatch bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    pub error: String,
    pub stack: String,
}

impl FatalError {
    pub fn new(error: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            stack: stack.into(),
        }
    }
}

/// Messages sent from the coordinator to a worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum HostMessage {
    /// Run one assignment; answered by exactly one `result` or `error`
    Test(TestAssignment),

    /// Run an ordered sequence of assignments as one unit of dispatch
    Batch(Vec<TestAssignment>),

    /// Finish in-flight work and exit; nothing further will be sent
    Close,
}

/// Messages sent from a worker back to the coordinator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Final outcome for the current dispatch
    Result(TestOutcome),

    /// Intermediate outcome within a batch; more follow
    Progress(TestOutcome),

    /// The runner invocation (or the worker itself) failed before
    /// producing an outcome
    Error(FatalError),
}
