//! Child-process backed test executor
//!
//! Runs each assignment as `<program> [args..] --runner <kind> <file>` and
//! derives the outcome from the child's output. If the last non-empty
//! stdout line is a JSON report (`{"passing": N, "errors": [..]}`) it is
//! taken verbatim; otherwise the exit status decides.

use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use super::{Execution, ExecutionError, TestExecutor};
use crate::protocol::{ErrorInfo, RunnerKind};
use crate::utils::Timer;

/// Executor that shells out to a runner program per test file
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a fixed argument placed before the runner kind and file
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Structured report a runner may print as its last stdout line
#[derive(Debug, Deserialize)]
struct RunnerReport {
    passing: u64,
    #[serde(default)]
    errors: Vec<ErrorInfo>,
}

/// Parse the trailing JSON report from captured stdout, if present
fn parse_report(stdout: &str) -> Option<RunnerReport> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}

impl TestExecutor for ProcessExecutor {
    fn execute(&self, runner: RunnerKind, file: &Path) -> Result<Execution, ExecutionError> {
        let timer = Timer::start(format!("{} {}", self.program, file.display()));

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--runner")
            .arg(runner.tag())
            .arg(file)
            .output()
            .map_err(|source| ExecutionError::Launch {
                file: file.display().to_string(),
                source,
            })?;

        let duration = timer.stop();
        let stdout = String::from_utf8_lossy(&output.stdout);

        if let Some(report) = parse_report(&stdout) {
            return Ok(Execution {
                passing: report.passing,
                errors: report.errors,
                duration,
            });
        }

        if output.status.success() {
            return Ok(Execution {
                passing: 1,
                errors: Vec::new(),
                duration,
            });
        }

        let Some(code) = output.status.code() else {
            return Err(ExecutionError::Killed {
                file: file.display().to_string(),
            });
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());

        Ok(Execution {
            passing: 0,
            errors: vec![ErrorInfo::new(
                name,
                format!("runner exited with code {code}"),
                stderr.trim().to_string(),
            )],
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_builder() {
        let executor = ProcessExecutor::new("cargo").arg("run").arg("--quiet");
        assert_eq!(executor.program(), "cargo");
        assert_eq!(executor.args, vec!["run", "--quiet"]);
    }

    #[test]
    fn test_parse_report() {
        let report = parse_report("noise\n{\"passing\":4,\"errors\":[]}\n").unwrap();
        assert_eq!(report.passing, 4);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_parse_report_missing() {
        assert!(parse_report("all 4 tests passed\n").is_none());
        assert!(parse_report("").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_json_report() {
        let executor = ProcessExecutor::new("sh")
            .arg("-c")
            .arg(r#"echo '{"passing":3,"errors":[]}'"#);

        let execution = executor
            .execute(RunnerKind::Unit, Path::new("cases/a.txt"))
            .unwrap();
        assert_eq!(execution.passing, 3);
        assert!(execution.errors.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_exit_status_fallback() {
        let ok = ProcessExecutor::new("true")
            .execute(RunnerKind::Unit, Path::new("cases/a.txt"))
            .unwrap();
        assert_eq!(ok.passing, 1);

        let failed = ProcessExecutor::new("sh")
            .arg("-c")
            .arg("echo boom >&2; exit 3")
            .execute(RunnerKind::Unit, Path::new("cases/a.txt"))
            .unwrap();
        assert_eq!(failed.passing, 0);
        assert_eq!(failed.errors.len(), 1);
        assert!(failed.errors[0].error.contains("code 3"));
        assert_eq!(failed.errors[0].stack, "boom");
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_launch_failure() {
        let executor = ProcessExecutor::new("/nonexistent/runner");
        let err = executor
            .execute(RunnerKind::Unit, Path::new("cases/a.txt"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Launch { .. }));
    }
}
