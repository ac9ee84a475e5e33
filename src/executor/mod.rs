//! Test execution capability
//!
//! The opaque ability to run one test file under a given runner kind and
//! report how it went. Workers call this; nothing else in the crate knows
//! what execution actually does.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{ErrorInfo, RunnerKind};

mod process;

pub use process::ProcessExecutor;

/// Raw outcome of one runner invocation
///
/// The worker stamps this with the `(runner, file)` pair before sending it
/// to the coordinator.
#[derive(Clone, Debug)]
pub struct Execution {
    /// Count of successful sub-tests
    pub passing: u64,

    /// Failed sub-tests; empty means full success
    pub errors: Vec<ErrorInfo>,

    /// Wall-clock time the invocation took
    pub duration: Duration,
}

impl Execution {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

/// Fatal failures that abort a runner invocation before it can produce
/// an [`Execution`]
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to launch runner for {file}: {source}")]
    Launch {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runner for {file} was terminated by a signal")]
    Killed { file: String },
}

/// Run test files in isolation
///
/// `execute` may block (the stock implementation waits on a child process),
/// so workers invoke it on the blocking pool. A failing test is a normal
/// return with entries in `errors`; `Err` is reserved for invocations that
/// never produced an outcome at all.
pub trait TestExecutor: Send + Sync + 'static {
    fn execute(&self, runner: RunnerKind, file: &Path) -> Result<Execution, ExecutionError>;
}

#[cfg(test)]
pub mod testing {
    //! Scripted executor for worker and coordinator tests

    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// What the scripted executor should do for a given file
    #[derive(Clone, Debug)]
    pub enum Behavior {
        Pass { passing: u64 },
        Fail { passing: u64, errors: Vec<ErrorInfo> },
        Fatal { message: String },
        Panic,
    }

    /// In-process executor driven by a per-file script
    pub struct ScriptedExecutor {
        behaviors: HashMap<PathBuf, Behavior>,
        default: Behavior,
    }

    impl ScriptedExecutor {
        pub fn pass_all(passing: u64) -> Self {
            Self {
                behaviors: HashMap::new(),
                default: Behavior::Pass { passing },
            }
        }

        pub fn on(mut self, file: impl Into<PathBuf>, behavior: Behavior) -> Self {
            self.behaviors.insert(file.into(), behavior);
            self
        }
    }

    impl TestExecutor for ScriptedExecutor {
        fn execute(&self, _runner: RunnerKind, file: &Path) -> Result<Execution, ExecutionError> {
            let behavior = self.behaviors.get(file).unwrap_or(&self.default);
            match behavior {
                Behavior::Pass { passing } => Ok(Execution {
                    passing: *passing,
                    errors: Vec::new(),
                    duration: Duration::from_millis(5),
                }),
                Behavior::Fail { passing, errors } => Ok(Execution {
                    passing: *passing,
                    errors: errors.clone(),
                    duration: Duration::from_millis(5),
                }),
                Behavior::Fatal { message } => Err(ExecutionError::Launch {
                    file: file.display().to_string(),
                    source: std::io::Error::other(message.clone()),
                }),
                Behavior::Panic => panic!("scripted panic for {}", file.display()),
            }
        }
    }
}
