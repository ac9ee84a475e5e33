//! Worker side of the coordinator/worker contract
//!
//! A worker is a long-lived task owning one inbound and one outbound
//! channel. It executes assignments through the opaque [`TestExecutor`]
//! capability and narrates progress back to the coordinator: `result` for a
//! standalone test or the last element of a batch, `progress` for every
//! earlier batch element, `error` when an invocation dies before producing
//! an outcome. On `close` (or on losing its channel) it terminates;
//! dropping its sender is the exit signal the coordinator observes.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::executor::TestExecutor;
use crate::protocol::{FatalError, HostMessage, TestAssignment, TestOutcome, WorkerMessage};

/// Identifies a worker slot within the pool
pub type WorkerId = usize;

/// Per-direction capacity of a worker channel
pub const CHANNEL_CAPACITY: usize = 64;

/// A worker task plus its end of the message channels
pub struct Worker<E> {
    id: WorkerId,
    executor: Arc<E>,
    inbox: mpsc::Receiver<HostMessage>,
    outbox: mpsc::Sender<WorkerMessage>,
}

impl<E: TestExecutor> Worker<E> {
    pub fn new(
        id: WorkerId,
        executor: Arc<E>,
        inbox: mpsc::Receiver<HostMessage>,
        outbox: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        Self {
            id,
            executor,
            inbox,
            outbox,
        }
    }

    /// Spawn a worker task, returning the coordinator-side endpoints
    pub fn spawn(
        id: WorkerId,
        executor: Arc<E>,
    ) -> (
        mpsc::Sender<HostMessage>,
        mpsc::Receiver<WorkerMessage>,
        JoinHandle<()>,
    ) {
        let (host_tx, inbox) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbox, host_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = Worker::new(id, executor, inbox, outbox);
        let handle = tokio::spawn(worker.run());
        (host_tx, host_rx, handle)
    }

    /// Receive loop; runs until `close` arrives or either channel drops
    pub async fn run(mut self) {
        while let Some(message) = self.inbox.recv().await {
            let served = match message {
                HostMessage::Test(assignment) => self.run_single(assignment).await,
                HostMessage::Batch(assignments) => self.run_batch(assignments).await,
                HostMessage::Close => break,
            };

            // The coordinator hung up; no point executing further work
            if served.is_err() {
                break;
            }
        }

        debug!("worker {} exiting", self.id);
    }

    async fn run_single(
        &self,
        assignment: TestAssignment,
    ) -> Result<(), SendError<WorkerMessage>> {
        debug!("worker {} running {}", self.id, assignment);

        match self.invoke(&assignment).await {
            Ok(outcome) => self.outbox.send(WorkerMessage::Result(outcome)).await,
            Err(fatal) => self.outbox.send(WorkerMessage::Error(fatal)).await,
        }
    }

    /// Execute a batch in order. Each element's outcome is independent: a
    /// failing test is still a completed element. A fatal invocation error
    /// abandons the remainder of the batch; the coordinator attributes the
    /// unconfirmed elements from its own bookkeeping.
    async fn run_batch(
        &self,
        assignments: Vec<TestAssignment>,
    ) -> Result<(), SendError<WorkerMessage>> {
        debug!(
            "worker {} running batch of {}",
            self.id,
            assignments.len()
        );

        let last = assignments.len().saturating_sub(1);
        for (index, assignment) in assignments.into_iter().enumerate() {
            match self.invoke(&assignment).await {
                Ok(outcome) => {
                    let message = if index == last {
                        WorkerMessage::Result(outcome)
                    } else {
                        WorkerMessage::Progress(outcome)
                    };
                    self.outbox.send(message).await?;
                }
                Err(fatal) => {
                    return self.outbox.send(WorkerMessage::Error(fatal)).await;
                }
            }
        }

        Ok(())
    }

    /// Invoke the executor on the blocking pool, folding panics into the
    /// fatal-error path
    async fn invoke(&self, assignment: &TestAssignment) -> Result<TestOutcome, FatalError> {
        let executor = self.executor.clone();
        let target = assignment.clone();

        let joined =
            tokio::task::spawn_blocking(move || executor.execute(target.runner, &target.file))
                .await;

        match joined {
            Ok(Ok(execution)) => {
                let duration_ms = execution.duration_ms();
                Ok(TestOutcome::new(
                    assignment,
                    execution.passing,
                    execution.errors,
                    duration_ms,
                ))
            }
            Ok(Err(error)) => Err(FatalError::new(error.to_string(), error_chain(&error))),
            Err(join_error) => Err(FatalError::new(
                format!("runner invocation panicked for {assignment}"),
                panic_message(join_error),
            )),
        }
    }
}

/// Render an error and its source chain as trace text
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut lines = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}

/// Extract the payload of a panicked blocking task, if it was a string
fn panic_message(join_error: tokio::task::JoinError) -> String {
    if !join_error.is_panic() {
        return join_error.to_string();
    }
    let payload = join_error.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
