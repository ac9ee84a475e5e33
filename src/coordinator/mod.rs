//! Host coordinator
//!
//! Owns the pending-file queue, a bounded pool of worker handles, and the
//! run's [`Report`]. Workers are reached only through their channel
//! endpoints, so the dispatch and close bookkeeping here is exercised in
//! tests by in-process doubles speaking the same message contract.
//!
//! Each worker slot walks `Idle → Assigned → (Idle | Closing) → Closed`.
//! Messages from all workers are serviced one at a time off a single merged
//! event stream; the end of a worker's stream is its channel-closed signal,
//! which doubles as both the normal exit acknowledgement and the crash
//! detector.

use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::executor::TestExecutor;
use crate::protocol::{ErrorInfo, FatalError, HostMessage, TestAssignment, WorkerMessage};
use crate::report::{AccountingError, Report};
use crate::worker::{Worker, WorkerId};

/// Pool sizing and dispatch tuning
#[derive(Clone, Copy, Debug)]
pub struct CoordinatorConfig {
    /// Number of workers to spawn
    pub workers: usize,

    /// Assignments per batch dispatch
    pub batch_size: usize,

    /// When false, every dispatch is a single `test` message
    pub batching: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 8,
            batching: true,
        }
    }
}

/// Errors that abort a run
///
/// Everything recoverable (failing tests, dying runners, dying workers) is
/// folded into the report instead; only violations of the message contract
/// or of exactly-once accounting surface here.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Accounting(#[from] AccountingError),

    #[error("protocol violation from worker {id}: {detail}")]
    Protocol { id: WorkerId, detail: String },
}

/// Coordinator-side endpoints of one worker channel pair
pub struct WorkerEndpoint {
    pub id: WorkerId,
    pub tx: mpsc::Sender<HostMessage>,
    pub rx: mpsc::Receiver<WorkerMessage>,
}

/// Spawn `count` workers sharing one executor
pub fn spawn_pool<E: TestExecutor>(
    executor: Arc<E>,
    count: usize,
) -> (Vec<WorkerEndpoint>, Vec<JoinHandle<()>>) {
    let mut endpoints = Vec::with_capacity(count);
    let mut handles = Vec::with_capacity(count);
    for id in 0..count {
        let (tx, rx, handle) = Worker::spawn(id, executor.clone());
        endpoints.push(WorkerEndpoint { id, tx, rx });
        handles.push(handle);
    }
    (endpoints, handles)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Idle,
    Assigned,
    Closing,
    Closed,
}

struct WorkerSlot {
    id: WorkerId,
    tx: mpsc::Sender<HostMessage>,
    state: SlotState,
    /// Dispatched assignments not yet confirmed by a progress/result, in
    /// dispatch order
    in_flight: VecDeque<TestAssignment>,
}

enum WorkerEvent {
    Message(WorkerId, WorkerMessage),
    Disconnected(WorkerId),
}

/// Tag a worker's receiver with its id and terminate with a disconnect
/// marker once the channel closes
fn event_stream(
    id: WorkerId,
    rx: mpsc::Receiver<WorkerMessage>,
) -> BoxStream<'static, WorkerEvent> {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|message| (message, rx))
    })
    .map(move |message| WorkerEvent::Message(id, message))
    .chain(stream::once(async move { WorkerEvent::Disconnected(id) }))
    .boxed()
}

/// Distributes a known set of test files across the worker pool and merges
/// every outcome into a single report
pub struct Coordinator {
    config: CoordinatorConfig,
    slots: Vec<WorkerSlot>,
    events: SelectAll<BoxStream<'static, WorkerEvent>>,
    pending: VecDeque<TestAssignment>,
    report: Report,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, endpoints: Vec<WorkerEndpoint>) -> Self {
        let mut slots = Vec::with_capacity(endpoints.len());
        let mut streams = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            slots.push(WorkerSlot {
                id: endpoint.id,
                tx: endpoint.tx,
                state: SlotState::Idle,
                in_flight: VecDeque::new(),
            });
            streams.push(event_stream(endpoint.id, endpoint.rx));
        }

        Self {
            config,
            slots,
            events: stream::select_all(streams),
            pending: VecDeque::new(),
            report: Report::new(&[]),
        }
    }

    /// Run the full set of assignments to completion and return the merged
    /// report
    pub async fn run(
        mut self,
        assignments: Vec<TestAssignment>,
    ) -> Result<Report, CoordinatorError> {
        info!(
            "dispatching {} test files across {} workers",
            assignments.len(),
            self.slots.len()
        );

        self.report = Report::new(&assignments);
        self.pending = assignments.into();

        self.dispatch_idle().await;

        while self.slots.iter().any(|s| s.state != SlotState::Closed) {
            let Some(event) = self.events.next().await else {
                break;
            };
            match event {
                WorkerEvent::Message(id, message) => self.handle_message(id, message).await?,
                WorkerEvent::Disconnected(id) => self.handle_disconnect(id)?,
            }
        }

        // The pool died out from under a non-empty queue; the remaining
        // files still have to be accounted for.
        while let Some(assignment) = self.pending.pop_front() {
            warn!("no workers left to run {assignment}");
            let info = synthetic_error(&assignment, "no workers available", "");
            self.report.merge_synthetic(assignment, info)?;
        }

        info!(
            "run complete: {}/{} files accounted, {} passing sub-tests, {} errors",
            self.report.accounted(),
            self.report.total(),
            self.report.passing(),
            self.report.errors().len()
        );

        Ok(self.report)
    }

    /// Hand work to every idle worker, or close it when the queue is empty
    async fn dispatch_idle(&mut self) {
        let open = self
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Idle | SlotState::Assigned))
            .count();

        for index in 0..self.slots.len() {
            if self.slots[index].state != SlotState::Idle {
                continue;
            }

            let Some(work) = self.next_work(open) else {
                let slot = &mut self.slots[index];
                debug!("closing worker {}", slot.id);
                slot.state = SlotState::Closing;
                // A failed send is the worker already being gone; its
                // disconnect event finishes the bookkeeping.
                let _ = slot.tx.send(HostMessage::Close).await;
                continue;
            };

            let message = match work.as_slice() {
                [single] => HostMessage::Test(single.clone()),
                _ => HostMessage::Batch(work.clone()),
            };

            let slot = &mut self.slots[index];
            debug!("worker {} assigned {} file(s)", slot.id, work.len());
            slot.in_flight.extend(work);
            slot.state = SlotState::Assigned;
            let _ = slot.tx.send(message).await;
        }
    }

    /// Pop the next dispatch from the queue: one file while batching is off
    /// or the open pool could cover the remainder file-by-file, otherwise a
    /// contiguous chunk
    fn next_work(&mut self, open: usize) -> Option<Vec<TestAssignment>> {
        if self.pending.is_empty() {
            return None;
        }

        let chunk = if !self.config.batching
            || self.config.batch_size <= 1
            || open >= self.pending.len()
        {
            1
        } else {
            self.config.batch_size.min(self.pending.len())
        };

        Some(self.pending.drain(..chunk).collect())
    }

    async fn handle_message(
        &mut self,
        id: WorkerId,
        message: WorkerMessage,
    ) -> Result<(), CoordinatorError> {
        let index = self.slot_index(id)?;

        let state = self.slots[index].state;
        if state != SlotState::Assigned {
            return Err(CoordinatorError::Protocol {
                id,
                detail: format!("{} message while {state:?}", message_kind(&message)),
            });
        }

        match message {
            WorkerMessage::Progress(outcome) => {
                debug!("worker {id} progress: {}", outcome.assignment());
                self.confirm_front(index, &outcome.assignment())?;
                if self.slots[index].in_flight.is_empty() {
                    return Err(CoordinatorError::Protocol {
                        id,
                        detail: "progress consumed the final batch element".to_string(),
                    });
                }
                self.report.merge(&outcome)?;
            }

            WorkerMessage::Result(outcome) => {
                debug!("worker {id} result: {}", outcome.assignment());
                self.confirm_front(index, &outcome.assignment())?;
                if !self.slots[index].in_flight.is_empty() {
                    return Err(CoordinatorError::Protocol {
                        id,
                        detail: "result arrived with batch elements still unconfirmed"
                            .to_string(),
                    });
                }
                self.report.merge(&outcome)?;
                self.slots[index].state = SlotState::Idle;
                self.dispatch_idle().await;
            }

            WorkerMessage::Error(fatal) => {
                let abandoned: Vec<_> = self.slots[index].in_flight.drain(..).collect();
                warn!(
                    "worker {id} reported a fatal failure covering {} assignment(s): {}",
                    abandoned.len(),
                    fatal.error
                );
                self.attribute_failures(abandoned, &fatal)?;
                self.slots[index].state = SlotState::Idle;
                self.dispatch_idle().await;
            }
        }

        Ok(())
    }

    fn handle_disconnect(&mut self, id: WorkerId) -> Result<(), CoordinatorError> {
        let index = self.slot_index(id)?;

        match self.slots[index].state {
            SlotState::Closing | SlotState::Closed => {
                debug!("worker {id} closed");
                self.slots[index].state = SlotState::Closed;
            }
            SlotState::Idle | SlotState::Assigned => {
                warn!("worker {id} channel closed unexpectedly");
                let abandoned: Vec<_> = self.slots[index].in_flight.drain(..).collect();
                self.slots[index].state = SlotState::Closed;
                let fatal = FatalError::new("worker channel closed", "");
                self.attribute_failures(abandoned, &fatal)?;
            }
        }

        Ok(())
    }

    /// Record a synthetic failure for each assignment the worker never
    /// confirmed
    fn attribute_failures(
        &mut self,
        abandoned: Vec<TestAssignment>,
        fatal: &FatalError,
    ) -> Result<(), AccountingError> {
        for assignment in abandoned {
            let info = synthetic_error(&assignment, &fatal.error, &fatal.stack);
            self.report.merge_synthetic(assignment, info)?;
        }
        Ok(())
    }

    /// Confirm that an outcome matches the oldest unconfirmed assignment
    /// for the slot; batch order is guaranteed, so anything else is a
    /// contract breach
    fn confirm_front(
        &mut self,
        index: usize,
        assignment: &TestAssignment,
    ) -> Result<(), CoordinatorError> {
        let slot = &mut self.slots[index];
        match slot.in_flight.front() {
            Some(expected) if expected == assignment => {
                slot.in_flight.pop_front();
                Ok(())
            }
            Some(expected) => Err(CoordinatorError::Protocol {
                id: slot.id,
                detail: format!("outcome for {assignment} while {expected} was in flight"),
            }),
            None => Err(CoordinatorError::Protocol {
                id: slot.id,
                detail: format!("outcome for {assignment} with nothing in flight"),
            }),
        }
    }

    fn slot_index(&self, id: WorkerId) -> Result<usize, CoordinatorError> {
        self.slots
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| CoordinatorError::Protocol {
                id,
                detail: "message from unknown worker".to_string(),
            })
    }
}

fn synthetic_error(assignment: &TestAssignment, error: &str, stack: &str) -> ErrorInfo {
    ErrorInfo::new(assignment.to_string(), error.to_string(), stack.to_string())
}

fn message_kind(message: &WorkerMessage) -> &'static str {
    match message {
        WorkerMessage::Result(_) => "result",
        WorkerMessage::Progress(_) => "progress",
        WorkerMessage::Error(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{Behavior, ScriptedExecutor};
    use crate::protocol::{RunnerKind, TestOutcome};
    use crate::report::OutcomeKind;
    use std::sync::Mutex;
    use std::time::Duration;

    fn assignment(file: &str) -> TestAssignment {
        TestAssignment::new(RunnerKind::Unit, file)
    }

    fn assignments(count: usize) -> Vec<TestAssignment> {
        (0..count).map(|i| assignment(&format!("case-{i}.txt"))).collect()
    }

    fn config(workers: usize, batch_size: usize, batching: bool) -> CoordinatorConfig {
        CoordinatorConfig {
            workers,
            batch_size,
            batching,
        }
    }

    fn fake_endpoint(
        id: WorkerId,
    ) -> (
        WorkerEndpoint,
        mpsc::Receiver<HostMessage>,
        mpsc::Sender<WorkerMessage>,
    ) {
        let (host_tx, worker_rx) = mpsc::channel(16);
        let (worker_tx, host_rx) = mpsc::channel(16);
        (
            WorkerEndpoint {
                id,
                tx: host_tx,
                rx: host_rx,
            },
            worker_rx,
            worker_tx,
        )
    }

    fn outcome_for(assignment: &TestAssignment) -> TestOutcome {
        TestOutcome::new(assignment, 1, Vec::new(), 5)
    }

    /// Test double that honors the worker contract and logs every message
    /// it receives
    fn obedient_worker(
        mut rx: mpsc::Receiver<HostMessage>,
        tx: mpsc::Sender<WorkerMessage>,
        log: Arc<Mutex<Vec<HostMessage>>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                log.lock().unwrap().push(message.clone());
                match message {
                    HostMessage::Test(a) => {
                        tx.send(WorkerMessage::Result(outcome_for(&a))).await.unwrap();
                    }
                    HostMessage::Batch(batch) => {
                        let last = batch.len() - 1;
                        for (i, a) in batch.iter().enumerate() {
                            let msg = if i == last {
                                WorkerMessage::Result(outcome_for(a))
                            } else {
                                WorkerMessage::Progress(outcome_for(a))
                            };
                            tx.send(msg).await.unwrap();
                        }
                    }
                    HostMessage::Close => break,
                }
            }
        })
    }

    #[tokio::test]
    async fn test_five_files_two_workers_single_dispatch() {
        let (endpoints, handles) =
            spawn_pool(Arc::new(ScriptedExecutor::pass_all(2)), 2);
        let coordinator = Coordinator::new(config(2, 8, false), endpoints);

        let report = coordinator.run(assignments(5)).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.accounted(), 5);
        assert_eq!(report.passing(), 10);
        assert_eq!(report.files_passed(), 5);
        assert!(report.errors().is_empty());

        // Close handshake: every worker exits
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_batched_run_accounts_every_file() {
        let (endpoints, handles) =
            spawn_pool(Arc::new(ScriptedExecutor::pass_all(1)), 3);
        let coordinator = Coordinator::new(config(3, 4, true), endpoints);

        let report = coordinator.run(assignments(25)).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.accounted(), 25);
        assert_eq!(report.passing(), 25);

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_run_closes_workers_immediately() {
        let (endpoints, handles) =
            spawn_pool(Arc::new(ScriptedExecutor::pass_all(1)), 2);
        let coordinator = Coordinator::new(CoordinatorConfig::default(), endpoints);

        let report = coordinator.run(Vec::new()).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.total(), 0);
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_fatal_invocation_attributed_to_its_file() {
        let executor = ScriptedExecutor::pass_all(3).on(
            "case-2.txt",
            Behavior::Fatal {
                message: "boom".to_string(),
            },
        );
        let (endpoints, _handles) = spawn_pool(Arc::new(executor), 2);
        let coordinator = Coordinator::new(config(2, 8, false), endpoints);

        let report = coordinator.run(assignments(5)).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.accounted(), 5);
        // Four clean files of three sub-tests each; the fatal one adds none
        assert_eq!(report.passing(), 12);
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.errors()[0].file, std::path::PathBuf::from("case-2.txt"));
        let synthetic = report
            .outcomes()
            .iter()
            .find(|o| o.file.ends_with("case-2.txt"))
            .unwrap();
        assert_eq!(synthetic.kind, OutcomeKind::Synthetic);
    }

    #[tokio::test]
    async fn test_worker_death_mid_batch_fails_remainder() {
        let (endpoint, mut worker_rx, worker_tx) = fake_endpoint(0);
        let coordinator = Coordinator::new(config(1, 3, true), vec![endpoint]);

        tokio::spawn(async move {
            match worker_rx.recv().await.unwrap() {
                HostMessage::Batch(batch) => {
                    assert_eq!(batch.len(), 3);
                    worker_tx
                        .send(WorkerMessage::Progress(outcome_for(&batch[0])))
                        .await
                        .unwrap();
                    // Drop both channel ends without finishing the batch
                }
                other => panic!("expected batch, got {other:?}"),
            }
        });

        let report = coordinator.run(assignments(3)).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.accounted(), 3);
        assert_eq!(report.passing(), 1);
        assert_eq!(report.errors().len(), 2);
        assert!(report
            .errors()
            .iter()
            .all(|e| e.info.error.contains("channel closed")));
    }

    #[tokio::test]
    async fn test_batch_policy_drains_then_singles() {
        let (endpoint, worker_rx, worker_tx) = fake_endpoint(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let worker = obedient_worker(worker_rx, worker_tx, log.clone());

        let coordinator = Coordinator::new(config(1, 4, true), vec![endpoint]);
        let report = coordinator.run(assignments(10)).await.unwrap();
        worker.await.unwrap();

        assert!(report.is_complete());
        let log = log.lock().unwrap();
        let shapes: Vec<String> = log
            .iter()
            .map(|m| match m {
                HostMessage::Test(_) => "test".to_string(),
                HostMessage::Batch(b) => format!("batch{}", b.len()),
                HostMessage::Close => "close".to_string(),
            })
            .collect();
        // 10 pending vs 1 open worker: chunks of 4, then the final pair,
        // then the close handshake
        assert_eq!(shapes, vec!["batch4", "batch4", "batch2", "close"]);
    }

    #[tokio::test]
    async fn test_exactly_one_close_per_worker() {
        let (endpoint, worker_rx, worker_tx) = fake_endpoint(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let worker = obedient_worker(worker_rx, worker_tx, log.clone());

        let coordinator = Coordinator::new(config(1, 8, false), vec![endpoint]);
        coordinator.run(assignments(2)).await.unwrap();
        worker.await.unwrap();

        let closes = log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, HostMessage::Close))
            .count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn test_duplicate_result_aborts_run() {
        let (endpoint, mut worker_rx, worker_tx) = fake_endpoint(0);
        let coordinator = Coordinator::new(config(1, 8, false), vec![endpoint]);

        tokio::spawn(async move {
            if let Some(HostMessage::Test(a)) = worker_rx.recv().await {
                worker_tx
                    .send(WorkerMessage::Result(outcome_for(&a)))
                    .await
                    .unwrap();
                worker_tx
                    .send(WorkerMessage::Result(outcome_for(&a)))
                    .await
                    .unwrap();
            }
            // Hold the channels open so the violation is seen first
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let err = coordinator.run(assignments(1)).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Protocol { id: 0, .. }));
    }

    #[tokio::test]
    async fn test_out_of_order_batch_outcome_aborts_run() {
        let (endpoint, mut worker_rx, worker_tx) = fake_endpoint(0);
        let coordinator = Coordinator::new(config(1, 3, true), vec![endpoint]);

        tokio::spawn(async move {
            if let Some(HostMessage::Batch(batch)) = worker_rx.recv().await {
                // Confirm the second element first
                worker_tx
                    .send(WorkerMessage::Progress(outcome_for(&batch[1])))
                    .await
                    .unwrap();
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let err = coordinator.run(assignments(3)).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_pool_of_zero_accounts_everything_synthetically() {
        let coordinator = Coordinator::new(config(0, 8, true), Vec::new());
        let report = coordinator.run(assignments(4)).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.accounted(), 4);
        assert_eq!(report.files_failed(), 4);
        assert!(report
            .outcomes()
            .iter()
            .all(|o| o.kind == OutcomeKind::Synthetic));
    }
}
