// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Scheduler distributing scenarios across isolated worker processes.
//!
//! One worker executes at most one scenario at a time; isolation prevents
//! global-state leakage between scenarios. Workers are created lazily up to
//! the configured size; excess tasks queue FIFO and are picked up as workers
//! become idle. All scheduling state lives on a single coordinator task, so
//! no locks are involved: the [`Pool`] handle merely sends it operations.

mod worker;

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    time::Duration,
};

use futures::future;
use tokio::sync::{mpsc, oneshot};

use crate::{
    protocol::{Command, WorkerMessage},
    scenario::{ScenarioMetadata, StepMetadata},
    PoolError, ScenarioResult, StepResult,
};

use self::worker::{Feed, Worker, WorkerId, WorkerState};

/// Configuration of a [`Pool`].
#[derive(Clone, Debug, Default)]
pub struct PoolConfig {
    /// Maximum number of live workers; `0` defaults to the host CPU count.
    pub max_size: usize,

    /// Program to spawn workers from; defaults to the current executable.
    pub program: Option<PathBuf>,

    /// Extra arguments forwarded to each worker child.
    pub args: Vec<String>,
}

impl PoolConfig {
    /// Resolved worker limit: `max_size`, or the host CPU count for `0`.
    #[must_use]
    pub fn effective_max_size(&self) -> usize {
        if self.max_size > 0 {
            return self.max_size;
        }
        std::thread::available_parallelism().map_or(1, usize::from)
    }
}

/// One scenario execution request, addressed by registry coordinates.
#[derive(Clone, Debug)]
pub struct Task {
    /// Correlation id echoed by every message about this task.
    pub id: String,

    /// Declaration file to load the scenario from.
    pub file_path: String,

    /// Position of the scenario within the file's ordered list.
    pub scenario_index: usize,

    /// Optional scenario-wide timeout.
    pub timeout: Option<Duration>,

    /// Verbosity for the worker's stderr diagnostics.
    pub log_level: Option<String>,
}

impl Task {
    /// Creates a new [`Task`] out of its registry coordinates.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        file_path: impl Into<String>,
        scenario_index: usize,
    ) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            scenario_index,
            timeout: None,
            log_level: None,
        }
    }

    /// The `run` protocol message dispatching this [`Task`].
    fn to_command(&self) -> Command {
        Command::Run {
            task_id: self.id.clone(),
            file_path: self.file_path.clone(),
            scenario_index: self.scenario_index,
            timeout: self.timeout,
            log_level: self.log_level.clone(),
        }
    }
}

/// Lifecycle event forwarded from a worker about one in-flight [`Task`].
///
/// Every event echoes the `task_id` of the [`Task`] it is about, so a single
/// consumer can demultiplex events of parallel scenarios.
#[derive(Clone, Debug)]
pub enum TaskEvent {
    /// The scenario began executing.
    ScenarioStart {
        /// Correlation id of the task.
        task_id: String,

        /// Projection of the executing scenario.
        scenario: ScenarioMetadata,
    },

    /// A step began executing.
    StepStart {
        /// Correlation id of the task.
        task_id: String,

        /// Projection of the executing scenario.
        scenario: ScenarioMetadata,

        /// Projection of the executing step.
        step: StepMetadata,
    },

    /// A step finished.
    StepEnd {
        /// Correlation id of the task.
        task_id: String,

        /// Projection of the executing scenario.
        scenario: ScenarioMetadata,

        /// Projection of the executed step.
        step: StepMetadata,

        /// Recorded result of the step.
        result: StepResult,
    },

    /// The scenario finished, teardown included.
    ScenarioEnd {
        /// Correlation id of the task.
        task_id: String,

        /// Projection of the executed scenario.
        scenario: ScenarioMetadata,

        /// Full result of the scenario.
        result: ScenarioResult,
    },
}

/// Operation sent from a [`Pool`] handle to its coordinator.
enum Op {
    /// Schedule a [`Task`].
    Execute {
        /// The task to schedule.
        task: Task,

        /// Sink for the task's forwarded lifecycle events.
        events: mpsc::UnboundedSender<TaskEvent>,

        /// Resolver of the task's final outcome.
        done: oneshot::Sender<Result<ScenarioResult, PoolError>>,
    },

    /// Terminate every worker and reject whatever is still pending.
    Close {
        /// Acknowledged once termination finished.
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running worker pool.
///
/// Cheap to clone; all clones address the same coordinator. Dropping the
/// last handle closes the pool.
#[derive(Clone, Debug)]
pub struct Pool {
    /// Channel into the coordinator task.
    ops: mpsc::UnboundedSender<Op>,
}

impl Pool {
    /// Spawns a new [`Pool`] coordinator with the given configuration.
    #[must_use]
    pub fn spawn(config: PoolConfig) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        drop(tokio::spawn(Coordinator::new(config).run(ops_rx)));
        Self { ops: ops_tx }
    }

    /// Schedules the given [`Task`] and resolves with its final outcome.
    ///
    /// Forwarded lifecycle events are delivered to the provided `events`
    /// sender as they arrive, before this future resolves.
    ///
    /// # Errors
    ///
    /// With the captured error if the worker crashed or reported a terminal
    /// failure, or [`PoolError::Closed`] if the pool shut down first.
    pub async fn execute(
        &self,
        task: Task,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Result<ScenarioResult, PoolError> {
        let (done, outcome) = oneshot::channel();
        self.ops
            .send(Op::Execute { task, events, done })
            .map_err(|_| PoolError::Closed)?;
        outcome.await.map_err(|_| PoolError::Closed)?
    }

    /// Closes the pool: sends `terminate` to every worker, awaits their
    /// exit, and rejects all pending tasks.
    ///
    /// Idempotent; later [`execute()`]s are rejected with
    /// [`PoolError::Closed`].
    ///
    /// [`execute()`]: Pool::execute
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.ops.send(Op::Close { done }).is_ok() {
            drop(closed.await);
        }
    }
}

/// A [`Task`] waiting for a worker.
struct Pending {
    /// The queued task.
    task: Task,

    /// Sink for the task's forwarded lifecycle events.
    events: mpsc::UnboundedSender<TaskEvent>,

    /// Resolver of the task's final outcome.
    done: oneshot::Sender<Result<ScenarioResult, PoolError>>,
}

/// A dispatched [`Task`] awaiting its terminal message.
struct Inflight {
    /// Worker the task was dispatched to.
    worker: WorkerId,

    /// Sink for the task's forwarded lifecycle events.
    events: mpsc::UnboundedSender<TaskEvent>,

    /// Resolver of the task's final outcome.
    done: oneshot::Sender<Result<ScenarioResult, PoolError>>,
}

/// Owner of all scheduling state; runs as a single task.
struct Coordinator {
    /// Pool configuration.
    config: PoolConfig,

    /// Resolved worker limit.
    max_size: usize,

    /// Live workers by id.
    workers: HashMap<WorkerId, Worker>,

    /// Tasks waiting for a worker, FIFO.
    queue: VecDeque<Pending>,

    /// Dispatched tasks by their correlation id.
    inflight: HashMap<String, Inflight>,

    /// Sender handed to every spawned worker's reader task.
    feed_tx: mpsc::UnboundedSender<Feed>,

    /// Feed of messages from all workers.
    feed_rx: mpsc::UnboundedReceiver<Feed>,

    /// Id for the next spawned worker.
    next_worker: WorkerId,

    /// Set once the pool has been closed.
    closed: bool,
}

impl Coordinator {
    /// Creates a new [`Coordinator`] with no workers yet.
    fn new(config: PoolConfig) -> Self {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let max_size = config.effective_max_size();
        Self {
            config,
            max_size,
            workers: HashMap::new(),
            queue: VecDeque::new(),
            inflight: HashMap::new(),
            feed_tx,
            feed_rx,
            next_worker: 0,
            closed: false,
        }
    }

    /// Serves operations and worker feeds until every [`Pool`] handle is
    /// dropped.
    async fn run(
        mut self,
        mut ops: mpsc::UnboundedReceiver<Op>,
    ) {
        loop {
            tokio::select! {
                op = ops.recv() => match op {
                    Some(Op::Execute { task, events, done }) => {
                        self.on_execute(Pending { task, events, done }).await;
                    }
                    Some(Op::Close { done }) => {
                        self.close().await;
                        drop(done.send(()));
                    }
                    None => {
                        self.close().await;
                        return;
                    }
                },
                Some(feed) = self.feed_rx.recv() => {
                    self.on_feed(feed).await;
                }
            }
        }
    }

    /// Schedules one [`Task`]: immediate dispatch to an idle worker, a fresh
    /// worker if capacity remains, or the FIFO queue otherwise.
    async fn on_execute(&mut self, pending: Pending) {
        if self.closed {
            drop(pending.done.send(Err(PoolError::Closed)));
            return;
        }

        if let Some(id) = self.idle_worker() {
            self.dispatch(id, pending).await;
            return;
        }

        if self.workers.len() < self.max_size {
            match Worker::spawn(
                self.next_worker,
                &self.config,
                self.feed_tx.clone(),
            ) {
                Ok(w) => {
                    self.next_worker += 1;
                    drop(self.workers.insert(w.id, w));
                }
                Err(e) => {
                    drop(pending.done.send(Err(e)));
                    return;
                }
            }
        }

        self.queue.push_back(pending);
    }

    /// Routes one message or state change fed back by a worker.
    async fn on_feed(&mut self, feed: Feed) {
        match feed {
            Feed::Message(id, WorkerMessage::Ready) => {
                if let Some(w) = self.workers.get_mut(&id) {
                    if w.state == WorkerState::Starting {
                        w.state = WorkerState::Idle;
                    }
                }
                self.drain_queue(id).await;
            }
            Feed::Message(_, msg) => self.on_task_message(msg).await,
            Feed::Violation(id, violation) => {
                tracing::warn!(
                    worker = id,
                    error = %violation,
                    "removing misbehaving worker",
                );
                self.remove_worker(
                    id,
                    |task_id| PoolError::Protocol {
                        id,
                        detail: format!(
                            "{violation} (while executing task `{task_id}`)",
                        ),
                    },
                )
                .await;
            }
            Feed::Eof(id) => {
                // Expected during close; a crash otherwise.
                let code = match self.workers.remove(&id) {
                    Some(w) => {
                        let busy = w.state.clone();
                        let code = w.reap().await;
                        if let WorkerState::Busy(task_id) = busy {
                            self.resolve(
                                &task_id,
                                Err(PoolError::WorkerCrash { id, code }),
                            );
                        }
                        code
                    }
                    None => None,
                };
                if !self.closed {
                    tracing::debug!(
                        worker = id,
                        code,
                        "worker exited, replacing if work remains",
                    );
                    self.replace_if_needed().await;
                }
            }
        }
    }

    /// Routes a task-correlated [`WorkerMessage`] to its [`Inflight`] entry.
    async fn on_task_message(&mut self, msg: WorkerMessage) {
        let Some(task_id) = msg.task_id().map(ToOwned::to_owned) else {
            return;
        };

        match msg {
            WorkerMessage::ScenarioStart { scenario, .. } => {
                self.forward(TaskEvent::ScenarioStart { task_id, scenario });
            }
            WorkerMessage::StepStart { scenario, step, .. } => {
                self.forward(TaskEvent::StepStart {
                    task_id,
                    scenario,
                    step,
                });
            }
            WorkerMessage::StepEnd { scenario, step, result, .. } => {
                self.forward(TaskEvent::StepEnd {
                    task_id,
                    scenario,
                    step,
                    result,
                });
            }
            WorkerMessage::ScenarioEnd { scenario, result, .. } => {
                self.forward(TaskEvent::ScenarioEnd {
                    task_id,
                    scenario,
                    result,
                });
            }
            WorkerMessage::Result { result, .. } => {
                let worker = self.resolve(&task_id, Ok(result));
                if let Some(id) = worker {
                    self.mark_idle(id);
                    self.drain_queue(id).await;
                }
            }
            WorkerMessage::Error { error, .. } => {
                let worker =
                    self.resolve(&task_id, Err(PoolError::Task(error)));
                if let Some(id) = worker {
                    self.mark_idle(id);
                    self.drain_queue(id).await;
                }
            }
            WorkerMessage::Ready => {}
        }
    }

    /// Terminates every worker and rejects everything still pending.
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for pending in self.queue.drain(..) {
            drop(pending.done.send(Err(PoolError::Closed)));
        }
        for (_, inflight) in self.inflight.drain() {
            drop(inflight.done.send(Err(PoolError::Closed)));
        }

        let workers = self.workers.drain().map(|(_, w)| w.terminate());
        drop(future::join_all(workers).await);
    }

    /// Sends the `run` command of `pending` to the given worker.
    async fn dispatch(&mut self, id: WorkerId, pending: Pending) {
        let Some(w) = self.workers.get_mut(&id) else {
            self.queue.push_front(pending);
            return;
        };

        if let Err(e) = w.send(&pending.task.to_command()).await {
            tracing::warn!(
                worker = id,
                error = %e,
                "worker rejected dispatch, removing it",
            );
            // The reader's EOF will reap the process; requeue the task so an
            // unhealthy worker doesn't fail unrelated work.
            drop(self.workers.remove(&id));
            self.queue.push_front(pending);
            self.replace_if_needed().await;
            return;
        }

        w.state = WorkerState::Busy(pending.task.id.clone());
        drop(self.inflight.insert(
            pending.task.id.clone(),
            Inflight {
                worker: id,
                events: pending.events,
                done: pending.done,
            },
        ));
    }

    /// Hands the queue head to the given worker, if it is idle.
    async fn drain_queue(&mut self, id: WorkerId) {
        let idle = self
            .workers
            .get(&id)
            .is_some_and(|w| w.state == WorkerState::Idle);
        if idle {
            if let Some(pending) = self.queue.pop_front() {
                self.dispatch(id, pending).await;
            }
        }
    }

    /// Spawns a replacement worker when tasks are still waiting.
    async fn replace_if_needed(&mut self) {
        if self.closed
            || self.queue.is_empty()
            || self.workers.len() >= self.max_size
        {
            return;
        }
        match Worker::spawn(
            self.next_worker,
            &self.config,
            self.feed_tx.clone(),
        ) {
            Ok(w) => {
                self.next_worker += 1;
                drop(self.workers.insert(w.id, w));
            }
            Err(e) => {
                // Without a worker the queue head can never run.
                if let Some(pending) = self.queue.pop_front() {
                    drop(pending.done.send(Err(e)));
                }
            }
        }
    }

    /// First idle worker, if any.
    fn idle_worker(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .find(|w| w.state == WorkerState::Idle)
            .map(|w| w.id)
    }

    /// Marks the given worker as idle again.
    fn mark_idle(&mut self, id: WorkerId) {
        if let Some(w) = self.workers.get_mut(&id) {
            w.state = WorkerState::Idle;
        }
    }

    /// Forwards one [`TaskEvent`] to the in-flight entry of its task.
    fn forward(&self, event: TaskEvent) {
        let task_id = match &event {
            TaskEvent::ScenarioStart { task_id, .. }
            | TaskEvent::StepStart { task_id, .. }
            | TaskEvent::StepEnd { task_id, .. }
            | TaskEvent::ScenarioEnd { task_id, .. } => task_id.clone(),
        };
        match self.inflight.get(&task_id) {
            // A dropped receiver only means no one watches the events.
            Some(inflight) => drop(inflight.events.send(event)),
            None => tracing::debug!(
                %task_id,
                "dropping event of unknown task",
            ),
        }
    }

    /// Resolves the in-flight entry of `task_id` with its final outcome,
    /// returning the worker that carried it.
    fn resolve(
        &mut self,
        task_id: &str,
        outcome: Result<ScenarioResult, PoolError>,
    ) -> Option<WorkerId> {
        let inflight = self.inflight.remove(task_id)?;
        drop(inflight.done.send(outcome));
        Some(inflight.worker)
    }

    /// Removes a worker, resolving its in-flight task via `to_error`.
    async fn remove_worker(
        &mut self,
        id: WorkerId,
        to_error: impl FnOnce(&str) -> PoolError,
    ) {
        if let Some(w) = self.workers.remove(&id) {
            if let WorkerState::Busy(task_id) = w.state.clone() {
                self.resolve(&task_id, Err(to_error(&task_id)));
            }
            drop(w.terminate().await);
        }
        self.replace_if_needed().await;
    }
}
