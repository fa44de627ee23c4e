// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Top-level executor wiring everything together.
//!
//! [`Probitas`] snapshots the registry, filters it through the selectors,
//! dispatches one [`Task`] per selected [`Scenario`] to the worker [`Pool`],
//! demultiplexes the forwarded lifecycle events into the [`Reporter`], and
//! aggregates the results into the final [`RunSummary`].
//!
//! [`Scenario`]: crate::Scenario

use std::{collections::HashSet, path::PathBuf, time::Duration};

use futures::{stream::FuturesUnordered, StreamExt as _};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    pool::{Pool, PoolConfig, Task, TaskEvent},
    registry, reporter, runner,
    scenario::ScenarioMetadata,
    Aggregator, PoolError, Reporter, RunSummary, ScenarioResult,
    ScenarioStatus, Selector,
};

/// Top-level executor of the registered scenarios.
///
/// The default configuration runs every registered [`Scenario`] across as
/// many workers as the host has CPUs, reporting to [`reporter::Basic`]:
///
/// ```rust,no_run
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// probitas::Probitas::new().run_and_exit().await;
/// # }
/// ```
///
/// [`Scenario`]: crate::Scenario
#[derive(Debug)]
pub struct Probitas<R = reporter::Basic> {
    /// Sink of lifecycle events.
    reporter: R,

    /// OR-combined scenario filters; empty means everything runs.
    selectors: Vec<Selector>,

    /// Worker limit; `0` defaults to the host CPU count.
    max_workers: usize,

    /// Failed scenarios to tolerate before aborting the run.
    max_failures: Option<usize>,

    /// Scenario-wide timeout forwarded to the workers.
    scenario_timeout: Option<Duration>,

    /// Log level forwarded to the workers.
    log_level: Option<String>,

    /// External cancellation signal aborting the whole run.
    cancel: CancellationToken,

    /// Extra arguments forwarded to each worker child.
    worker_args: Vec<String>,

    /// Program to spawn workers from, for harnesses not re-executing
    /// themselves.
    worker_program: Option<PathBuf>,
}

impl Probitas<reporter::Basic> {
    /// Creates a [`Probitas`] executor with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reporter: reporter::Basic::new(),
            selectors: Vec::new(),
            max_workers: 0,
            max_failures: None,
            scenario_timeout: None,
            log_level: None,
            cancel: CancellationToken::new(),
            worker_args: Vec::new(),
            worker_program: None,
        }
    }
}

impl Default for Probitas<reporter::Basic> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Reporter> Probitas<R> {
    /// Replaces the [`Reporter`] observing this run.
    #[must_use]
    pub fn with_reporter<R2: Reporter>(self, reporter: R2) -> Probitas<R2> {
        let Self {
            reporter: _,
            selectors,
            max_workers,
            max_failures,
            scenario_timeout,
            log_level,
            cancel,
            worker_args,
            worker_program,
        } = self;
        Probitas {
            reporter,
            selectors,
            max_workers,
            max_failures,
            scenario_timeout,
            log_level,
            cancel,
            worker_args,
            worker_program,
        }
    }

    /// Adds a [`Selector`]; distinct selectors are OR-combined.
    #[must_use]
    pub fn selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// Adds multiple [`Selector`]s; distinct selectors are OR-combined.
    #[must_use]
    pub fn selectors(
        mut self,
        selectors: impl IntoIterator<Item = Selector>,
    ) -> Self {
        self.selectors.extend(selectors);
        self
    }

    /// Limits the number of parallel workers; `0` means the host CPU count.
    #[must_use]
    pub fn max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Aborts the run once the given number of scenarios failed.
    #[must_use]
    pub fn max_failures(mut self, max: usize) -> Self {
        self.max_failures = Some(max);
        self
    }

    /// Applies a scenario-wide `timeout` inside each worker.
    #[must_use]
    pub fn scenario_timeout(mut self, timeout: Duration) -> Self {
        self.scenario_timeout = Some(timeout);
        self
    }

    /// Sets the log level forwarded to the workers' stderr diagnostics.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Attaches an external cancellation signal aborting the whole run.
    #[must_use]
    pub fn external_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Forwards extra arguments to each worker child.
    #[must_use]
    pub fn worker_args(
        mut self,
        args: impl IntoIterator<Item = String>,
    ) -> Self {
        self.worker_args.extend(args);
        self
    }

    /// Spawns workers from the given program instead of re-executing the
    /// current one.
    #[must_use]
    pub fn worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    /// Executes the selected scenarios and returns the aggregated
    /// [`RunSummary`].
    ///
    /// When the current process was spawned as a worker child, this enters
    /// the worker loop instead and exits the process once done.
    pub async fn run(self) -> RunSummary {
        if runner::is_worker() {
            let code = runner::worker().await;
            std::process::exit(code);
        }

        let Self {
            mut reporter,
            selectors,
            max_workers,
            max_failures,
            scenario_timeout,
            log_level,
            cancel,
            worker_args,
            worker_program,
        } = self;

        let selected = registry::all()
            .into_iter()
            .filter(|r| {
                selectors.is_empty()
                    || selectors.iter().any(|s| s.matches(&r.scenario))
            })
            .collect::<Vec<_>>();
        let metas = selected
            .iter()
            .map(|r| r.scenario.metadata())
            .collect::<Vec<_>>();

        let started = Instant::now();
        reporter.on_run_start(&metas).await;

        if selected.is_empty() {
            let summary =
                Aggregator::new(max_failures).finish(started.elapsed());
            reporter.on_run_end(&summary).await;
            return summary;
        }

        let pool = Pool::spawn(PoolConfig {
            max_size: max_workers,
            program: worker_program,
            args: worker_args,
        });

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut pending = FuturesUnordered::new();
        for (i, registered) in selected.iter().enumerate() {
            let mut task = Task::new(
                format!("task-{i}"),
                registered.file,
                registered.index,
            );
            task.timeout = scenario_timeout;
            task.log_level = log_level.clone();

            let pool = pool.clone();
            let events_tx = events_tx.clone();
            pending.push(async move {
                (i, pool.execute(task, events_tx).await)
            });
        }
        drop(events_tx);

        let mut aggregator = Aggregator::new(max_failures);
        let mut started_tasks = HashSet::new();
        let mut cancelling = false;

        while !pending.is_empty() {
            tokio::select! {
                Some(event) = events.recv() => {
                    Self::on_event(&mut reporter, &mut started_tasks, event)
                        .await;
                }
                Some((i, outcome)) = pending.next() => {
                    // Events already emitted for this task are ordered
                    // before its resolution.
                    while let Ok(event) = events.try_recv() {
                        Self::on_event(
                            &mut reporter,
                            &mut started_tasks,
                            event,
                        )
                        .await;
                    }
                    let abort = Self::on_outcome(
                        &mut reporter,
                        &mut aggregator,
                        &mut started_tasks,
                        &metas[i],
                        i,
                        outcome,
                        cancelling,
                    )
                    .await;
                    if abort && !cancelling {
                        cancelling = true;
                        cancel.cancel();
                        pool.close().await;
                    }
                }
                () = cancel.cancelled(), if !cancelling => {
                    cancelling = true;
                    pool.close().await;
                }
            }
        }

        // Late events of already resolved tasks.
        while let Some(event) = events.recv().await {
            Self::on_event(&mut reporter, &mut started_tasks, event).await;
        }

        pool.close().await;

        let summary = aggregator.finish(started.elapsed());
        reporter.on_run_end(&summary).await;
        summary
    }

    /// Executes the selected scenarios and exits the process with the
    /// conventional exit code of the [`RunSummary`].
    pub async fn run_and_exit(self) {
        let summary = self.run().await;
        std::process::exit(summary.exit_code());
    }

    /// Dispatches one forwarded [`TaskEvent`] to the [`Reporter`].
    async fn on_event(
        reporter: &mut R,
        started_tasks: &mut HashSet<String>,
        event: TaskEvent,
    ) {
        match event {
            TaskEvent::ScenarioStart { task_id, scenario } => {
                drop(started_tasks.insert(task_id));
                reporter.on_scenario_start(&scenario).await;
            }
            TaskEvent::StepStart { scenario, step, .. } => {
                reporter.on_step_start(&scenario, &step).await;
            }
            TaskEvent::StepEnd { scenario, step, result, .. } => {
                if let Some(error) = &result.error {
                    reporter
                        .on_step_error(
                            &scenario,
                            &step,
                            error,
                            result.duration,
                        )
                        .await;
                }
                reporter.on_step_end(&scenario, &step, &result).await;
            }
            TaskEvent::ScenarioEnd { task_id, scenario, result } => {
                drop(started_tasks.remove(&task_id));
                if let Some(reason) = result.skip_reason() {
                    reporter
                        .on_scenario_skip(&scenario, reason, result.duration)
                        .await;
                }
                reporter.on_scenario_end(&scenario, &result).await;
            }
        }
    }

    /// Records one task outcome, synthesizing a failed [`ScenarioResult`]
    /// for pool-level errors.
    ///
    /// Returns whether the `max_failures` limit has been reached.
    async fn on_outcome(
        reporter: &mut R,
        aggregator: &mut Aggregator,
        started_tasks: &mut HashSet<String>,
        meta: &ScenarioMetadata,
        index: usize,
        outcome: Result<ScenarioResult, PoolError>,
        cancelling: bool,
    ) -> bool {
        match outcome {
            Ok(result) => aggregator.record(result),
            Err(PoolError::Closed) => {
                // Tasks rejected by the closing pool are discarded from the
                // summary; their scenarios never ran to an outcome.
                if !cancelling {
                    tracing::warn!(
                        scenario = %meta.name,
                        "task rejected by a closed pool",
                    );
                }
                aggregator.limit_reached()
            }
            Err(e) => {
                tracing::warn!(
                    scenario = %meta.name,
                    error = %e,
                    "scenario failed at the pool level",
                );
                let result = ScenarioResult {
                    metadata: meta.clone(),
                    status: ScenarioStatus::Failed,
                    duration: Duration::ZERO,
                    steps: Vec::new(),
                    error: Some((&e).into()),
                };
                // Keep start/end hooks paired for reporters that saw the
                // scenario start before its worker went away.
                if started_tasks.remove(&format!("task-{index}")) {
                    reporter.on_scenario_end(meta, &result).await;
                }
                aggregator.record(result)
            }
        }
    }
}
