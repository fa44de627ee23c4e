// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker child process loop.
//!
//! The [`Pool`] re-executes the harness binary with [`WORKER_ENV`] set; the
//! facade detects that and enters [`worker()`] instead of orchestrating.
//! The loop announces itself with a `ready` line, then serves `run` commands
//! one at a time: resolve the scenario from the registry, execute it through
//! the [`Engine`] with a reporter that forwards lifecycle events as protocol
//! lines, and finish with a terminal `result` (or `error`) message.
//!
//! Stdout belongs to the protocol; all diagnostics go to stderr via
//! [`tracing`].
//!
//! [`Engine`]: crate::Engine
//! [`Pool`]: crate::Pool

use std::{sync::Once, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    sync::mpsc,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    protocol::{self, Command, WorkerMessage},
    registry,
    scenario::{ScenarioMetadata, StepMetadata},
    Engine, ErrorObject, Reporter, ScenarioResult, StepResult,
};

/// Environment variable marking a process as a worker child.
pub const WORKER_ENV: &str = "PROBITAS_WORKER";

/// Environment variable seeding the worker's stderr log filter.
pub const LOG_ENV: &str = "PROBITAS_LOG";

/// Indicates whether the current process was spawned as a worker child.
#[must_use]
pub fn is_worker() -> bool {
    std::env::var_os(WORKER_ENV).is_some_and(|v| v != "0" && !v.is_empty())
}

/// Serves the worker protocol on stdin/stdout until `terminate` or
/// end-of-file, returning the process exit code.
pub async fn worker() -> i32 {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let (out, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_loop(out_rx));

    send(&out, &WorkerMessage::Ready);

    loop {
        let line = match stdin.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "failed to read stdin");
                break;
            }
        };
        match protocol::decode_command(&line) {
            Ok(Some(Command::Run {
                task_id,
                file_path,
                scenario_index,
                timeout,
                log_level,
            })) => {
                init_logging(log_level.as_deref());
                run_task(
                    &out,
                    task_id,
                    &file_path,
                    scenario_index,
                    timeout,
                )
                .await;
            }
            Ok(Some(Command::Terminate)) => break,
            Ok(None) => {}
            Err(violation) => {
                tracing::warn!(
                    error = %violation,
                    "skipping malformed command line",
                );
            }
        }
    }

    drop(out);
    drop(writer.await);
    0
}

/// Executes one `run` command and emits its terminal message.
async fn run_task(
    out: &mpsc::UnboundedSender<String>,
    task_id: String,
    file_path: &str,
    scenario_index: usize,
    timeout: Option<Duration>,
) {
    tracing::info!(%task_id, file_path, scenario_index, "executing scenario");

    let scenario = match registry::load(file_path, scenario_index) {
        Ok(scenario) => scenario,
        Err(e) => {
            send(out, &WorkerMessage::Error {
                task_id,
                error: ErrorObject::from_user(&e.into()),
            });
            return;
        }
    };

    let cancel = CancellationToken::new();
    let mut reporter = Forward { task_id: task_id.clone(), out: out.clone() };
    let fut = Engine::new(&mut reporter, cancel.clone()).run(&scenario);
    tokio::pin!(fut);

    let result = match timeout {
        Some(limit) => {
            tokio::select! {
                result = &mut fut => result,
                () = time::sleep(limit) => {
                    tracing::warn!(%task_id, "scenario timed out, cancelling");
                    cancel.cancel();
                    // The engine still unwinds its teardown stack.
                    fut.await
                }
            }
        }
        None => fut.await,
    };

    send(out, &WorkerMessage::Result { task_id, result });
}

/// [`Reporter`] forwarding lifecycle events as protocol lines.
///
/// Scenario skips carry no dedicated message: the parent synthesizes its
/// [`on_scenario_skip()`] hook out of the `scenario_end` result.
///
/// [`on_scenario_skip()`]: Reporter::on_scenario_skip
struct Forward {
    /// Correlation id echoed on every message.
    task_id: String,

    /// Line sink drained to stdout by the writer task.
    out: mpsc::UnboundedSender<String>,
}

#[async_trait(?Send)]
impl Reporter for Forward {
    async fn on_scenario_start(&mut self, scenario: &ScenarioMetadata) {
        send(&self.out, &WorkerMessage::ScenarioStart {
            task_id: self.task_id.clone(),
            scenario: scenario.clone(),
        });
    }

    async fn on_step_start(
        &mut self,
        scenario: &ScenarioMetadata,
        step: &StepMetadata,
    ) {
        send(&self.out, &WorkerMessage::StepStart {
            task_id: self.task_id.clone(),
            scenario: scenario.clone(),
            step: step.clone(),
        });
    }

    async fn on_step_end(
        &mut self,
        scenario: &ScenarioMetadata,
        step: &StepMetadata,
        result: &StepResult,
    ) {
        send(&self.out, &WorkerMessage::StepEnd {
            task_id: self.task_id.clone(),
            scenario: scenario.clone(),
            step: step.clone(),
            result: result.clone(),
        });
    }

    async fn on_scenario_end(
        &mut self,
        scenario: &ScenarioMetadata,
        result: &ScenarioResult,
    ) {
        send(&self.out, &WorkerMessage::ScenarioEnd {
            task_id: self.task_id.clone(),
            scenario: scenario.clone(),
            result: result.clone(),
        });
    }
}

/// Encodes and enqueues one protocol line.
fn send(out: &mpsc::UnboundedSender<String>, msg: &WorkerMessage) {
    match protocol::encode(msg) {
        // A dropped writer means we are already shutting down.
        Ok(line) => drop(out.send(line)),
        Err(e) => tracing::error!(error = %e, "failed to encode message"),
    }
}

/// Drains enqueued protocol lines to stdout, flushing per line.
async fn write_loop(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            tracing::error!(error = %e, "failed to write protocol line");
            return;
        }
        if let Err(e) = stdout.flush().await {
            tracing::error!(error = %e, "failed to flush protocol line");
            return;
        }
    }
}

/// Installs the stderr [`tracing`] subscriber once, preferring the explicit
/// `log_level` over the [`LOG_ENV`] environment filter.
fn init_logging(log_level: Option<&str>) {
    static INIT: Once = Once::new();
    let level = log_level.map(ToOwned::to_owned);
    INIT.call_once(move || {
        use tracing_subscriber::EnvFilter;

        let filter = level
            .as_deref()
            .and_then(|l| EnvFilter::try_new(l).ok())
            .or_else(|| EnvFilter::try_from_env(LOG_ENV).ok())
            .unwrap_or_else(|| EnvFilter::new("info"));
        drop(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
        );
    });
}
