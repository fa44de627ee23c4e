// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Parent-side handle of one worker child process.

use std::{fmt, io, process::Stdio, time::Duration};

use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand},
    sync::mpsc,
    task::JoinHandle,
    time,
};

use crate::{
    protocol::{self, Command, ProtocolViolation, WorkerMessage},
    runner::WORKER_ENV,
    PoolError,
};

use super::PoolConfig;

/// Pool-local identifier of a worker.
pub(crate) type WorkerId = u64;

/// How long a worker child is given to exit after `terminate`, before being
/// killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// What a worker's reader task feeds back to the coordinator.
#[derive(Debug)]
pub(crate) enum Feed {
    /// Decoded protocol message from the child's stdout.
    Message(WorkerId, WorkerMessage),

    /// The child's stdout broke the protocol.
    Violation(WorkerId, ProtocolViolation),

    /// The child's stdout reached end-of-file: the process is gone or going.
    Eof(WorkerId),
}

/// Scheduling state of a [`Worker`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum WorkerState {
    /// Spawned, but its `ready` handshake hasn't arrived yet.
    Starting,

    /// Ready and free to take a task.
    Idle,

    /// Executing the task with the carried id.
    Busy(String),
}

/// One worker child process and its protocol plumbing.
///
/// The child runs the harness binary itself (or the configured program) with
/// [`WORKER_ENV`] set, so it enters the worker loop instead of the parent
/// run.
pub(crate) struct Worker {
    /// Pool-local identifier.
    pub(crate) id: WorkerId,

    /// Scheduling state, owned by the coordinator.
    pub(crate) state: WorkerState,

    /// The child process itself.
    child: Child,

    /// Protocol pipe into the child; [`None`] once closed for termination.
    stdin: Option<ChildStdin>,

    /// Task draining the child's stdout into the coordinator.
    reader: JoinHandle<()>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Spawns a new worker child process and its reader task.
    pub(crate) fn spawn(
        id: WorkerId,
        config: &PoolConfig,
        feed: mpsc::UnboundedSender<Feed>,
    ) -> Result<Self, PoolError> {
        let program = match &config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        let mut child = ProcessCommand::new(program)
            .args(&config.args)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "no stdin handle")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "no stdout handle")
        })?;
        let reader = tokio::spawn(read_loop(id, stdout, feed));

        tracing::debug!(worker = id, "spawned worker process");

        Ok(Self {
            id,
            state: WorkerState::Starting,
            child,
            stdin: Some(stdin),
            reader,
        })
    }

    /// Writes one [`Command`] line into the child's stdin.
    ///
    /// An [`Err`] here means the child is effectively gone.
    pub(crate) async fn send(&mut self, cmd: &Command) -> io::Result<()> {
        let line = protocol::encode(cmd)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed")
        })?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    /// Gracefully terminates the child: `terminate` message, closed stdin,
    /// then a kill after [`EXIT_GRACE`].
    pub(crate) async fn terminate(mut self) -> Option<i32> {
        drop(self.send(&Command::Terminate).await);
        drop(self.stdin.take());
        self.reap().await
    }

    /// Awaits the child's exit, killing it after [`EXIT_GRACE`].
    pub(crate) async fn reap(mut self) -> Option<i32> {
        let status = match time::timeout(EXIT_GRACE, self.child.wait()).await
        {
            Ok(status) => status.ok(),
            Err(_elapsed) => {
                tracing::warn!(
                    worker = self.id,
                    "worker did not exit in time, killing it",
                );
                drop(self.child.start_kill());
                self.child.wait().await.ok()
            }
        };
        drop(self.reader.await);
        status.and_then(|s| s.code())
    }
}

/// Drains the child's stdout into the coordinator, one decoded message at a
/// time, until end-of-file.
async fn read_loop(
    id: WorkerId,
    stdout: ChildStdout,
    feed: mpsc::UnboundedSender<Feed>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let fed = match protocol::decode_worker_message(&line) {
                    Ok(Some(msg)) => feed.send(Feed::Message(id, msg)),
                    Ok(None) => Ok(()),
                    Err(violation) => {
                        feed.send(Feed::Violation(id, violation))
                    }
                };
                if fed.is_err() {
                    // Coordinator is gone, nothing left to report to.
                    return;
                }
            }
            Ok(None) => {
                drop(feed.send(Feed::Eof(id)));
                return;
            }
            Err(e) => {
                drop(feed.send(Feed::Violation(
                    id,
                    ProtocolViolation { detail: e.to_string() },
                )));
                drop(feed.send(Feed::Eof(id)));
                return;
            }
        }
    }
}
