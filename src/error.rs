// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types shared across the orchestrator core.
//!
//! User code inside [`Step`]s, [`Resource`] factories and [`Setup`]s fails
//! with an opaque [`anyhow::Error`]. The distinguished sentinels defined here
//! ([`Skip`], [`StepTimeout`], [`Cancelled`]) are recovered from it via
//! [`downcast_ref()`] and drive the engine's control flow. Everything that
//! crosses a process boundary is flattened into an [`ErrorObject`].
//!
//! [`downcast_ref()`]: anyhow::Error::downcast_ref
//! [`Resource`]: crate::Resource
//! [`Setup`]: crate::Setup
//! [`Step`]: crate::Step

use std::{collections::BTreeMap, io, time::Duration};

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// Sentinel returned by a [`Setup`] to mark its [`Scenario`] as neither
/// passed nor failed.
///
/// ```rust
/// # use probitas::{Cleanup, Skip};
/// # fn no_server() -> bool { true }
/// # fn setup() -> anyhow::Result<Cleanup> {
/// if no_server() {
///     return Err(Skip::because("no server available").into());
/// }
/// # Ok(Cleanup::None)
/// # }
/// ```
///
/// [`Scenario`]: crate::Scenario
/// [`Setup`]: crate::Setup
#[derive(Clone, Debug, Display, Error)]
#[display("scenario skipped: {reason}")]
pub struct Skip {
    /// Human-readable reason for skipping.
    pub reason: String,
}

impl Skip {
    /// Creates a new [`Skip`] signal with the provided `reason`.
    #[must_use]
    pub fn because(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Failure of a [`Step`] attempt that exceeded its configured timeout.
///
/// A kind of step failure: it's recorded on the [`StepResult`] and is subject
/// to the retry policy like any other failure.
///
/// [`Step`]: crate::Step
/// [`StepResult`]: crate::StepResult
#[derive(Clone, Copy, Debug, Display, Error)]
#[display("step timed out after {}", humantime::format_duration(*limit))]
pub struct StepTimeout {
    /// The exceeded limit.
    pub limit: Duration,
}

/// Failure of whatever work was active when a parent cancellation fired.
///
/// Cancellation has three sources: a scenario timeout, an explicit external
/// cancel, and the pool reaching `max_failures`. All of them surface as this
/// sentinel on the affected [`StepResult`].
///
/// [`StepResult`]: crate::StepResult
#[derive(Clone, Copy, Debug, Default, Display, Error)]
#[display("execution cancelled")]
pub struct Cancelled;

/// Failure to resolve a scenario out of the registry.
///
/// The worker reports this back to the parent as a terminal `error` protocol
/// message rather than a [`ScenarioResult`].
///
/// [`ScenarioResult`]: crate::ScenarioResult
#[derive(Clone, Debug, Display, Error)]
pub enum LoadError {
    /// No scenarios are registered under the requested file.
    #[display("no scenarios are registered for file `{file}`")]
    UnknownFile {
        /// Requested declaration file.
        #[error(not(source))]
        file: String,
    },

    /// The file is known, but the requested index exceeds its scenario list.
    #[display(
        "file `{file}` declares {len} scenario(s), index {index} is out of \
         range"
    )]
    IndexOutOfRange {
        /// Requested declaration file.
        #[error(not(source))]
        file: String,

        /// Requested scenario index.
        index: usize,

        /// Number of scenarios the file actually declares.
        len: usize,
    },
}

/// Malformed selector expression.
///
/// This is a usage error: the CLI layer reports it and exits with code `2`
/// without running anything.
#[derive(Clone, Debug, Display, Eq, Error, PartialEq)]
pub enum SelectorSyntaxError {
    /// Atom like `tag:` or a bare `!` carrying no value to match.
    #[display("selector atom `{atom}` has an empty value")]
    EmptyValue {
        /// Offending atom, as written.
        #[error(not(source))]
        atom: String,
    },

    /// Atom like `:api` with a `:` but nothing before it.
    #[display("selector atom `{atom}` has an empty type prefix")]
    EmptyType {
        /// Offending atom, as written.
        #[error(not(source))]
        atom: String,
    },

    /// Atom with a type prefix other than `tag` or `name`.
    #[display("selector atom `{atom}` has unknown type `{ty}`")]
    UnknownType {
        /// Offending atom, as written.
        #[error(not(source))]
        atom: String,

        /// The unrecognized type prefix.
        ty: String,
    },

    /// Atom with a `!` anywhere but the leading negation position.
    #[display(
        "selector atom `{atom}` has `!` outside the leading negation \
         position"
    )]
    MisplacedNegation {
        /// Offending atom, as written.
        #[error(not(source))]
        atom: String,
    },
}

/// Failure surfaced by the worker [`Pool`] on an individual task future.
///
/// The [`Pool`] itself keeps running through any of these.
///
/// [`Pool`]: crate::Pool
#[derive(Debug, Display, Error)]
pub enum PoolError {
    /// The pool has been closed; queued tasks are rejected with this.
    #[display("worker pool is closed")]
    Closed,

    /// Spawning a worker child process failed.
    #[display("failed to spawn worker process: {_0}")]
    Spawn(io::Error),

    /// A worker child process died while its task was still in flight.
    #[display("worker {id} exited unexpectedly (exit code: {code:?})")]
    WorkerCrash {
        /// Pool-local identifier of the crashed worker.
        #[error(not(source))]
        id: u64,

        /// Exit code of the child, if it exited at all.
        code: Option<i32>,
    },

    /// A worker broke the line-delimited JSON protocol.
    #[display("worker {id} protocol violation: {detail}")]
    Protocol {
        /// Pool-local identifier of the misbehaving worker.
        #[error(not(source))]
        id: u64,

        /// What exactly went wrong.
        detail: String,
    },

    /// The worker reported a terminal engine-level failure for the task
    /// (e.g. the scenario file failed to load).
    #[display("{_0}")]
    Task(ErrorObject),
}

impl From<io::Error> for PoolError {
    fn from(e: io::Error) -> Self {
        Self::Spawn(e)
    }
}

/// Cross-process error encoding.
///
/// No attempt is made to reconstruct language-native error types on the
/// receiving side: only the `name`, the `message`, an optional `stack` of
/// underlying causes and an optional map of scalar `attributes` survive the
/// boundary. Reporters render these directly.
#[derive(Clone, Debug, Deserialize, Display, Error, PartialEq, Serialize)]
#[display("{name}: {message}")]
pub struct ErrorObject {
    /// Error kind, e.g. `Timeout`, `Cancelled`, `ResourceError`.
    pub name: String,

    /// Human-readable message.
    pub message: String,

    /// Messages of the underlying cause chain, outermost first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,

    /// Scalar attributes attached to the error.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ErrorObject {
    /// Creates a new [`ErrorObject`] out of a `name` and a `message`.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Flattens the given user-code error, deriving the `name` from the
    /// sentinel type it carries (if any).
    #[must_use]
    pub fn from_user(err: &anyhow::Error) -> Self {
        let name = if err.downcast_ref::<Skip>().is_some() {
            "Skip"
        } else if err.downcast_ref::<StepTimeout>().is_some() {
            "Timeout"
        } else if err.downcast_ref::<Cancelled>().is_some() {
            "Cancelled"
        } else if err.downcast_ref::<LoadError>().is_some() {
            "LoadError"
        } else {
            "Error"
        };
        Self { name: name.into(), ..Self::flatten(err) }
    }

    /// Flattens the given user-code error under an explicit engine-level
    /// `name` (`ResourceError`, `SetupError`, `CleanupError`, ...).
    #[must_use]
    pub fn engine(name: impl Into<String>, err: &anyhow::Error) -> Self {
        Self { name: name.into(), ..Self::flatten(err) }
    }

    /// Indicates whether `self` and `other` describe the same failure.
    ///
    /// Errors are compared by `name` and `message` only, as the rest doesn't
    /// reliably survive a process boundary.
    #[must_use]
    pub fn same_failure(&self, other: &Self) -> bool {
        self.name == other.name && self.message == other.message
    }

    fn flatten(err: &anyhow::Error) -> Self {
        let stack = err
            .chain()
            .skip(1)
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        Self {
            name: String::new(),
            message: err.to_string(),
            stack: (!stack.is_empty()).then_some(stack),
            attributes: BTreeMap::new(),
        }
    }
}

impl From<&PoolError> for ErrorObject {
    fn from(e: &PoolError) -> Self {
        match e {
            PoolError::Closed => Self::new("PoolClosed", e.to_string()),
            PoolError::Spawn(_) | PoolError::Protocol { .. } => {
                Self::new("PoolError", e.to_string())
            }
            PoolError::WorkerCrash { .. } => {
                Self::new("WorkerCrash", e.to_string())
            }
            PoolError::Task(obj) => obj.clone(),
        }
    }
}
