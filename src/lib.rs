// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Integration-test orchestrator for Rust, with async support.
//!
//! A [`Scenario`] is an ordered sequence of named [`Step`]s sharing acquired
//! [`Resource`]s and accumulated per-step results. The harness binary
//! registers its scenarios, filters them by [`Selector`] expressions,
//! schedules them across isolated worker processes, executes each step under
//! timeout/retry control, streams lifecycle events to a pluggable
//! [`Reporter`], and exits with a conventional code derived from the
//! aggregated [`RunSummary`].
//!
//! Isolation is deliberate: user code often installs global state (env
//! vars, connection singletons), so every scenario runs in its own child
//! process, re-executed from the harness binary itself and spoken to over a
//! line-delimited JSON [`protocol`].
//!
//! ```rust,no_run
//! use probitas::{scenarios, Probitas, Scenario, Step};
//! use serde_json::json;
//!
//! scenarios! {
//!     Scenario::new("health check")
//!         .tag("api")
//!         .step(Step::sync("ping", |_| Ok(json!("pong"))))
//!         .step(Step::sync("echo", |ctx| Ok(ctx.previous().clone()))),
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     Probitas::new().run_and_exit().await;
//! }
//! ```

#![deny(
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts
)]
#![forbid(non_ascii_idents, unsafe_code)]
#![warn(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod cli;
mod context;
mod engine;
mod error;
pub mod pool;
mod probitas;
pub mod protocol;
pub mod registry;
pub mod reporter;
mod result;
pub mod runner;
pub mod scenario;
pub mod selector;

// Re-exported for the `scenarios!` macro expansion.
#[doc(hidden)]
pub use inventory;

#[doc(inline)]
pub use self::{
    context::Context,
    engine::Engine,
    error::{
        Cancelled, ErrorObject, LoadError, PoolError, SelectorSyntaxError,
        Skip, StepTimeout,
    },
    pool::{Pool, PoolConfig, Task, TaskEvent},
    probitas::Probitas,
    reporter::Reporter,
    result::{
        Aggregator, RunSummary, ScenarioResult, ScenarioStatus, StepResult,
        StepStatus, EXIT_EMPTY, EXIT_FAILED, EXIT_OK, EXIT_USAGE,
    },
    scenario::{
        Backoff, Cleanup, Entry, Resource, ResourceValue, RetryPolicy,
        Scenario, ScenarioMetadata, Setup, SourceLocation, Step,
        StepMetadata, StepOptions, StepOverrides,
    },
    selector::Selector,
};
