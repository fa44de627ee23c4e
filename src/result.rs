// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Execution results and their aggregation.
//!
//! Every executed [`Scenario`] yields a [`ScenarioResult`]; the
//! [`Aggregator`] folds them into the final [`RunSummary`] driving the
//! process exit code.
//!
//! [`Scenario`]: crate::Scenario

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    scenario::{duration_ms, ScenarioMetadata, StepMetadata},
    ErrorObject,
};

/// Exit code of a run with no failures and at least one executed
/// [`Scenario`].
///
/// [`Scenario`]: crate::Scenario
pub const EXIT_OK: i32 = 0;

/// Exit code of a run where some [`Scenario`] failed.
///
/// [`Scenario`]: crate::Scenario
pub const EXIT_FAILED: i32 = 1;

/// Exit code of a usage error (bad CLI arguments, malformed selector).
pub const EXIT_USAGE: i32 = 2;

/// Exit code of a run where the selectors matched no [`Scenario`]s.
///
/// [`Scenario`]: crate::Scenario
pub const EXIT_EMPTY: i32 = 4;

/// Outcome of a single [`Step`] execution.
///
/// [`Step`]: crate::Step
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The [`Step`] produced a value.
    ///
    /// [`Step`]: crate::Step
    Passed,

    /// All attempts failed, timed out or were cancelled.
    Failed,
}

/// Result of a single [`Step`], across all of its attempts.
///
/// [`Step`]: crate::Step
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StepResult {
    /// Projection of the executed [`Step`].
    ///
    /// [`Step`]: crate::Step
    pub metadata: StepMetadata,

    /// Outcome of the [`Step`].
    ///
    /// [`Step`]: crate::Step
    pub status: StepStatus,

    /// Total wall time across all attempts, including backoff delays.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,

    /// Produced value, when passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Failure of the last attempt, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl StepResult {
    /// Creates a passed [`StepResult`] carrying the produced `value`.
    #[must_use]
    pub fn passed(
        metadata: StepMetadata,
        duration: Duration,
        value: Value,
    ) -> Self {
        Self {
            metadata,
            status: StepStatus::Passed,
            duration,
            value: Some(value),
            error: None,
        }
    }

    /// Creates a failed [`StepResult`] carrying the `error` of the last
    /// attempt.
    #[must_use]
    pub fn failed(
        metadata: StepMetadata,
        duration: Duration,
        error: ErrorObject,
    ) -> Self {
        Self {
            metadata,
            status: StepStatus::Failed,
            duration,
            value: None,
            error: Some(error),
        }
    }

    /// Indicates whether this [`StepResult`] is a passed one.
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}

/// Outcome of a whole [`Scenario`] execution.
///
/// [`Scenario`]: crate::Scenario
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    /// Every [`Step`] passed and no engine-level error occurred.
    ///
    /// [`Step`]: crate::Step
    Passed,

    /// Some [`Step`] failed, or a resource/setup/cleanup raised.
    ///
    /// [`Step`]: crate::Step
    Failed,

    /// A [`Setup`] requested the [`Scenario`] to be skipped.
    ///
    /// [`Scenario`]: crate::Scenario
    /// [`Setup`]: crate::Setup
    Skipped,
}

/// Result of one [`Scenario`] execution inside its worker.
///
/// [`Scenario`]: crate::Scenario
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScenarioResult {
    /// Projection of the executed [`Scenario`].
    ///
    /// [`Scenario`]: crate::Scenario
    pub metadata: ScenarioMetadata,

    /// Outcome of the [`Scenario`].
    ///
    /// [`Scenario`]: crate::Scenario
    pub status: ScenarioStatus,

    /// Wall time of the whole execution, teardown included.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,

    /// One entry per attempted [`Step`], in execution order.
    ///
    /// A failed [`Step`] short-circuits the rest, so this list may be shorter
    /// than the [`Scenario`]'s declaration.
    ///
    /// [`Scenario`]: crate::Scenario
    /// [`Step`]: crate::Step
    pub steps: Vec<StepResult>,

    /// Engine-level failure, or the skip signal for a skipped [`Scenario`].
    ///
    /// [`Scenario`]: crate::Scenario
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl ScenarioResult {
    /// Reason the [`Scenario`] was skipped for, if it was.
    ///
    /// [`Scenario`]: crate::Scenario
    #[must_use]
    pub fn skip_reason(&self) -> Option<&str> {
        (self.status == ScenarioStatus::Skipped)
            .then(|| self.error.as_ref().map(|e| e.message.as_str()))
            .flatten()
    }
}

/// Aggregated outcome of a whole run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RunSummary {
    /// Number of executed [`Scenario`]s.
    ///
    /// [`Scenario`]: crate::Scenario
    pub total: usize,

    /// Number of passed [`Scenario`]s.
    ///
    /// [`Scenario`]: crate::Scenario
    pub passed: usize,

    /// Number of failed [`Scenario`]s.
    ///
    /// [`Scenario`]: crate::Scenario
    pub failed: usize,

    /// Number of skipped [`Scenario`]s.
    ///
    /// [`Scenario`]: crate::Scenario
    pub skipped: usize,

    /// Wall time of the whole run.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,

    /// Individual results, in completion order.
    pub scenarios: Vec<ScenarioResult>,
}

impl RunSummary {
    /// Indicates whether there were failures during execution.
    #[must_use]
    pub fn execution_has_failed(&self) -> bool {
        self.failed > 0
    }

    /// Conventional process exit code of this [`RunSummary`]:
    /// [`EXIT_FAILED`] if anything failed, [`EXIT_EMPTY`] if nothing ran,
    /// [`EXIT_OK`] otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            EXIT_FAILED
        } else if self.total == 0 {
            EXIT_EMPTY
        } else {
            EXIT_OK
        }
    }
}

/// Collector of [`ScenarioResult`]s, producing the final [`RunSummary`].
///
/// Also tracks the optional `max_failures` limit: once reached, the run loop
/// stops accepting new tasks and cancels the in-flight ones.
#[derive(Debug, Default)]
pub struct Aggregator {
    /// Collected results, in completion order.
    scenarios: Vec<ScenarioResult>,

    /// Limit of failed [`Scenario`]s to tolerate before aborting the run.
    ///
    /// [`Scenario`]: crate::Scenario
    max_failures: Option<usize>,

    /// Number of failed [`Scenario`]s seen so far.
    ///
    /// [`Scenario`]: crate::Scenario
    failed: usize,
}

impl Aggregator {
    /// Creates a new empty [`Aggregator`] tolerating up to `max_failures`
    /// failed [`Scenario`]s (`None` means no limit).
    ///
    /// [`Scenario`]: crate::Scenario
    #[must_use]
    pub fn new(max_failures: Option<usize>) -> Self {
        Self { scenarios: Vec::new(), max_failures, failed: 0 }
    }

    /// Records the given [`ScenarioResult`].
    ///
    /// Returns `true` once the `max_failures` limit has been reached.
    pub fn record(&mut self, result: ScenarioResult) -> bool {
        if result.status == ScenarioStatus::Failed {
            self.failed += 1;
        }
        self.scenarios.push(result);
        self.limit_reached()
    }

    /// Indicates whether the `max_failures` limit has been reached.
    #[must_use]
    pub fn limit_reached(&self) -> bool {
        self.max_failures.is_some_and(|max| self.failed >= max)
    }

    /// Folds everything recorded so far into a [`RunSummary`].
    #[must_use]
    pub fn finish(self, duration: Duration) -> RunSummary {
        let (mut passed, mut failed, mut skipped) = (0, 0, 0);
        for s in &self.scenarios {
            match s.status {
                ScenarioStatus::Passed => passed += 1,
                ScenarioStatus::Failed => failed += 1,
                ScenarioStatus::Skipped => skipped += 1,
            }
        }
        RunSummary {
            total: self.scenarios.len(),
            passed,
            failed,
            skipped,
            duration,
            scenarios: self.scenarios,
        }
    }
}
