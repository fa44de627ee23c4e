// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tools for observing lifecycle events of an execution.
//!
//! A [`Reporter`] is a set of optional hooks the engine awaits in emission
//! order, so within one [`Scenario`] the observed ordering is deterministic.
//! Across [`Scenario`]s running in parallel events interleave; every hook
//! carries its [`Scenario`]'s metadata, so implementations can demultiplex.
//!
//! [`Scenario`]: crate::Scenario

pub mod basic;
pub mod summarize;

use std::time::Duration;

use async_trait::async_trait;
use sealed::sealed;

use crate::{
    ErrorObject, RunSummary, ScenarioMetadata, ScenarioResult, StepMetadata,
    StepResult,
};

#[doc(inline)]
pub use self::{basic::Basic, summarize::Summarize};

/// Sink of lifecycle events of an execution.
///
/// All hooks default to no-ops, so implementations override only what they
/// observe. Hooks are infallible by signature: a reporter has no way to abort
/// the run, and whatever bookkeeping it does stays its own business.
#[async_trait(?Send)]
pub trait Reporter {
    /// Fired once before anything runs, with every selected [`Scenario`].
    ///
    /// [`Scenario`]: crate::Scenario
    async fn on_run_start(&mut self, _scenarios: &[ScenarioMetadata]) {}

    /// Fired when a [`Scenario`] starts executing.
    ///
    /// [`Scenario`]: crate::Scenario
    async fn on_scenario_start(&mut self, _scenario: &ScenarioMetadata) {}

    /// Fired when a [`Setup`] requested its [`Scenario`] to be skipped.
    ///
    /// Always followed by the [`on_scenario_end()`] hook carrying the full
    /// result.
    ///
    /// [`on_scenario_end()`]: Reporter::on_scenario_end
    /// [`Scenario`]: crate::Scenario
    /// [`Setup`]: crate::Setup
    async fn on_scenario_skip(
        &mut self,
        _scenario: &ScenarioMetadata,
        _reason: &str,
        _duration: Duration,
    ) {
    }

    /// Fired before the first attempt of a [`Step`].
    ///
    /// [`Step`]: crate::Step
    async fn on_step_start(
        &mut self,
        _scenario: &ScenarioMetadata,
        _step: &StepMetadata,
    ) {
    }

    /// Fired when a [`Step`] failed, right before its [`on_step_end()`].
    ///
    /// A shortcut for reporters interested in failures only.
    ///
    /// [`on_step_end()`]: Reporter::on_step_end
    /// [`Step`]: crate::Step
    async fn on_step_error(
        &mut self,
        _scenario: &ScenarioMetadata,
        _step: &StepMetadata,
        _error: &ErrorObject,
        _duration: Duration,
    ) {
    }

    /// Fired after every [`Step`], with its recorded [`StepResult`].
    ///
    /// [`Step`]: crate::Step
    async fn on_step_end(
        &mut self,
        _scenario: &ScenarioMetadata,
        _step: &StepMetadata,
        _result: &StepResult,
    ) {
    }

    /// Fired when a [`Scenario`] finished, teardown included.
    ///
    /// [`Scenario`]: crate::Scenario
    async fn on_scenario_end(
        &mut self,
        _scenario: &ScenarioMetadata,
        _result: &ScenarioResult,
    ) {
    }

    /// Fired once after everything ran (or the run was aborted), with
    /// whatever was collected.
    async fn on_run_end(&mut self, _summary: &RunSummary) {}
}

/// [`Reporter`] discarding every event.
///
/// Useful for runs where only the returned [`RunSummary`] matters.
#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

#[async_trait(?Send)]
impl Reporter for Discard {}

/// [`Reporter`] passing every event to both of the wrapped [`Reporter`]s.
#[derive(Clone, Copy, Debug)]
pub struct Tee<L, R> {
    /// First wrapped [`Reporter`].
    left: L,

    /// Second wrapped [`Reporter`].
    right: R,
}

impl<L, R> Tee<L, R> {
    /// Creates a new [`Tee`] of the two given [`Reporter`]s.
    #[must_use]
    pub const fn new(left: L, right: R) -> Self {
        Self { left, right }
    }

    /// Unwraps both [`Reporter`]s.
    #[must_use]
    pub fn into_inner(self) -> (L, R) {
        (self.left, self.right)
    }
}

#[async_trait(?Send)]
impl<L: Reporter, R: Reporter> Reporter for Tee<L, R> {
    async fn on_run_start(&mut self, scenarios: &[ScenarioMetadata]) {
        self.left.on_run_start(scenarios).await;
        self.right.on_run_start(scenarios).await;
    }

    async fn on_scenario_start(&mut self, scenario: &ScenarioMetadata) {
        self.left.on_scenario_start(scenario).await;
        self.right.on_scenario_start(scenario).await;
    }

    async fn on_scenario_skip(
        &mut self,
        scenario: &ScenarioMetadata,
        reason: &str,
        duration: Duration,
    ) {
        self.left.on_scenario_skip(scenario, reason, duration).await;
        self.right.on_scenario_skip(scenario, reason, duration).await;
    }

    async fn on_step_start(
        &mut self,
        scenario: &ScenarioMetadata,
        step: &StepMetadata,
    ) {
        self.left.on_step_start(scenario, step).await;
        self.right.on_step_start(scenario, step).await;
    }

    async fn on_step_error(
        &mut self,
        scenario: &ScenarioMetadata,
        step: &StepMetadata,
        error: &ErrorObject,
        duration: Duration,
    ) {
        self.left.on_step_error(scenario, step, error, duration).await;
        self.right.on_step_error(scenario, step, error, duration).await;
    }

    async fn on_step_end(
        &mut self,
        scenario: &ScenarioMetadata,
        step: &StepMetadata,
        result: &StepResult,
    ) {
        self.left.on_step_end(scenario, step, result).await;
        self.right.on_step_end(scenario, step, result).await;
    }

    async fn on_scenario_end(
        &mut self,
        scenario: &ScenarioMetadata,
        result: &ScenarioResult,
    ) {
        self.left.on_scenario_end(scenario, result).await;
        self.right.on_scenario_end(scenario, result).await;
    }

    async fn on_run_end(&mut self, summary: &RunSummary) {
        self.left.on_run_end(summary).await;
        self.right.on_run_end(summary).await;
    }
}

/// Extension of a [`Reporter`] for composing observers.
#[sealed]
pub trait Ext: Sized {
    /// Attaches the provided `other` [`Reporter`], passing every event to
    /// both of them.
    #[must_use]
    fn tee<R: Reporter>(self, other: R) -> Tee<Self, R>;

    /// Wraps this [`Reporter`] to collect every scenario result passing
    /// through.
    ///
    /// See [`Summarize`] for more information.
    #[must_use]
    fn summarized(self) -> Summarize<Self>;
}

#[sealed]
impl<T: Reporter> Ext for T {
    fn tee<R: Reporter>(self, other: R) -> Tee<Self, R> {
        Tee::new(self, other)
    }

    fn summarized(self) -> Summarize<Self> {
        Summarize::new(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::StepOptions;

    #[derive(Clone, Default)]
    struct Counting {
        seen: Rc<RefCell<Vec<&'static str>>>,
    }

    #[async_trait(?Send)]
    impl Reporter for Counting {
        async fn on_scenario_start(&mut self, _: &ScenarioMetadata) {
            self.seen.borrow_mut().push("scenario_start");
        }

        async fn on_run_end(&mut self, _: &RunSummary) {
            self.seen.borrow_mut().push("run_end");
        }
    }

    fn meta() -> ScenarioMetadata {
        ScenarioMetadata {
            name: "observed".into(),
            tags: Vec::new(),
            options: StepOptions::default(),
            steps: Vec::new(),
            origin: None,
        }
    }

    #[tokio::test]
    async fn tee_feeds_both_reporters() {
        let left = Counting::default();
        let right = Counting::default();
        let mut tee = left.clone().tee(right.clone());

        tee.on_scenario_start(&meta()).await;
        tee.on_run_start(&[]).await;

        assert_eq!(*left.seen.borrow(), ["scenario_start"]);
        assert_eq!(*right.seen.borrow(), ["scenario_start"]);
    }

    #[tokio::test]
    async fn discard_observes_nothing_and_defaults_are_no_ops() {
        let mut discard = Discard;
        discard.on_scenario_start(&meta()).await;
        discard.on_run_start(&[]).await;

        // Unimplemented hooks on a real reporter are no-ops too.
        let counting = Counting::default();
        let mut reporter = counting.clone();
        reporter.on_run_start(&[meta()]).await;
        assert!(counting.seen.borrow().is_empty());
    }
}
