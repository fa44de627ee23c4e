// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! [`Reporter`]-wrapper for collecting a summary of execution.

use std::time::Duration;

use async_trait::async_trait;
use derive_more::Deref;

use crate::{
    Aggregator, ErrorObject, RunSummary, ScenarioMetadata, ScenarioResult,
    ScenarioStatus, StepMetadata, StepResult,
};

use super::Reporter;

/// Wrapper for a [`Reporter`] collecting every [`ScenarioResult`] passing
/// through, so an execution summary can be produced afterwards.
///
/// Events are forwarded to the wrapped [`Reporter`] untouched; the wrapper
/// only observes `scenario_end`s. Useful when the wrapped reporter doesn't
/// track outcomes itself and the caller still needs a [`RunSummary`] (or
/// just an exit decision) out of the run it drove.
#[derive(Debug, Deref)]
pub struct Summarize<R> {
    /// Original [`Reporter`] to forward events to.
    #[deref]
    reporter: R,

    /// Results collected so far, in completion order.
    scenarios: Vec<ScenarioResult>,
}

impl<R> Summarize<R> {
    /// Wraps the given [`Reporter`] into a [`Summarize`]d version.
    #[must_use]
    pub fn new(reporter: R) -> Self {
        Self { reporter, scenarios: Vec::new() }
    }

    /// Unwraps the original [`Reporter`].
    #[must_use]
    pub fn into_inner(self) -> R {
        self.reporter
    }

    /// Results collected so far, in completion order.
    #[must_use]
    pub fn scenarios(&self) -> &[ScenarioResult] {
        &self.scenarios
    }

    /// Indicates whether there were failures among the collected results.
    #[must_use]
    pub fn execution_has_failed(&self) -> bool {
        self.scenarios
            .iter()
            .any(|s| s.status == ScenarioStatus::Failed)
    }

    /// Folds everything collected so far into a [`RunSummary`] with the
    /// given wall-time `duration`.
    #[must_use]
    pub fn summary(&self, duration: Duration) -> RunSummary {
        let mut aggregator = Aggregator::new(None);
        for scenario in &self.scenarios {
            let _ = aggregator.record(scenario.clone());
        }
        aggregator.finish(duration)
    }
}

#[async_trait(?Send)]
impl<R: Reporter> Reporter for Summarize<R> {
    async fn on_run_start(&mut self, scenarios: &[ScenarioMetadata]) {
        self.reporter.on_run_start(scenarios).await;
    }

    async fn on_scenario_start(&mut self, scenario: &ScenarioMetadata) {
        self.reporter.on_scenario_start(scenario).await;
    }

    async fn on_scenario_skip(
        &mut self,
        scenario: &ScenarioMetadata,
        reason: &str,
        duration: Duration,
    ) {
        self.reporter.on_scenario_skip(scenario, reason, duration).await;
    }

    async fn on_step_start(
        &mut self,
        scenario: &ScenarioMetadata,
        step: &StepMetadata,
    ) {
        self.reporter.on_step_start(scenario, step).await;
    }

    async fn on_step_error(
        &mut self,
        scenario: &ScenarioMetadata,
        step: &StepMetadata,
        error: &ErrorObject,
        duration: Duration,
    ) {
        self.reporter.on_step_error(scenario, step, error, duration).await;
    }

    async fn on_step_end(
        &mut self,
        scenario: &ScenarioMetadata,
        step: &StepMetadata,
        result: &StepResult,
    ) {
        self.reporter.on_step_end(scenario, step, result).await;
    }

    async fn on_scenario_end(
        &mut self,
        scenario: &ScenarioMetadata,
        result: &ScenarioResult,
    ) {
        self.scenarios.push(result.clone());
        self.reporter.on_scenario_end(scenario, result).await;
    }

    async fn on_run_end(&mut self, summary: &RunSummary) {
        self.reporter.on_run_end(summary).await;
    }
}

#[cfg(test)]
mod tests {
    use super::{super::Discard, *};
    use crate::StepOptions;

    fn meta(name: &str) -> ScenarioMetadata {
        ScenarioMetadata {
            name: name.into(),
            tags: Vec::new(),
            options: StepOptions::default(),
            steps: Vec::new(),
            origin: None,
        }
    }

    fn result(name: &str, status: ScenarioStatus) -> ScenarioResult {
        ScenarioResult {
            metadata: meta(name),
            status,
            duration: Duration::from_millis(3),
            steps: Vec::new(),
            error: (status == ScenarioStatus::Skipped)
                .then(|| ErrorObject::new("Skip", "not today")),
        }
    }

    #[tokio::test]
    async fn collects_results_as_they_end() {
        let mut summarize = Summarize::new(Discard);

        for (name, status) in [
            ("a", ScenarioStatus::Passed),
            ("b", ScenarioStatus::Failed),
            ("c", ScenarioStatus::Skipped),
        ] {
            let result = result(name, status);
            summarize
                .on_scenario_end(&result.metadata.clone(), &result)
                .await;
        }

        assert_eq!(summarize.scenarios().len(), 3);
        assert!(summarize.execution_has_failed());

        let summary = summarize.summary(Duration::from_millis(9));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.duration, Duration::from_millis(9));
    }

    #[tokio::test]
    async fn clean_runs_have_no_failures() {
        use super::super::Ext as _;

        let mut summarize = Discard.summarized();

        let passed = result("only", ScenarioStatus::Passed);
        summarize
            .on_scenario_end(&passed.metadata.clone(), &passed)
            .await;

        assert!(!summarize.execution_has_failed());
        assert_eq!(summarize.summary(Duration::ZERO).exit_code(), 0);
    }
}
