// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Single-[`Scenario`] executor.
//!
//! Walks the [`Entry`] list in declaration order, initializing [`Resource`]s
//! and [`Setup`]s the first time execution passes their position, running
//! [`Step`]s under timeout/retry control, and finally unwinding the teardown
//! stack in reverse registration order — also when anything before failed.
//! Lifecycle events are emitted to the provided [`Reporter`] and awaited in
//! order.
//!
//! [`Resource`]: crate::Resource
//! [`Scenario`]: crate::Scenario
//! [`Setup`]: crate::Setup
//! [`Step`]: crate::Step

use std::fmt;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    scenario::{Cleanup, Entry, Scenario, Step, TeardownFn},
    Cancelled, Context, ErrorObject, Reporter, ScenarioMetadata,
    ScenarioResult, ScenarioStatus, Skip, StepMetadata, StepResult,
    StepTimeout,
};

/// How a [`Scenario`] ended up before teardown.
enum Outcome {
    /// Every attempted entry succeeded.
    Passed,

    /// Some [`Step`] failed; its error lives on the [`StepResult`].
    ///
    /// [`Step`]: crate::Step
    StepFailed,

    /// A [`Resource`] factory or a [`Setup`] raised.
    ///
    /// [`Resource`]: crate::Resource
    /// [`Setup`]: crate::Setup
    Failed(ErrorObject),

    /// A [`Setup`] requested the [`Scenario`] to be skipped.
    ///
    /// [`Scenario`]: crate::Scenario
    /// [`Setup`]: crate::Setup
    Skipped(String),
}

impl Outcome {
    /// Indicates whether this [`Outcome`] already carries a failure.
    fn is_failure(&self) -> bool {
        matches!(self, Self::StepFailed | Self::Failed(_))
    }
}

/// Deferred teardown obligation registered during forward execution.
struct Teardown {
    /// What is being torn down, for diagnostics.
    label: String,

    /// The callable to invoke exactly once.
    run: TeardownFn,
}

/// Executor of exactly one [`Scenario`].
///
/// [`Scenario`]: crate::Scenario
pub struct Engine<'r, R: ?Sized> {
    /// Sink the lifecycle events are emitted to.
    reporter: &'r mut R,

    /// Scenario-scoped cancellation signal, derived from the caller's.
    cancel: CancellationToken,
}

impl<R: ?Sized> fmt::Debug for Engine<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl<'r, R: Reporter + ?Sized> Engine<'r, R> {
    /// Creates a new [`Engine`] emitting events to the given [`Reporter`]
    /// and observing the given external cancellation signal.
    #[must_use]
    pub fn new(reporter: &'r mut R, cancel: CancellationToken) -> Self {
        Self { reporter, cancel }
    }

    /// Executes the given [`Scenario`] end-to-end and returns its result.
    ///
    /// Teardown always runs, whatever happened before it.
    ///
    /// [`Scenario`]: crate::Scenario
    pub async fn run(mut self, scenario: &Scenario) -> ScenarioResult {
        let meta = scenario.metadata();
        self.reporter.on_scenario_start(&meta).await;

        let started = Instant::now();
        let mut ctx = Context::new(self.cancel.clone());
        let mut teardown = Vec::new();
        let mut steps = Vec::new();
        let mut step_index = 0;
        let mut outcome = Outcome::Passed;

        for entry in &scenario.entries {
            match entry {
                Entry::Resource(res) => match (res.factory)(&mut ctx).await {
                    Ok(produced) => {
                        ctx.bind_resource(res.name.clone(), produced.value);
                        if let Some(run) = produced.disposer {
                            teardown.push(Teardown {
                                label: format!("resource `{}`", res.name),
                                run,
                            });
                        }
                    }
                    Err(e) => {
                        outcome = Outcome::Failed(ErrorObject::engine(
                            "ResourceError",
                            &e,
                        ));
                        break;
                    }
                },
                Entry::Setup(setup) => match (setup.run)(&mut ctx).await {
                    Ok(Cleanup::None) => {}
                    Ok(Cleanup::Run(run)) => {
                        teardown.push(Teardown {
                            label: "setup cleanup".to_owned(),
                            run,
                        });
                    }
                    Err(e) => {
                        outcome = match e.downcast_ref::<Skip>() {
                            Some(skip) => {
                                Outcome::Skipped(skip.reason.clone())
                            }
                            None => Outcome::Failed(ErrorObject::engine(
                                "SetupError",
                                &e,
                            )),
                        };
                        break;
                    }
                },
                Entry::Step(step) => {
                    let result = self
                        .run_step(&mut ctx, scenario, &meta, step, step_index)
                        .await;
                    step_index += 1;
                    let failed = !result.is_passed();
                    steps.push(result);
                    if failed {
                        outcome = Outcome::StepFailed;
                        break;
                    }
                }
            }
        }

        let teardown_error =
            Self::unwind(teardown, outcome.is_failure()).await;

        let (status, error) = match (outcome, teardown_error) {
            (Outcome::Passed, None) => (ScenarioStatus::Passed, None),
            (Outcome::Passed | Outcome::Skipped(_), Some(e)) => {
                (ScenarioStatus::Failed, Some(e))
            }
            (Outcome::Skipped(reason), None) => (
                ScenarioStatus::Skipped,
                Some(ErrorObject::new("Skip", reason)),
            ),
            (Outcome::StepFailed, _) => (ScenarioStatus::Failed, None),
            (Outcome::Failed(e), _) => (ScenarioStatus::Failed, Some(e)),
        };

        let duration = started.elapsed();
        let result = ScenarioResult {
            metadata: meta.clone(),
            status,
            duration,
            steps,
            error,
        };

        if let Some(reason) = result.skip_reason() {
            self.reporter.on_scenario_skip(&meta, reason, duration).await;
        }
        self.reporter.on_scenario_end(&meta, &result).await;

        result
    }

    /// Runs a single [`Step`] through its attempt loop.
    ///
    /// [`Step`]: crate::Step
    async fn run_step(
        &mut self,
        ctx: &mut Context,
        scenario: &Scenario,
        meta: &ScenarioMetadata,
        step: &Step,
        index: usize,
    ) -> StepResult {
        let step_meta = StepMetadata {
            index,
            name: step.name.clone(),
            options: step.overrides.over(scenario.options),
            origin: step.origin.clone(),
        };
        self.reporter.on_step_start(meta, &step_meta).await;

        let opts = step_meta.options;
        let started = Instant::now();
        let mut attempt = 1;
        let outcome = loop {
            if self.cancel.is_cancelled() {
                break Err(anyhow::Error::from(Cancelled));
            }

            let step_cancel = self.cancel.child_token();
            ctx.enter_step(index, step_cancel.clone());
            let attempted = {
                let mut fut = (step.run)(ctx);
                tokio::select! {
                    res = &mut fut => res,
                    () = step_cancel.cancelled() => Err(Cancelled.into()),
                    () = time::sleep(opts.timeout) => {
                        // Lets in-step clones of the token observe the edge,
                        // even though the attempt itself is abandoned.
                        step_cancel.cancel();
                        Err(StepTimeout { limit: opts.timeout }.into())
                    }
                }
            };
            ctx.leave_step(self.cancel.clone());

            match attempted {
                Ok(_) if self.cancel.is_cancelled() => {
                    // Completed despite cancellation: recorded as failed
                    // with the cancellation as the reason.
                    break Err(Cancelled.into());
                }
                Ok(value) => break Ok(value),
                Err(e) => {
                    if e.downcast_ref::<Cancelled>().is_some()
                        || attempt >= opts.retry.max_attempts
                    {
                        break Err(e);
                    }
                    tracing::debug!(
                        step = %step.name,
                        attempt,
                        error = format_args!("{e:#}"),
                        "step attempt failed, retrying",
                    );
                    tokio::select! {
                        () = time::sleep(opts.retry.backoff.delay(attempt)) => {}
                        () = self.cancel.cancelled() => {
                            break Err(Cancelled.into());
                        }
                    }
                    attempt += 1;
                }
            }
        };
        let duration = started.elapsed();

        let result = match outcome {
            Ok(value) => {
                ctx.push_result(value.clone());
                StepResult::passed(step_meta.clone(), duration, value)
            }
            Err(e) => {
                let error = ErrorObject::from_user(&e);
                self.reporter
                    .on_step_error(meta, &step_meta, &error, duration)
                    .await;
                StepResult::failed(step_meta.clone(), duration, error)
            }
        };
        self.reporter.on_step_end(meta, &step_meta, &result).await;

        result
    }

    /// Unwinds the teardown stack in reverse registration order, collecting
    /// errors instead of propagating them.
    ///
    /// The first error is returned to fail an otherwise-clean [`Scenario`];
    /// everything else (and everything after a prior failure) is only
    /// logged.
    ///
    /// [`Scenario`]: crate::Scenario
    async fn unwind(
        teardown: Vec<Teardown>,
        prior_failure: bool,
    ) -> Option<ErrorObject> {
        let mut first = None;
        for entry in teardown.into_iter().rev() {
            if let Err(e) = (entry.run)().await {
                if prior_failure || first.is_some() {
                    tracing::warn!(
                        what = %entry.label,
                        error = format_args!("{e:#}"),
                        "teardown raised",
                    );
                } else {
                    first =
                        Some(ErrorObject::engine("CleanupError", &e));
                }
            }
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc, time::Duration};

    use serde_json::{json, Value};

    use super::*;
    use crate::{
        reporter::Discard, Backoff, ResourceValue, RetryPolicy, Setup,
    };

    async fn run(scenario: &Scenario) -> ScenarioResult {
        let mut reporter = Discard;
        Engine::new(&mut reporter, CancellationToken::new())
            .run(scenario)
            .await
    }

    #[tokio::test]
    async fn records_one_result_per_attempted_step() {
        let scenario = Scenario::new("short-circuits")
            .step(Step::sync("first", |_| Ok(json!(1))))
            .step(Step::sync("second", |_| Err(anyhow::anyhow!("boom"))))
            .step(Step::sync("unreached", |_| Ok(Value::Null)));

        let result = run(&scenario).await;

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps[0].is_passed());
        assert!(!result.steps[1].is_passed());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn threads_previous_and_results_through_steps() {
        let scenario = Scenario::new("threading")
            .step(Step::sync("one", |_| Ok(json!(1))))
            .step(Step::sync("two", |ctx| Ok(ctx.previous().clone())))
            .step(Step::sync("three", |ctx| {
                let first = ctx.results()[0].as_i64().unwrap();
                let prev = ctx.previous().as_i64().unwrap();
                Ok(json!(first + prev))
            }));

        let result = run(&scenario).await;

        assert_eq!(result.status, ScenarioStatus::Passed);
        let values: Vec<_> =
            result.steps.iter().map(|s| s.value.clone().unwrap()).collect();
        assert_eq!(values, [json!(1), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn setup_skip_aborts_before_any_step() {
        let ran = Rc::new(Cell::new(false));
        let observed = Rc::clone(&ran);

        let scenario = Scenario::new("skipped")
            .setup(Setup::sync(|_| {
                Err(Skip::because("no server").into())
            }))
            .step(Step::sync("unreached", move |_| {
                observed.set(true);
                Ok(Value::Null)
            }));

        let result = run(&scenario).await;

        assert_eq!(result.status, ScenarioStatus::Skipped);
        assert_eq!(result.skip_reason(), Some("no server"));
        assert!(result.steps.is_empty());
        assert!(!ran.get());
    }

    #[tokio::test]
    async fn disposes_resources_in_reverse_creation_order() {
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));

        let scenario = Scenario::new("disposal")
            .resource(crate::Resource::sync("a", {
                let order = Rc::clone(&order);
                move |_| {
                    let order = Rc::clone(&order);
                    Ok(ResourceValue::new("a").on_dispose_sync(move || {
                        order.borrow_mut().push("a");
                        Ok(())
                    }))
                }
            }))
            .resource(crate::Resource::sync("b", {
                let order = Rc::clone(&order);
                move |ctx| {
                    assert!(ctx.has_resource("a"));
                    let order = Rc::clone(&order);
                    Ok(ResourceValue::new("b").on_dispose_sync(move || {
                        order.borrow_mut().push("b");
                        Ok(())
                    }))
                }
            }))
            .step(Step::sync("noop", |_| Ok(Value::Null)));

        let result = run(&scenario).await;

        assert_eq!(result.status, ScenarioStatus::Passed);
        assert_eq!(*order.borrow(), ["b", "a"]);
    }

    #[tokio::test]
    async fn teardown_failure_fails_a_clean_scenario() {
        let scenario = Scenario::new("dirty teardown")
            .setup(Setup::sync(|_| {
                Ok(Cleanup::run_sync(|| {
                    Err(anyhow::anyhow!("socket already closed"))
                }))
            }))
            .step(Step::sync("noop", |_| Ok(Value::Null)));

        let result = run(&scenario).await;

        assert_eq!(result.status, ScenarioStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.name, "CleanupError");
        assert!(error.message.contains("socket already closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_max_attempts() {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);

        let scenario = Scenario::new("retried")
            .options(crate::StepOptions {
                // Keep the test quick while preserving the formulas.
                timeout: Duration::from_secs(5),
                retry: RetryPolicy::new(1, Backoff::Linear),
            })
            .step(
                Step::sync("flaky", move |_| {
                    seen.set(seen.get() + 1);
                    Err(anyhow::anyhow!("boom"))
                })
                .retry(RetryPolicy::new(3, Backoff::Linear)),
            );

        let started = Instant::now();
        let result = run(&scenario).await;

        assert_eq!(calls.get(), 3);
        assert_eq!(result.status, ScenarioStatus::Failed);
        let error = result.steps[0].error.as_ref().unwrap();
        assert!(error.message.contains("boom"));
        // Linear backoff: 1s after the first attempt, 2s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(result.steps[0].duration >= Duration::from_secs(3));
    }
}
