use std::{cell::RefCell, rc::Rc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt as _;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use probitas::{
    Backoff, Cleanup, Engine, ErrorObject, Reporter, Resource,
    ResourceValue, RetryPolicy, RunSummary, Scenario, ScenarioMetadata,
    ScenarioResult, ScenarioStatus, Setup, Skip, Step, StepMetadata,
    StepResult,
};

/// Reporter recording a flat trace of every observed hook.
#[derive(Clone, Debug, Default)]
struct Recording {
    trace: Rc<RefCell<Vec<String>>>,
}

impl Recording {
    fn trace(&self) -> Vec<String> {
        self.trace.borrow().clone()
    }

    fn push(&self, entry: String) {
        self.trace.borrow_mut().push(entry);
    }
}

#[async_trait(?Send)]
impl Reporter for Recording {
    async fn on_run_start(&mut self, scenarios: &[ScenarioMetadata]) {
        self.push(format!("run_start:{}", scenarios.len()));
    }

    async fn on_scenario_start(&mut self, scenario: &ScenarioMetadata) {
        self.push(format!("scenario_start:{}", scenario.name));
    }

    async fn on_scenario_skip(
        &mut self,
        scenario: &ScenarioMetadata,
        reason: &str,
        _duration: Duration,
    ) {
        self.push(format!("scenario_skip:{}:{reason}", scenario.name));
    }

    async fn on_step_start(
        &mut self,
        _scenario: &ScenarioMetadata,
        step: &StepMetadata,
    ) {
        self.push(format!("step_start:{}", step.name));
    }

    async fn on_step_error(
        &mut self,
        _scenario: &ScenarioMetadata,
        step: &StepMetadata,
        error: &ErrorObject,
        _duration: Duration,
    ) {
        self.push(format!("step_error:{}:{}", step.name, error.name));
    }

    async fn on_step_end(
        &mut self,
        _scenario: &ScenarioMetadata,
        step: &StepMetadata,
        result: &StepResult,
    ) {
        self.push(format!("step_end:{}:{:?}", step.name, result.status));
    }

    async fn on_scenario_end(
        &mut self,
        scenario: &ScenarioMetadata,
        result: &ScenarioResult,
    ) {
        self.push(format!(
            "scenario_end:{}:{:?}",
            scenario.name, result.status,
        ));
    }

    async fn on_run_end(&mut self, summary: &RunSummary) {
        self.push(format!("run_end:{}", summary.total));
    }
}

async fn run(scenario: &Scenario) -> (ScenarioResult, Vec<String>) {
    run_with_cancel(scenario, CancellationToken::new()).await
}

async fn run_with_cancel(
    scenario: &Scenario,
    cancel: CancellationToken,
) -> (ScenarioResult, Vec<String>) {
    let mut reporter = Recording::default();
    let result = Engine::new(&mut reporter, cancel).run(scenario).await;
    let trace = reporter.trace();
    (result, trace)
}

// A scenario with one step returning a JSON object: the value lands on the
// step result as-is.
#[tokio::test]
async fn single_step_value_is_captured() {
    let scenario = Scenario::new("single")
        .step(Step::sync("produce", |_| Ok(json!({"x": 1}))));

    let (result, _) = run(&scenario).await;

    assert_eq!(result.status, ScenarioStatus::Passed);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].value, Some(json!({"x": 1})));
    assert_eq!(result.steps[0].metadata.index, 0);
}

// Steps observe the previous step's value and the accumulated results.
#[tokio::test]
async fn context_chains_results_deterministically() {
    let scenario = Scenario::new("chain")
        .step(Step::sync("one", |_| Ok(json!(1))))
        .step(Step::sync("two", |ctx| Ok(ctx.previous().clone())))
        .step(Step::sync("three", |ctx| {
            let first = ctx.results()[0].as_i64().unwrap();
            let prev = ctx.previous().as_i64().unwrap();
            Ok(json!(first + prev))
        }));

    let (result, _) = run(&scenario).await;

    let values = result
        .steps
        .iter()
        .map(|s| s.value.clone().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(values, [json!(1), json!(1), json!(2)]);
}

// Three attempts with linear backoff: the failure is final, the side-effect
// counter shows every attempt, and the elapsed time covers the 1s + 2s
// delays.
#[tokio::test(start_paused = true)]
async fn failing_step_retries_with_linear_backoff() {
    let attempts = Rc::new(RefCell::new(0));
    let seen = Rc::clone(&attempts);

    let scenario = Scenario::new("flaky").step(
        Step::sync("boom", move |_| {
            *seen.borrow_mut() += 1;
            Err(anyhow::anyhow!("boom"))
        })
        .retry(RetryPolicy::new(3, Backoff::Linear)),
    );

    let started = Instant::now();
    let (result, trace) = run(&scenario).await;

    assert_eq!(*attempts.borrow(), 3);
    assert_eq!(result.status, ScenarioStatus::Failed);
    let error = result.steps[0].error.as_ref().unwrap();
    assert!(error.message.contains("boom"));
    assert!(started.elapsed() >= Duration::from_millis(3000));
    assert!(result.steps[0].duration >= Duration::from_millis(3000));
    // The retry loop is invisible to the reporter: one start, one end.
    assert_eq!(
        trace.iter().filter(|t| t.starts_with("step_start")).count(),
        1,
    );
}

// A single allowed attempt means no backoff delay at all.
#[tokio::test(start_paused = true)]
async fn single_attempt_observes_no_backoff() {
    let scenario = Scenario::new("no retry")
        .step(Step::sync("boom", |_| Err(anyhow::anyhow!("boom"))));

    let started = Instant::now();
    let (result, _) = run(&scenario).await;

    assert_eq!(result.status, ScenarioStatus::Failed);
    assert!(started.elapsed() < Duration::from_millis(900));
}

// A sleeping step trips its timeout and is recorded as a Timeout failure.
#[tokio::test(start_paused = true)]
async fn slow_step_fails_with_timeout() {
    let scenario = Scenario::new("slow").step(
        Step::new("nap", |_| {
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Value::Null)
            }
            .boxed_local()
        })
        .timeout(Duration::from_millis(50)),
    );

    let started = Instant::now();
    let (result, trace) = run(&scenario).await;

    assert_eq!(result.status, ScenarioStatus::Failed);
    let error = result.steps[0].error.as_ref().unwrap();
    assert_eq!(error.name, "Timeout");
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(trace.contains(&"step_error:nap:Timeout".to_owned()));
}

// A setup raising Skip aborts before any step and fires the skip hook.
#[tokio::test]
async fn skip_signal_short_circuits_the_scenario() {
    let scenario = Scenario::new("unreachable backend")
        .setup(Setup::sync(|_| Err(Skip::because("no server").into())))
        .step(Step::sync("unreached", |_| {
            panic!("step must not run");
        }));

    let (result, trace) = run(&scenario).await;

    assert_eq!(result.status, ScenarioStatus::Skipped);
    assert!(result.steps.is_empty());
    assert_eq!(
        trace,
        [
            "scenario_start:unreachable backend",
            "scenario_skip:unreachable backend:no server",
            "scenario_end:unreachable backend:Skipped",
        ],
    );
}

// Resource B builds on resource A through the context; disposal happens in
// reverse creation order, steps notwithstanding.
#[tokio::test]
async fn dependent_resources_dispose_in_reverse_order() {
    let order = Rc::new(RefCell::new(Vec::new()));

    let a_order = Rc::clone(&order);
    let b_order = Rc::clone(&order);
    let scenario = Scenario::new("disposal order")
        .resource(Resource::sync("conn", move |_| {
            let order = Rc::clone(&a_order);
            Ok(ResourceValue::new("connection").on_dispose_sync(move || {
                order.borrow_mut().push("conn");
                Ok(())
            }))
        }))
        .resource(Resource::sync("session", move |ctx| {
            assert!(
                ctx.resource::<&str>("conn").is_some(),
                "session factory must observe conn",
            );
            let order = Rc::clone(&b_order);
            Ok(ResourceValue::new("session").on_dispose_sync(move || {
                order.borrow_mut().push("session");
                Ok(())
            }))
        }))
        .step(Step::sync("use both", |ctx| {
            assert!(ctx.has_resource("conn"));
            assert!(ctx.has_resource("session"));
            Ok(Value::Null)
        }));

    let (result, _) = run(&scenario).await;

    assert_eq!(result.status, ScenarioStatus::Passed);
    assert_eq!(*order.borrow(), ["session", "conn"]);
}

// Teardown runs for everything registered before the failure point, and a
// failed step leaves later entries untouched.
#[tokio::test]
async fn teardown_runs_after_a_mid_scenario_failure() {
    let cleaned = Rc::new(RefCell::new(Vec::new()));

    let setup_cleaned = Rc::clone(&cleaned);
    let resource_cleaned = Rc::clone(&cleaned);
    let scenario = Scenario::new("failing middle")
        .resource(Resource::sync("db", move |_| {
            let cleaned = Rc::clone(&resource_cleaned);
            Ok(ResourceValue::new(42_u32).on_dispose_sync(move || {
                cleaned.borrow_mut().push("db");
                Ok(())
            }))
        }))
        .setup(Setup::sync(move |_| {
            let cleaned = Rc::clone(&setup_cleaned);
            Ok(Cleanup::run_sync(move || {
                cleaned.borrow_mut().push("setup");
                Ok(())
            }))
        }))
        .step(Step::sync("explode", |_| Err(anyhow::anyhow!("kaput"))))
        .step(Step::sync("unreached", |_| Ok(Value::Null)));

    let (result, _) = run(&scenario).await;

    assert_eq!(result.status, ScenarioStatus::Failed);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(*cleaned.borrow(), ["setup", "db"]);
    // The failure belongs to the step, not the scenario-level error slot.
    assert!(result.error.is_none());
}

// An already-cancelled parent token fails the first step with Cancelled,
// still running teardown.
#[tokio::test]
async fn external_cancellation_is_recorded_on_the_active_step() {
    let cleaned = Rc::new(RefCell::new(false));

    let observed = Rc::clone(&cleaned);
    let scenario = Scenario::new("cancelled")
        .setup(Setup::sync(move |_| {
            let observed = Rc::clone(&observed);
            Ok(Cleanup::run_sync(move || {
                *observed.borrow_mut() = true;
                Ok(())
            }))
        }))
        .step(Step::sync("unrun", |_| Ok(Value::Null)));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (result, _) = run_with_cancel(&scenario, cancel).await;

    assert_eq!(result.status, ScenarioStatus::Failed);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(
        result.steps[0].error.as_ref().map(|e| e.name.as_str()),
        Some("Cancelled"),
    );
    assert!(*cleaned.borrow());
}

// Scenario start/end events pair exactly once and bracket all step events,
// which alternate strictly.
#[tokio::test]
async fn lifecycle_events_are_ordered_and_paired() {
    let scenario = Scenario::new("ordered")
        .step(Step::sync("first", |_| Ok(json!(1))))
        .step(Step::sync("second", |_| Ok(json!(2))));

    let (_, trace) = run(&scenario).await;

    assert_eq!(
        trace,
        [
            "scenario_start:ordered",
            "step_start:first",
            "step_end:first:Passed",
            "step_start:second",
            "step_end:second:Passed",
            "scenario_end:ordered:Passed",
        ],
    );
}

// Step durations are bounded by the scenario duration.
#[tokio::test]
async fn scenario_duration_covers_its_steps() {
    let scenario = Scenario::new("durations")
        .step(Step::sync("a", |_| Ok(Value::Null)))
        .step(Step::sync("b", |_| Ok(Value::Null)));

    let (result, _) = run(&scenario).await;

    let steps_total: Duration =
        result.steps.iter().map(|s| s.duration).sum();
    assert!(steps_total <= result.duration);
}
