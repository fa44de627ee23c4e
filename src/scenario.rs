// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Immutable scenario definitions.
//!
//! A [`Scenario`] is an ordered list of [`Entry`]s — [`Resource`]
//! declarations, [`Setup`] hooks and [`Step`]s — executed in one isolated
//! worker to produce one [`ScenarioResult`]. Definitions hold the user
//! callables; their serializable projections ([`ScenarioMetadata`],
//! [`StepMetadata`]) are what crosses process boundaries.
//!
//! [`ScenarioResult`]: crate::ScenarioResult

use std::{fmt, path::PathBuf, rc::Rc, time::Duration};

use futures::{future::LocalBoxFuture, FutureExt as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smart_default::SmartDefault;

use crate::Context;

/// Alias for a [`Step`] body: a callable producing a [`Value`] or failing,
/// possibly asynchronously.
pub type StepFn = Box<
    dyn for<'c> Fn(&'c mut Context) -> LocalBoxFuture<'c, anyhow::Result<Value>>,
>;

/// Alias for a [`Resource`] factory.
pub type ResourceFactory = Box<
    dyn for<'c> Fn(
        &'c mut Context,
    ) -> LocalBoxFuture<'c, anyhow::Result<ResourceValue>>,
>;

/// Alias for a [`Setup`] hook body.
pub type SetupFn = Box<
    dyn for<'c> Fn(
        &'c mut Context,
    ) -> LocalBoxFuture<'c, anyhow::Result<Cleanup>>,
>;

/// Alias for a teardown callable: a [`Cleanup`] body or a [`ResourceValue`]
/// disposer, invoked exactly once in reverse registration order.
pub type TeardownFn =
    Box<dyn FnOnce() -> LocalBoxFuture<'static, anyhow::Result<()>>>;

/// Position in the source file where a definition was authored.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SourceLocation {
    /// Path of the authoring file, as captured at the definition site.
    pub file: PathBuf,

    /// 1-based line, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// 1-based column, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl SourceLocation {
    /// Captures the location of the caller.
    #[must_use]
    #[track_caller]
    pub fn capture() -> Self {
        let loc = std::panic::Location::caller();
        Self {
            file: loc.file().into(),
            line: Some(loc.line()),
            column: Some(loc.column()),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(col) = self.column {
                write!(f, ":{col}")?;
            }
        }
        Ok(())
    }
}

/// Strategy for spacing out [`Step`] retry attempts.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Waits `attempt × 1s` before the next attempt.
    #[default]
    Linear,

    /// Waits `2^(attempt - 1) × 1s` before the next attempt.
    Exponential,
}

impl Backoff {
    /// Base unit the delay formulas are multiples of.
    const BASE: Duration = Duration::from_secs(1);

    /// Returns the delay to wait after the given failed `attempt`
    /// (1-based).
    #[must_use]
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Linear => Self::BASE * attempt,
            Self::Exponential => Self::BASE * 2_u32.pow(attempt - 1),
        }
    }
}

/// Retry policy of a [`Step`].
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault,
)]
pub struct RetryPolicy {
    /// Total number of executions allowed, so `1` means no retries.
    #[default = 1]
    pub max_attempts: u32,

    /// Delay strategy between attempts.
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy allowing up to `max_attempts` total executions with the given
    /// [`Backoff`].
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self { max_attempts, backoff }
    }
}

/// Execution options of a [`Step`], also usable as scenario-wide defaults.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault,
)]
pub struct StepOptions {
    /// Limit on a single execution attempt.
    #[default(Duration::from_secs(30))]
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,

    /// Retry policy applied on failed attempts.
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Per-[`Step`] overrides of [`StepOptions`].
///
/// Only explicitly set fields shadow the [`Scenario`]-level options, which in
/// turn shadow the engine defaults.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StepOverrides {
    /// Overridden timeout, if any.
    #[serde(
        default,
        rename = "timeout_ms",
        skip_serializing_if = "Option::is_none",
        with = "opt_duration_ms"
    )]
    pub timeout: Option<Duration>,

    /// Overridden retry policy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl StepOverrides {
    /// Resolves these overrides over the given `base` options.
    #[must_use]
    pub fn over(&self, base: StepOptions) -> StepOptions {
        StepOptions {
            timeout: self.timeout.unwrap_or(base.timeout),
            retry: self.retry.unwrap_or(base.retry),
        }
    }
}

/// Named unit of user work with timeout and retry options.
pub struct Step {
    /// Name identifying this [`Step`] in reports.
    pub name: String,

    /// The step body.
    pub run: StepFn,

    /// Overrides of the [`Scenario`]-level [`StepOptions`].
    pub overrides: StepOverrides,

    /// Where this [`Step`] was authored.
    pub origin: Option<SourceLocation>,
}

impl Step {
    /// Creates a new [`Step`] with an asynchronous body.
    ///
    /// The body receives the scenario [`Context`] and yields a JSON
    /// [`Value`] recorded as this step's result.
    #[must_use]
    #[track_caller]
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: for<'c> Fn(
                &'c mut Context,
            ) -> LocalBoxFuture<'c, anyhow::Result<Value>>
            + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
            overrides: StepOverrides::default(),
            origin: Some(SourceLocation::capture()),
        }
    }

    /// Creates a new [`Step`] with a synchronous body.
    #[must_use]
    #[track_caller]
    pub fn sync<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut Context) -> anyhow::Result<Value> + 'static,
    {
        let mut this = Self::new(name, move |ctx| {
            let res = run(ctx);
            futures::future::ready(res).boxed_local()
        });
        this.origin = Some(SourceLocation::capture());
        this
    }

    /// Limits a single execution attempt of this [`Step`] to the given
    /// `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    /// Sets the [`RetryPolicy`] of this [`Step`].
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.overrides.retry = Some(retry);
        self
    }

    /// Overrides the captured [`SourceLocation`] of this [`Step`].
    #[must_use]
    pub fn at(mut self, origin: SourceLocation) -> Self {
        self.origin = Some(origin);
        self
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("overrides", &self.overrides)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Value produced by a [`Resource`] factory, with an optional disposal
/// capability.
///
/// Disposal is explicit registration: the factory attaches a nullary
/// disposer via [`on_dispose()`], typically capturing its own handle on the
/// produced value.
///
/// [`on_dispose()`]: ResourceValue::on_dispose
pub struct ResourceValue {
    /// The produced value, as bound into [`Context::resources`].
    ///
    /// [`Context::resources`]: crate::Context
    pub(crate) value: Rc<dyn std::any::Any>,

    /// Disposer to run in teardown, if the value needs one.
    pub(crate) disposer: Option<TeardownFn>,
}

impl ResourceValue {
    /// Wraps a plain `value` without a disposal capability.
    #[must_use]
    pub fn new<T: 'static>(value: T) -> Self {
        Self::from_rc(Rc::new(value))
    }

    /// Wraps an already shared `value` without a disposal capability.
    #[must_use]
    pub fn from_rc<T: 'static>(value: Rc<T>) -> Self {
        Self { value, disposer: None }
    }

    /// Attaches an asynchronous disposer, run exactly once in teardown.
    #[must_use]
    pub fn on_dispose<F, Fut>(mut self, dispose: F) -> Self
    where
        F: FnOnce() -> Fut + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + 'static,
    {
        self.disposer = Some(Box::new(move || dispose().boxed_local()));
        self
    }

    /// Attaches a synchronous disposer, run exactly once in teardown.
    #[must_use]
    pub fn on_dispose_sync<F>(self, dispose: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        self.on_dispose(move || futures::future::ready(dispose()))
    }
}

impl fmt::Debug for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceValue")
            .field("disposable", &self.disposer.is_some())
            .finish_non_exhaustive()
    }
}

/// Named value produced once per [`Scenario`] and available to all later
/// entries through [`Context::resource()`].
///
/// [`Context::resource()`]: crate::Context::resource
pub struct Resource {
    /// Name the produced value is bound under, unique within its
    /// [`Scenario`].
    pub name: String,

    /// Factory producing the value.
    pub factory: ResourceFactory,

    /// Where this [`Resource`] was authored.
    pub origin: Option<SourceLocation>,
}

impl Resource {
    /// Creates a new [`Resource`] with an asynchronous factory.
    #[must_use]
    #[track_caller]
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: for<'c> Fn(
                &'c mut Context,
            )
                -> LocalBoxFuture<'c, anyhow::Result<ResourceValue>>
            + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            origin: Some(SourceLocation::capture()),
        }
    }

    /// Creates a new [`Resource`] with a synchronous factory.
    #[must_use]
    #[track_caller]
    pub fn sync<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&mut Context) -> anyhow::Result<ResourceValue> + 'static,
    {
        let mut this = Self::new(name, move |ctx| {
            let res = factory(ctx);
            futures::future::ready(res).boxed_local()
        });
        this.origin = Some(SourceLocation::capture());
        this
    }

    /// Overrides the captured [`SourceLocation`] of this [`Resource`].
    #[must_use]
    pub fn at(mut self, origin: SourceLocation) -> Self {
        self.origin = Some(origin);
        self
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Teardown obligation returned by a [`Setup`].
#[derive(Default)]
pub enum Cleanup {
    /// Nothing to tear down.
    #[default]
    None,

    /// Callable to invoke exactly once in teardown.
    Run(TeardownFn),
}

impl Cleanup {
    /// Creates a [`Cleanup`] out of an asynchronous nullary callable.
    #[must_use]
    pub fn run<F, Fut>(cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + 'static,
    {
        Self::Run(Box::new(move || cleanup().boxed_local()))
    }

    /// Creates a [`Cleanup`] out of a synchronous nullary callable.
    #[must_use]
    pub fn run_sync<F>(cleanup: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        Self::run(move || futures::future::ready(cleanup()))
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Cleanup::None"),
            Self::Run(_) => f.write_str("Cleanup::Run(..)"),
        }
    }
}

/// Hook run at its declaration position, optionally returning a [`Cleanup`].
///
/// A [`Setup`] may signal that its whole [`Scenario`] should be skipped by
/// returning a [`Skip`] error.
///
/// [`Skip`]: crate::Skip
pub struct Setup {
    /// The hook body.
    pub run: SetupFn,

    /// Where this [`Setup`] was authored.
    pub origin: Option<SourceLocation>,
}

impl Setup {
    /// Creates a new [`Setup`] with an asynchronous body.
    #[must_use]
    #[track_caller]
    pub fn new<F>(run: F) -> Self
    where
        F: for<'c> Fn(
                &'c mut Context,
            ) -> LocalBoxFuture<'c, anyhow::Result<Cleanup>>
            + 'static,
    {
        Self {
            run: Box::new(run),
            origin: Some(SourceLocation::capture()),
        }
    }

    /// Creates a new [`Setup`] with a synchronous body.
    #[must_use]
    #[track_caller]
    pub fn sync<F>(run: F) -> Self
    where
        F: Fn(&mut Context) -> anyhow::Result<Cleanup> + 'static,
    {
        let mut this = Self::new(move |ctx| {
            let res = run(ctx);
            futures::future::ready(res).boxed_local()
        });
        this.origin = Some(SourceLocation::capture());
        this
    }

    /// Overrides the captured [`SourceLocation`] of this [`Setup`].
    #[must_use]
    pub fn at(mut self, origin: SourceLocation) -> Self {
        self.origin = Some(origin);
        self
    }
}

impl fmt::Debug for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setup")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Single declaration inside a [`Scenario`].
///
/// The declaration-ordered [`Entry`] list is what drives both initialization
/// and teardown ordering.
#[derive(Debug)]
pub enum Entry {
    /// A [`Resource`] declaration.
    Resource(Resource),

    /// A [`Setup`] hook.
    Setup(Setup),

    /// A [`Step`].
    Step(Step),
}

/// Ordered list of [`Entry`]s executed in one isolated worker to produce one
/// [`ScenarioResult`].
///
/// Immutable once handed to the engine. The fluent authoring layer on top of
/// these constructors lives outside the core.
///
/// [`ScenarioResult`]: crate::ScenarioResult
#[derive(Debug)]
pub struct Scenario {
    /// Name identifying this [`Scenario`] in selectors and reports.
    pub name: String,

    /// Tags this [`Scenario`] is selectable by.
    pub tags: Vec<String>,

    /// Default [`StepOptions`] for this [`Scenario`]'s [`Step`]s.
    pub options: StepOptions,

    /// Declarations, in authoring order.
    pub entries: Vec<Entry>,

    /// Where this [`Scenario`] was authored.
    pub origin: Option<SourceLocation>,
}

impl Scenario {
    /// Creates a new empty [`Scenario`].
    #[must_use]
    #[track_caller]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            options: StepOptions::default(),
            entries: Vec::new(),
            origin: Some(SourceLocation::capture()),
        }
    }

    /// Adds a tag to this [`Scenario`].
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds multiple tags to this [`Scenario`].
    #[must_use]
    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Sets the default [`StepOptions`] of this [`Scenario`].
    #[must_use]
    pub fn options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }

    /// Appends a [`Resource`] declaration.
    #[must_use]
    pub fn resource(mut self, resource: Resource) -> Self {
        self.entries.push(Entry::Resource(resource));
        self
    }

    /// Appends a [`Setup`] hook.
    #[must_use]
    pub fn setup(mut self, setup: Setup) -> Self {
        self.entries.push(Entry::Setup(setup));
        self
    }

    /// Appends a [`Step`].
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.entries.push(Entry::Step(step));
        self
    }

    /// Overrides the captured [`SourceLocation`] of this [`Scenario`].
    #[must_use]
    pub fn at(mut self, origin: SourceLocation) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Number of [`Step`] entries.
    #[must_use]
    pub fn count_steps(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Step(_)))
            .count()
    }

    /// Builds the serializable projection of this [`Scenario`].
    #[must_use]
    pub fn metadata(&self) -> ScenarioMetadata {
        let steps = self
            .entries
            .iter()
            .filter_map(|e| match e {
                Entry::Step(s) => Some(s),
                Entry::Resource(_) | Entry::Setup(_) => None,
            })
            .enumerate()
            .map(|(index, s)| StepMetadata {
                index,
                name: s.name.clone(),
                options: s.overrides.over(self.options),
                origin: s.origin.clone(),
            })
            .collect();
        ScenarioMetadata {
            name: self.name.clone(),
            tags: self.tags.clone(),
            options: self.options,
            steps,
            origin: self.origin.clone(),
        }
    }
}

/// Serializable projection of a [`Scenario`], with all callables stripped.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScenarioMetadata {
    /// Name of the [`Scenario`].
    pub name: String,

    /// Tags of the [`Scenario`].
    #[serde(default)]
    pub tags: Vec<String>,

    /// Scenario-level default [`StepOptions`].
    #[serde(default)]
    pub options: StepOptions,

    /// Projections of the [`Scenario`]'s [`Step`]s, in declaration order.
    #[serde(default)]
    pub steps: Vec<StepMetadata>,

    /// Where the [`Scenario`] was authored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<SourceLocation>,
}

/// Serializable projection of a [`Step`], with the body stripped.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StepMetadata {
    /// 0-based position among the [`Scenario`]'s [`Step`]s.
    pub index: usize,

    /// Name of the [`Step`].
    pub name: String,

    /// Effective [`StepOptions`], with scenario-level defaults applied.
    #[serde(default)]
    pub options: StepOptions,

    /// Where the [`Step`] was authored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<SourceLocation>,
}

/// Serde helpers representing a [`Duration`] as integer milliseconds on the
/// wire.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize as _, Deserializer, Serializer};

    /// Serializes a [`Duration`] as integer milliseconds.
    pub(crate) fn serialize<S: Serializer>(
        d: &Duration,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(
            u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
        )
    }

    /// Deserializes a [`Duration`] out of integer milliseconds.
    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_millis)
    }
}

/// Serde helpers for an optional milliseconds-encoded [`Duration`].
pub(crate) mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize as _, Deserializer, Serializer};

    /// Serializes an optional [`Duration`] as integer milliseconds.
    pub(crate) fn serialize<S: Serializer>(
        d: &Option<Duration>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => super::duration_ms::serialize(d, ser),
            None => ser.serialize_none(),
        }
    }

    /// Deserializes an optional [`Duration`] out of integer milliseconds.
    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(de)
            .map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_step(name: &str) -> Step {
        Step::sync(name, |_| Ok(Value::Null))
    }

    #[test]
    fn options_merge_prefers_step_overrides() {
        let base = StepOptions {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(2, Backoff::Linear),
        };

        let merged = StepOverrides {
            timeout: Some(Duration::from_millis(100)),
            retry: None,
        }
        .over(base);

        assert_eq!(merged.timeout, Duration::from_millis(100));
        assert_eq!(merged.retry, base.retry);
    }

    #[test]
    fn default_options_mean_no_retry() {
        let opts = StepOptions::default();

        assert_eq!(opts.timeout, Duration::from_secs(30));
        assert_eq!(opts.retry.max_attempts, 1);
        assert_eq!(opts.retry.backoff, Backoff::Linear);
    }

    #[test]
    fn backoff_delays_follow_the_formulas() {
        assert_eq!(Backoff::Linear.delay(1), Duration::from_secs(1));
        assert_eq!(Backoff::Linear.delay(3), Duration::from_secs(3));
        assert_eq!(Backoff::Exponential.delay(1), Duration::from_secs(1));
        assert_eq!(Backoff::Exponential.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn metadata_projects_effective_step_options() {
        let scenario = Scenario::new("checkout")
            .tags(["api", "slow"])
            .options(StepOptions {
                timeout: Duration::from_secs(10),
                retry: RetryPolicy::default(),
            })
            .step(noop_step("first"))
            .step(
                noop_step("second")
                    .retry(RetryPolicy::new(3, Backoff::Exponential)),
            );

        let meta = scenario.metadata();

        assert_eq!(meta.name, "checkout");
        assert_eq!(meta.tags, ["api", "slow"]);
        assert_eq!(meta.steps.len(), 2);
        assert_eq!(meta.steps[0].index, 0);
        assert_eq!(meta.steps[0].options.timeout, Duration::from_secs(10));
        assert_eq!(meta.steps[1].options.retry.max_attempts, 3);
    }

    #[test]
    fn definitions_capture_their_origin() {
        let step = noop_step("traced");
        let origin = step.origin.expect("origin captured");

        assert!(origin.file.ends_with("scenario.rs"));
        assert!(origin.line.is_some());
    }

    #[test]
    fn options_serialize_as_milliseconds() {
        let opts = StepOptions {
            timeout: Duration::from_millis(1500),
            retry: RetryPolicy::new(2, Backoff::Exponential),
        };

        let json = serde_json::to_value(opts).unwrap();
        assert_eq!(json["timeout_ms"], 1500);
        assert_eq!(json["retry"]["backoff"], "exponential");

        let back: StepOptions = serde_json::from_value(json).unwrap();
        assert_eq!(back, opts);
    }
}
