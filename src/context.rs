// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Mutable runtime companion of a single [`Scenario`] execution.
//!
//! [`Scenario`]: crate::Scenario

use std::{any::Any, collections::HashMap, fmt, rc::Rc};

use linked_hash_map::LinkedHashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Runtime state passed to every user callable of a [`Scenario`].
///
/// A [`Context`] exists only during one [`Scenario`]'s execution and is never
/// shared between scenarios: nothing outlives the owning worker process.
///
/// [`Scenario`]: crate::Scenario
pub struct Context {
    /// 0-based position of the currently executing [`Step`].
    ///
    /// [`Step`]: crate::Step
    index: usize,

    /// Return values of every completed [`Step`] so far, in order.
    ///
    /// [`Step`]: crate::Step
    results: Vec<Value>,

    /// Produced [`Resource`] values, in creation order.
    ///
    /// [`Resource`]: crate::Resource
    resources: LinkedHashMap<String, Rc<dyn Any>>,

    /// Free-form scratch space shared by all entries of the [`Scenario`].
    ///
    /// [`Scenario`]: crate::Scenario
    store: HashMap<String, Rc<dyn Any>>,

    /// Signal firing on a timeout or an external cancellation.
    ///
    /// While a [`Step`] runs this is the step-scoped token, so user code can
    /// cooperate with both its own timeout and any parent cancellation.
    ///
    /// [`Step`]: crate::Step
    cancellation: CancellationToken,
}

// Implemented manually as the held resource and store values are opaque
// `dyn Any`.
impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("index", &self.index)
            .field("results", &self.results)
            .field(
                "resources",
                &self.resources.keys().collect::<Vec<_>>(),
            )
            .field("store", &self.store.keys().collect::<Vec<_>>())
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

impl Context {
    /// Creates a fresh [`Context`] carrying the given cancellation signal.
    #[must_use]
    pub(crate) fn new(cancellation: CancellationToken) -> Self {
        Self {
            index: 0,
            results: Vec::new(),
            resources: LinkedHashMap::new(),
            store: HashMap::new(),
            cancellation,
        }
    }

    /// 0-based position of the currently executing [`Step`].
    ///
    /// [`Step`]: crate::Step
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Value returned by the previous [`Step`], or [`Value::Null`] for the
    /// first one.
    ///
    /// Deterministically equal to `results()[index() - 1]`.
    ///
    /// [`Step`]: crate::Step
    #[must_use]
    pub fn previous(&self) -> &Value {
        self.index
            .checked_sub(1)
            .and_then(|i| self.results.get(i))
            .unwrap_or(&Value::Null)
    }

    /// Return values of every completed [`Step`] so far, in order.
    ///
    /// [`Step`]: crate::Step
    #[must_use]
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// Looks up the produced [`Resource`] value bound under `name`.
    ///
    /// Returns [`None`] when no such resource has been created yet, or when
    /// it holds a different type.
    ///
    /// [`Resource`]: crate::Resource
    #[must_use]
    pub fn resource<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        self.resources
            .get(name)
            .and_then(|v| Rc::clone(v).downcast().ok())
    }

    /// Indicates whether a [`Resource`] is bound under `name`.
    ///
    /// [`Resource`]: crate::Resource
    #[must_use]
    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Puts a `value` into the scenario-wide scratch store.
    pub fn store_put<T: 'static>(&mut self, key: impl Into<String>, value: T) {
        drop(self.store.insert(key.into(), Rc::new(value)));
    }

    /// Looks up a previously stored value.
    #[must_use]
    pub fn store_get<T: 'static>(&self, key: &str) -> Option<Rc<T>> {
        self.store.get(key).and_then(|v| Rc::clone(v).downcast().ok())
    }

    /// Cancellation signal of the currently executing work.
    ///
    /// Fires when the current [`Step`] times out, or when a scenario-wide or
    /// external cancellation propagates down. Long-running user code should
    /// poll or `await` it to cooperate.
    ///
    /// [`Step`]: crate::Step
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shortcut for `cancellation().is_cancelled()`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Binds a produced [`Resource`] value under `name`.
    ///
    /// [`Resource`]: crate::Resource
    pub(crate) fn bind_resource(&mut self, name: String, value: Rc<dyn Any>) {
        drop(self.resources.insert(name, value));
    }

    /// Records a completed [`Step`]'s return value.
    ///
    /// [`Step`]: crate::Step
    pub(crate) fn push_result(&mut self, value: Value) {
        self.results.push(value);
    }

    /// Points this [`Context`] at the [`Step`] about to execute.
    ///
    /// [`Step`]: crate::Step
    pub(crate) fn enter_step(
        &mut self,
        index: usize,
        cancellation: CancellationToken,
    ) {
        self.index = index;
        self.cancellation = cancellation;
    }

    /// Restores the scenario-scoped cancellation signal after a [`Step`].
    ///
    /// [`Step`]: crate::Step
    pub(crate) fn leave_step(&mut self, cancellation: CancellationToken) {
        self.cancellation = cancellation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_is_null_before_any_result() {
        let ctx = Context::new(CancellationToken::new());

        assert_eq!(*ctx.previous(), Value::Null);
        assert!(ctx.results().is_empty());
    }

    #[test]
    fn previous_tracks_the_last_recorded_result() {
        let mut ctx = Context::new(CancellationToken::new());

        ctx.enter_step(0, CancellationToken::new());
        ctx.push_result(1.into());
        ctx.enter_step(1, CancellationToken::new());

        assert_eq!(*ctx.previous(), Value::from(1));

        ctx.push_result("two".into());
        ctx.enter_step(2, CancellationToken::new());

        assert_eq!(*ctx.previous(), Value::from("two"));
        assert_eq!(ctx.results().len(), 2);
    }

    #[test]
    fn resources_are_typed_lookups() {
        let mut ctx = Context::new(CancellationToken::new());
        ctx.bind_resource("port".into(), Rc::new(8080_u16));

        assert_eq!(ctx.resource::<u16>("port").as_deref(), Some(&8080));
        assert!(ctx.resource::<String>("port").is_none());
        assert!(ctx.resource::<u16>("missing").is_none());
        assert!(ctx.has_resource("port"));
    }

    #[test]
    fn store_is_shared_scratch_space() {
        let mut ctx = Context::new(CancellationToken::new());
        ctx.store_put("token", "secret".to_owned());

        assert_eq!(
            ctx.store_get::<String>("token").as_deref(),
            Some(&"secret".to_owned()),
        );
        assert!(ctx.store_get::<u32>("token").is_none());
    }
}
