// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Registry of the [`Scenario`]s compiled into the harness binary.
//!
//! A declaration file "exports" its [`Scenario`]s by registering a
//! constructor with the [`scenarios!`] macro. Workers re-execute the very
//! same binary, so resolving a `(file, index)` pair out of the registry is
//! the loading operation of this host: scenario bodies never have to cross a
//! process boundary.
//!
//! Constructors are plain `fn` pointers: every [`load()`] builds a fresh
//! [`Scenario`] with fresh callables, so nothing leaks between executions.
//!
//! [`scenarios!`]: crate::scenarios
//! [`Scenario`]: crate::Scenario

use itertools::Itertools as _;
use once_cell::sync::Lazy;

use crate::{LoadError, Scenario};

/// Registered constructor of the [`Scenario`]s one declaration site exports.
///
/// Use the [`scenarios!`] macro instead of constructing these directly.
///
/// [`scenarios!`]: crate::scenarios
/// [`Scenario`]: crate::Scenario
pub struct ScenarioDecl {
    /// Declaration file, as captured by `file!()`.
    file: &'static str,

    /// Declaration line, ordering multiple sites within one file.
    line: u32,

    /// Constructor of the declared [`Scenario`]s.
    ///
    /// [`Scenario`]: crate::Scenario
    build: fn() -> Vec<Scenario>,
}

impl ScenarioDecl {
    /// Creates a new [`ScenarioDecl`] for the [`scenarios!`] macro.
    ///
    /// [`scenarios!`]: crate::scenarios
    #[must_use]
    pub const fn new(
        file: &'static str,
        line: u32,
        build: fn() -> Vec<Scenario>,
    ) -> Self {
        Self { file, line, build }
    }
}

inventory::collect!(ScenarioDecl);

/// Declares the [`Scenario`]s exported by the current file.
///
/// Multiple declaration blocks in one file accumulate in their authoring
/// order.
///
/// ```rust
/// use probitas::{scenarios, Scenario, Step};
/// use serde_json::json;
///
/// scenarios! {
///     Scenario::new("health check")
///         .tag("api")
///         .step(Step::sync("ping", |_| Ok(json!("pong")))),
/// }
/// ```
///
/// [`Scenario`]: crate::Scenario
#[macro_export]
macro_rules! scenarios {
    ($($scenario:expr),+ $(,)?) => {
        $crate::inventory::submit! {
            $crate::registry::ScenarioDecl::new(
                ::core::file!(),
                ::core::line!(),
                || ::std::vec![$($scenario),+],
            )
        }
    };
}

/// All registered declarations, ordered by `(file, line)`.
static DECLS: Lazy<Vec<&'static ScenarioDecl>> = Lazy::new(|| {
    let mut decls =
        inventory::iter::<ScenarioDecl>.into_iter().collect::<Vec<_>>();
    decls.sort_by_key(|d| (d.file, d.line));
    decls
});

/// A [`Scenario`] together with its registry coordinates.
///
/// [`Scenario`]: crate::Scenario
#[derive(Debug)]
pub struct Registered {
    /// Declaration file the [`Scenario`] is loadable from.
    ///
    /// [`Scenario`]: crate::Scenario
    pub file: &'static str,

    /// Position within the file's ordered [`Scenario`] list.
    ///
    /// [`Scenario`]: crate::Scenario
    pub index: usize,

    /// The freshly built [`Scenario`].
    ///
    /// [`Scenario`]: crate::Scenario
    pub scenario: Scenario,
}

/// Distinct declaration files, sorted.
#[must_use]
pub fn files() -> Vec<&'static str> {
    DECLS.iter().map(|d| d.file).dedup().collect()
}

/// Builds every registered [`Scenario`], in `(file, declaration)` order.
///
/// [`Scenario`]: crate::Scenario
#[must_use]
pub fn all() -> Vec<Registered> {
    let mut all = Vec::new();
    let by_file = DECLS.iter().group_by(|d| d.file);
    for (file, decls) in &by_file {
        let scenarios =
            decls.flat_map(|d| (d.build)()).enumerate();
        all.extend(
            scenarios
                .map(|(index, scenario)| Registered { file, index, scenario }),
        );
    }
    all
}

/// Loads the [`Scenario`] at `index` within the ordered list the given
/// `file` declares.
///
/// # Errors
///
/// [`LoadError::UnknownFile`] when no declarations exist for `file`, and
/// [`LoadError::IndexOutOfRange`] when `index` exceeds its list.
///
/// [`Scenario`]: crate::Scenario
pub fn load(file: &str, index: usize) -> Result<Scenario, LoadError> {
    let mut scenarios = DECLS
        .iter()
        .filter(|d| d.file == file)
        .flat_map(|d| (d.build)())
        .peekable();

    if scenarios.peek().is_none() {
        return Err(LoadError::UnknownFile { file: file.to_owned() });
    }

    let mut scenarios = scenarios.collect::<Vec<_>>();
    let len = scenarios.len();
    if index >= len {
        return Err(LoadError::IndexOutOfRange {
            file: file.to_owned(),
            index,
            len,
        });
    }
    Ok(scenarios.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::Step;

    crate::scenarios! {
        Scenario::new("registry smoke: first")
            .tag("registry-smoke")
            .step(Step::sync("noop", |_| Ok(Value::Null))),
        Scenario::new("registry smoke: second")
            .tag("registry-smoke"),
    }

    #[test]
    fn declarations_are_discoverable() {
        assert!(files().into_iter().any(|f| f.ends_with("registry.rs")));

        let smoke = all()
            .into_iter()
            .filter(|r| {
                r.scenario.tags.contains(&"registry-smoke".to_owned())
            })
            .collect::<Vec<_>>();

        assert_eq!(smoke.len(), 2);
        assert_eq!(smoke[0].index + 1, smoke[1].index);
        assert_eq!(smoke[0].scenario.name, "registry smoke: first");
    }

    #[test]
    fn load_resolves_by_file_and_index() {
        let here = all()
            .into_iter()
            .find(|r| r.scenario.name == "registry smoke: second")
            .expect("registered above");

        let loaded = load(here.file, here.index).unwrap();
        assert_eq!(loaded.name, "registry smoke: second");

        // Every load() builds fresh callables.
        let again = load(here.file, here.index).unwrap();
        assert_eq!(again.name, loaded.name);
    }

    #[test]
    fn load_reports_unknown_files_and_bad_indices() {
        assert!(matches!(
            load("no/such/file.rs", 0),
            Err(LoadError::UnknownFile { .. }),
        ));

        let here = all()
            .into_iter()
            .find(|r| r.scenario.name == "registry smoke: first")
            .expect("registered above");
        assert!(matches!(
            load(here.file, 9999),
            Err(LoadError::IndexOutOfRange { len, .. }) if len >= 2,
        ));
    }
}
