// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Boolean filter language for picking [`Scenario`]s.
//!
//! One [`Selector`] is a comma-separated conjunction of [`Atom`]s
//! (`tag:api,!tag:auth`); multiple [`Selector`]s (accumulated from repeated
//! `-s` flags) are disjuncted. With no selectors at all, every [`Scenario`]
//! passes.
//!
//! [`Scenario`]: crate::Scenario

use std::{fmt, str::FromStr};

use lazy_regex::regex_captures;

use crate::{Scenario, SelectorSyntaxError};

/// What part of a [`Scenario`] an [`Atom`] matches against.
///
/// [`Scenario`]: crate::Scenario
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchKind {
    /// Substring match on the [`Scenario`] name (the default).
    ///
    /// [`Scenario`]: crate::Scenario
    Name,

    /// Exact membership in the [`Scenario`] tags.
    ///
    /// [`Scenario`]: crate::Scenario
    Tag,
}

/// Single `[!] [type:] value` predicate of a [`Selector`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Atom {
    /// Whether the match outcome is negated.
    pub negated: bool,

    /// What the `value` matches against.
    pub kind: MatchKind,

    /// The value to match, trimmed.
    pub value: String,
}

impl Atom {
    /// Parses a single [`Atom`] out of its textual form.
    fn parse(raw: &str) -> Result<Self, SelectorSyntaxError> {
        let atom = || raw.trim().to_owned();

        let (_, neg, ty, value) =
            regex_captures!(r"^\s*(!?)\s*(?:([^:]*):)?\s*(.*?)\s*$", raw)
                .unwrap_or_default();

        let kind = if raw.contains(':') {
            match ty.trim() {
                "" => return Err(SelectorSyntaxError::EmptyType { atom: atom() }),
                "tag" => MatchKind::Tag,
                "name" => MatchKind::Name,
                other => {
                    return Err(SelectorSyntaxError::UnknownType {
                        atom: atom(),
                        ty: other.to_owned(),
                    });
                }
            }
        } else {
            MatchKind::Name
        };

        if value.is_empty() {
            return Err(SelectorSyntaxError::EmptyValue { atom: atom() });
        }
        // `!` is reserved for the leading negation position.
        if value.contains('!') {
            return Err(SelectorSyntaxError::MisplacedNegation {
                atom: atom(),
            });
        }

        Ok(Self {
            negated: !neg.is_empty(),
            kind,
            value: value.to_owned(),
        })
    }

    /// Evaluates this [`Atom`] against a [`Scenario`]'s name and tags.
    ///
    /// [`Scenario`]: crate::Scenario
    #[must_use]
    pub fn is_match(&self, name: &str, tags: &[String]) -> bool {
        let hit = match self.kind {
            MatchKind::Name => name.contains(&self.value),
            MatchKind::Tag => tags.iter().any(|t| *t == self.value),
        };
        hit != self.negated
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "!")?;
        }
        match self.kind {
            MatchKind::Name => write!(f, "name:")?,
            MatchKind::Tag => write!(f, "tag:")?,
        }
        write!(f, "{}", self.value)
    }
}

/// Conjunction of [`Atom`]s, parsed out of one selector expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Selector {
    /// AND-combined [`Atom`]s.
    pub atoms: Vec<Atom>,
}

impl Selector {
    /// Parses a [`Selector`] out of a comma-separated expression.
    ///
    /// # Errors
    ///
    /// On an empty type prefix, an unknown type prefix, or an empty value in
    /// any of the [`Atom`]s.
    pub fn parse(expr: &str) -> Result<Self, SelectorSyntaxError> {
        expr.split(',')
            .map(Atom::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(|atoms| Self { atoms })
    }

    /// Evaluates this [`Selector`] against a [`Scenario`]'s name and tags.
    ///
    /// [`Scenario`]: crate::Scenario
    #[must_use]
    pub fn is_match(&self, name: &str, tags: &[String]) -> bool {
        self.atoms.iter().all(|a| a.is_match(name, tags))
    }

    /// Evaluates this [`Selector`] against the given [`Scenario`].
    #[must_use]
    pub fn matches(&self, scenario: &Scenario) -> bool {
        self.is_match(&scenario.name, &scenario.tags)
    }
}

impl FromStr for Selector {
    type Err = SelectorSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{atom}")?;
        }
        Ok(())
    }
}

/// Filters `scenarios` down to the ones matching any of the `selectors`.
///
/// Preserves the input order and is stable: applying the same `selectors`
/// twice returns the same list. No `selectors` means everything passes.
#[must_use]
pub fn apply(
    scenarios: Vec<Scenario>,
    selectors: &[Selector],
) -> Vec<Scenario> {
    if selectors.is_empty() {
        return scenarios;
    }
    scenarios
        .into_iter()
        .filter(|s| selectors.iter().any(|sel| sel.matches(s)))
        .collect()
}
