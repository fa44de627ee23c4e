// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Harness CLI options.
//!
//! This is deliberately thin: it only maps command-line flags onto the
//! [`Probitas`] builder. Harness binaries that need richer interfaces parse
//! their own and configure the builder directly.

use std::time::Duration;

use clap::Parser;

use crate::{result::EXIT_USAGE, Probitas, Reporter, Selector};

/// CLI options of a [`Probitas`] harness binary.
///
/// # Example
///
/// ```rust,no_run
/// use probitas::{cli, Probitas};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     cli::Opts::parsed()
///         .configure(Probitas::new())
///         .run_and_exit()
///         .await;
/// }
/// ```
#[derive(Clone, Debug, Parser)]
#[command(
    name = "probitas",
    about = "Run integration-test scenarios across isolated workers"
)]
pub struct Opts {
    /// Selector expression filtering scenarios, e.g. `tag:api,!tag:slow`.
    /// May be repeated; occurrences are OR-combined.
    #[arg(short = 's', long = "selector", value_name = "expr")]
    pub selectors: Vec<String>,

    /// Number of worker processes to run scenarios in. `0` uses the host
    /// CPU count.
    #[arg(long, value_name = "int", default_value_t = 0)]
    pub workers: usize,

    /// Abort the run once this many scenarios failed.
    #[arg(long, value_name = "int")]
    pub max_failures: Option<usize>,

    /// Scenario-wide timeout, e.g. `90s` or `2min`.
    #[arg(
        long,
        value_name = "duration",
        value_parser = humantime::parse_duration,
    )]
    pub timeout: Option<Duration>,

    /// Verbosity of worker stderr diagnostics
    /// (`error`, `warn`, `info`, `debug` or `trace`).
    #[arg(long, value_name = "level")]
    pub log_level: Option<String>,
}

impl Opts {
    /// Parses the [`Opts`] from the process arguments, exiting on `--help`
    /// or malformed flags.
    #[must_use]
    pub fn parsed() -> Self {
        Self::parse()
    }

    /// Applies these options to the given executor.
    ///
    /// A malformed selector is a usage error: it is reported on stderr and
    /// the process exits with code `2`.
    #[must_use]
    pub fn configure<R: Reporter>(
        self,
        probitas: Probitas<R>,
    ) -> Probitas<R> {
        let selectors = match self
            .selectors
            .iter()
            .map(|s| s.parse::<Selector>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(selectors) => selectors,
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(EXIT_USAGE);
            }
        };

        let mut probitas =
            probitas.selectors(selectors).max_workers(self.workers);
        if let Some(max) = self.max_failures {
            probitas = probitas.max_failures(max);
        }
        if let Some(timeout) = self.timeout {
            probitas = probitas.scenario_timeout(timeout);
        }
        if let Some(level) = self.log_level {
            probitas = probitas.log_level(level);
        }
        probitas
    }
}
