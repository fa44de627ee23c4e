// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Default list-style [`Reporter`].

use std::{io, time::Duration};

use async_trait::async_trait;
use console::Style;

use crate::{
    RunSummary, ScenarioMetadata, ScenarioResult, ScenarioStatus,
    StepResult,
};

use super::Reporter;

/// Terminal styles of a [`Basic`] reporter.
#[derive(Clone, Debug)]
struct Styles {
    /// Whether styling is applied at all.
    ///
    /// `NO_COLOR` and non-terminal outputs disable it.
    is_present: bool,

    /// Style of passed scenarios and steps.
    ok: Style,

    /// Style of failed scenarios, steps and error details.
    err: Style,

    /// Style of skipped scenarios.
    skipped: Style,

    /// Style of headers and totals.
    bold: Style,

    /// Style of durations and locations.
    muted: Style,
}

impl Styles {
    /// Creates [`Styles`] for a terminal output, honoring `NO_COLOR`.
    fn detected() -> Self {
        Self::new(
            std::env::var_os("NO_COLOR").is_none()
                && console::colors_enabled(),
        )
    }

    /// Creates [`Styles`] with styling forced on or off.
    fn new(is_present: bool) -> Self {
        Self {
            is_present,
            ok: Style::new().green(),
            err: Style::new().red(),
            skipped: Style::new().cyan(),
            bold: Style::new().bold(),
            muted: Style::new().dim(),
        }
    }

    /// Applies the given [`Style`] if styling is present.
    fn apply(&self, style: &Style, text: impl AsRef<str>) -> String {
        if self.is_present {
            style.apply_to(text.as_ref()).to_string()
        } else {
            text.as_ref().to_owned()
        }
    }
}

/// Default [`Reporter`] implementation outputting a plain list of scenarios.
///
/// Scenarios running in parallel interleave their events, so a complete
/// block per scenario is printed at its `scenario_end`, and per-event lines
/// are omitted.
#[derive(Debug)]
pub struct Basic<Out: io::Write = io::Stdout> {
    /// Where the list is written to.
    output: Out,

    /// Terminal styles in use.
    styles: Styles,
}

impl Basic {
    /// Creates a new [`Basic`] reporter writing to stdout, with styling
    /// auto-detected.
    #[must_use]
    pub fn new() -> Self {
        Self { output: io::stdout(), styles: Styles::detected() }
    }
}

impl Default for Basic {
    fn default() -> Self {
        Self::new()
    }
}

impl<Out: io::Write> Basic<Out> {
    /// Creates a new [`Basic`] reporter writing to the given `output`,
    /// without styling.
    #[must_use]
    pub fn with_output(output: Out) -> Self {
        Self { output, styles: Styles::new(false) }
    }

    /// Unwraps the underlying output.
    #[must_use]
    pub fn into_inner(self) -> Out {
        self.output
    }

    /// Writes one line, swallowing output errors.
    fn line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.output, "{line}") {
            tracing::error!(error = %e, "failed to write report line");
        }
    }

    /// Renders one step of a finished scenario.
    fn step_lines(&mut self, step: &StepResult) {
        let glyph = if step.is_passed() {
            self.styles.apply(&self.styles.ok, "\u{2714}")
        } else {
            self.styles.apply(&self.styles.err, "\u{2718}")
        };
        let duration = self
            .styles
            .apply(&self.styles.muted, format!("({})", fmt(step.duration)));
        self.line(&format!(
            "    {glyph} {} {duration}",
            step.metadata.name,
        ));

        if let Some(error) = &step.error {
            let rendered =
                self.styles.apply(&self.styles.err, error.to_string());
            self.line(&format!("       {rendered}"));
            if let Some(origin) = &step.metadata.origin {
                let at = self
                    .styles
                    .apply(&self.styles.muted, format!("at {origin}"));
                self.line(&format!("       {at}"));
            }
        }
    }
}

#[async_trait(?Send)]
impl<Out: io::Write> Reporter for Basic<Out> {
    async fn on_run_start(&mut self, scenarios: &[ScenarioMetadata]) {
        let header = format!(
            "running {} scenario{}",
            scenarios.len(),
            if scenarios.len() == 1 { "" } else { "s" },
        );
        let header = self.styles.apply(&self.styles.bold, header);
        self.line(&header);
    }

    async fn on_scenario_end(
        &mut self,
        scenario: &ScenarioMetadata,
        result: &ScenarioResult,
    ) {
        let duration = self.styles.apply(
            &self.styles.muted,
            format!("({})", fmt(result.duration)),
        );

        match result.status {
            ScenarioStatus::Passed => {
                let glyph = self.styles.apply(&self.styles.ok, "\u{2714}");
                self.line(&format!("{glyph} {} {duration}", scenario.name));
            }
            ScenarioStatus::Failed => {
                let glyph = self.styles.apply(&self.styles.err, "\u{2718}");
                self.line(&format!("{glyph} {} {duration}", scenario.name));
            }
            ScenarioStatus::Skipped => {
                let glyph =
                    self.styles.apply(&self.styles.skipped, "\u{26ac}");
                let reason = result.skip_reason().unwrap_or("skipped");
                self.line(&format!(
                    "{glyph} {} {duration}: {reason}",
                    scenario.name,
                ));
                return;
            }
        }

        for step in &result.steps {
            self.step_lines(step);
        }
        if let Some(error) = &result.error {
            let rendered =
                self.styles.apply(&self.styles.err, error.to_string());
            self.line(&format!("    {rendered}"));
        }
    }

    async fn on_run_end(&mut self, summary: &RunSummary) {
        let counts = format!(
            "{} passed, {} failed, {} skipped",
            summary.passed, summary.failed, summary.skipped,
        );
        let line = format!(
            "{} scenario{} ({counts}) in {}",
            summary.total,
            if summary.total == 1 { "" } else { "s" },
            fmt(summary.duration),
        );
        let line = if summary.execution_has_failed() {
            self.styles.apply(&self.styles.err, line)
        } else {
            self.styles.apply(&self.styles.bold, line)
        };
        self.line(&line);
    }
}

/// Formats a [`Duration`] with millisecond precision.
fn fmt(duration: Duration) -> String {
    let rounded = Duration::from_millis(
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
    );
    humantime::format_duration(rounded).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorObject, StepMetadata, StepOptions};

    fn meta(name: &str) -> ScenarioMetadata {
        ScenarioMetadata {
            name: name.into(),
            tags: Vec::new(),
            options: StepOptions::default(),
            steps: Vec::new(),
            origin: None,
        }
    }

    fn rendered(results: &[ScenarioResult]) -> String {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut reporter = Basic::with_output(Vec::new());
            for result in results {
                reporter.on_scenario_end(&result.metadata.clone(), result)
                    .await;
            }
            String::from_utf8(reporter.into_inner()).unwrap()
        })
    }

    #[test]
    fn renders_failed_steps_with_their_error() {
        let result = ScenarioResult {
            metadata: meta("login"),
            status: ScenarioStatus::Failed,
            duration: Duration::from_millis(50),
            steps: vec![StepResult::failed(
                StepMetadata {
                    index: 0,
                    name: "authenticate".into(),
                    options: StepOptions::default(),
                    origin: None,
                },
                Duration::from_millis(50),
                ErrorObject::new("Timeout", "step timed out after 50ms"),
            )],
            error: None,
        };

        let out = rendered(&[result]);

        assert!(out.contains("\u{2718} login"));
        assert!(out.contains("authenticate"));
        assert!(out.contains("Timeout: step timed out after 50ms"));
    }

    #[test]
    fn renders_skips_with_their_reason() {
        let result = ScenarioResult {
            metadata: meta("inventory"),
            status: ScenarioStatus::Skipped,
            duration: Duration::from_millis(2),
            steps: Vec::new(),
            error: Some(ErrorObject::new("Skip", "no message broker")),
        };

        let out = rendered(&[result]);

        assert!(out.contains("\u{26ac} inventory"));
        assert!(out.contains("no message broker"));
    }
}
