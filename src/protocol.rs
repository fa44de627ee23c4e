// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Line-delimited JSON protocol between the [`Pool`] and its workers.
//!
//! Each message is one JSON document on one line of the child's stdin
//! (parent → child) or stdout (child → parent); writers append a newline per
//! message, readers split on newlines before decoding. The child's stderr
//! carries human-readable logs and is not part of the protocol.
//!
//! A line whose `type` is unknown to the receiver is ignored, keeping the
//! protocol forward-compatible.
//!
//! [`Pool`]: crate::Pool

use std::time::Duration;

use derive_more::{Display, Error};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    scenario::{opt_duration_ms, ScenarioMetadata, StepMetadata},
    ErrorObject, ScenarioResult, StepResult,
};

/// Message types a parent understands; anything else is skipped.
const KNOWN_WORKER_MESSAGES: &[&str] = &[
    "ready",
    "scenario_start",
    "step_start",
    "step_end",
    "scenario_end",
    "result",
    "error",
];

/// Message types a child understands; anything else is skipped.
const KNOWN_COMMANDS: &[&str] = &["run", "terminate"];

/// Message sent by the [`Pool`] to a worker child.
///
/// [`Pool`]: crate::Pool
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Execute one scenario and report back under the given `task_id`.
    Run {
        /// Correlation id echoed by every message about this task.
        task_id: String,

        /// Declaration file to load the scenario from.
        file_path: String,

        /// Position of the scenario within the file's ordered list.
        scenario_index: usize,

        /// Optional scenario-wide timeout.
        #[serde(
            default,
            rename = "timeout_ms",
            skip_serializing_if = "Option::is_none",
            with = "opt_duration_ms"
        )]
        timeout: Option<Duration>,

        /// Verbosity for the worker's stderr diagnostics.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        log_level: Option<String>,
    },

    /// Drain and exit cleanly.
    Terminate,
}

/// Message sent by a worker child to the [`Pool`].
///
/// [`Pool`]: crate::Pool
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Sent once at startup; the worker is usable from here on.
    Ready,

    /// A scenario began executing.
    ScenarioStart {
        /// Correlation id of the task.
        task_id: String,

        /// Projection of the executing scenario.
        scenario: ScenarioMetadata,
    },

    /// A step began executing.
    StepStart {
        /// Correlation id of the task.
        task_id: String,

        /// Projection of the executing scenario.
        scenario: ScenarioMetadata,

        /// Projection of the executing step.
        step: StepMetadata,
    },

    /// A step finished, with its recorded result.
    StepEnd {
        /// Correlation id of the task.
        task_id: String,

        /// Projection of the executing scenario.
        scenario: ScenarioMetadata,

        /// Projection of the executed step.
        step: StepMetadata,

        /// Result of the step, across all of its attempts.
        result: StepResult,
    },

    /// A scenario finished, teardown included.
    ScenarioEnd {
        /// Correlation id of the task.
        task_id: String,

        /// Projection of the executed scenario.
        scenario: ScenarioMetadata,

        /// Full result of the scenario.
        result: ScenarioResult,
    },

    /// Terminal message of the success path.
    Result {
        /// Correlation id of the task.
        task_id: String,

        /// Full result of the scenario.
        result: ScenarioResult,
    },

    /// Terminal message of an engine-level failure (e.g. the scenario file
    /// failed to load).
    Error {
        /// Correlation id of the task.
        task_id: String,

        /// What went wrong, flattened for transit.
        error: ErrorObject,
    },
}

impl WorkerMessage {
    /// Correlation id this message is about, if it is about a task at all.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Ready => None,
            Self::ScenarioStart { task_id, .. }
            | Self::StepStart { task_id, .. }
            | Self::StepEnd { task_id, .. }
            | Self::ScenarioEnd { task_id, .. }
            | Self::Result { task_id, .. }
            | Self::Error { task_id, .. } => Some(task_id),
        }
    }
}

/// Violation of the line-delimited JSON protocol by the peer.
#[derive(Clone, Debug, Display, Error)]
#[display("protocol violation: {detail}")]
pub struct ProtocolViolation {
    /// What exactly was wrong with the received line.
    #[error(not(source))]
    pub detail: String,
}

/// Encodes one message as a single protocol line, newline included.
///
/// # Errors
///
/// If the message fails to serialize, which a well-formed one never does.
pub fn encode<T: Serialize>(msg: &T) -> serde_json::Result<String> {
    serde_json::to_string(msg).map(|mut line| {
        line.push('\n');
        line
    })
}

/// Decodes one [`WorkerMessage`] out of a protocol line.
///
/// Returns [`None`] for blank lines and messages of an unknown `type`.
///
/// # Errors
///
/// If the line is not a JSON object, or is a known message with a malformed
/// payload.
pub fn decode_worker_message(
    line: &str,
) -> Result<Option<WorkerMessage>, ProtocolViolation> {
    decode(line, KNOWN_WORKER_MESSAGES)
}

/// Decodes one [`Command`] out of a protocol line.
///
/// Returns [`None`] for blank lines and messages of an unknown `type`.
///
/// # Errors
///
/// If the line is not a JSON object, or is a known message with a malformed
/// payload.
pub fn decode_command(
    line: &str,
) -> Result<Option<Command>, ProtocolViolation> {
    decode(line, KNOWN_COMMANDS)
}

/// Decodes one message, skipping blank lines and unknown `type`s.
fn decode<T: DeserializeOwned>(
    line: &str,
    known: &[&str],
) -> Result<Option<T>, ProtocolViolation> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<T>(line) {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => {
            // An unknown `type` on an otherwise well-formed message is
            // skipped for forward compatibility.
            let is_unknown_type = serde_json::from_str::<serde_json::Value>(
                line,
            )
            .ok()
            .and_then(|v| {
                let ty = v.as_object()?.get("type")?.as_str()?.to_owned();
                Some(!known.contains(&ty.as_str()))
            })
            .unwrap_or(false);

            if is_unknown_type {
                tracing::debug!(%line, "skipping message of unknown type");
                Ok(None)
            } else {
                Err(ProtocolViolation { detail: e.to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScenarioStatus, StepOptions};

    fn meta(name: &str) -> ScenarioMetadata {
        ScenarioMetadata {
            name: name.into(),
            tags: vec!["api".into()],
            options: StepOptions::default(),
            steps: Vec::new(),
            origin: None,
        }
    }

    fn result(name: &str) -> ScenarioResult {
        ScenarioResult {
            metadata: meta(name),
            status: ScenarioStatus::Passed,
            duration: Duration::from_millis(7),
            steps: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn commands_round_trip() {
        let run = Command::Run {
            task_id: "task-1".into(),
            file_path: "tests/checkout.rs".into(),
            scenario_index: 2,
            timeout: Some(Duration::from_secs(60)),
            log_level: Some("debug".into()),
        };

        let line = encode(&run).unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains(r#""type":"run""#));
        assert!(line.contains(r#""timeout_ms":60000"#));

        assert_eq!(decode_command(&line).unwrap(), Some(run));
        assert_eq!(
            decode_command(r#"{"type":"terminate"}"#).unwrap(),
            Some(Command::Terminate),
        );
    }

    #[test]
    fn worker_messages_round_trip() {
        let messages = vec![
            WorkerMessage::Ready,
            WorkerMessage::ScenarioStart {
                task_id: "t".into(),
                scenario: meta("checkout"),
            },
            WorkerMessage::Result {
                task_id: "t".into(),
                result: result("checkout"),
            },
            WorkerMessage::Error {
                task_id: "t".into(),
                error: ErrorObject::new("LoadError", "unknown file"),
            },
        ];

        for msg in messages {
            let line = encode(&msg).unwrap();
            let back = decode_worker_message(&line).unwrap();
            assert_eq!(back, Some(msg));
        }
    }

    #[test]
    fn message_types_are_snake_case_on_the_wire() {
        let msg = WorkerMessage::ScenarioEnd {
            task_id: "t".into(),
            scenario: meta("s"),
            result: result("s"),
        };

        let line = encode(&msg).unwrap();
        assert!(line.contains(r#""type":"scenario_end""#));
    }

    #[test]
    fn unknown_types_are_skipped() {
        let line = r#"{"type":"telemetry","task_id":"t","payload":{}}"#;

        assert_eq!(decode_worker_message(line).unwrap(), None);
        assert_eq!(decode_command(line).unwrap(), None);
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(decode_worker_message("").unwrap(), None);
        assert_eq!(decode_worker_message("   ").unwrap(), None);
    }

    #[test]
    fn garbage_is_a_protocol_violation() {
        assert!(decode_worker_message("not json").is_err());
        assert!(decode_worker_message("[1, 2, 3]").is_err());

        // Known type with a malformed payload is an error, not a skip.
        let malformed = r#"{"type":"result","task_id":7}"#;
        assert!(decode_worker_message(malformed).is_err());
    }

    #[test]
    fn scenario_results_survive_the_envelope() {
        let original = result("round-trip");
        let msg = WorkerMessage::Result {
            task_id: "t".into(),
            result: original.clone(),
        };

        let line = encode(&msg).unwrap();
        match decode_worker_message(&line).unwrap() {
            Some(WorkerMessage::Result { result, .. }) => {
                assert_eq!(result, original);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
