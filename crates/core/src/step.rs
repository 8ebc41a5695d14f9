// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build steps: configuration specs and execution records.

use crate::props::Properties;
use crate::results::Results;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

crate::define_id! {
    /// Unique identifier for one remote command dispatch.
    pub struct CommandId("cmd-");
}

/// Execution state of a step. Transitions are monotonic: a state is
/// never revisited, and the only paths are
/// `Pending → Started → Running → Complete` and
/// `Running → Interrupting → Complete`. Steps that never dispatch a
/// remote command (precondition skip, local behaviors) go
/// `Started → Complete` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Started,
    Running,
    Interrupting,
    Complete,
}

impl StepState {
    fn order(self) -> u8 {
        match self {
            StepState::Pending => 0,
            StepState::Started => 1,
            StepState::Running => 2,
            StepState::Interrupting => 3,
            StepState::Complete => 4,
        }
    }

    /// Whether `next` is a legal forward transition from this state.
    pub fn can_advance_to(self, next: StepState) -> bool {
        next.order() > self.order()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Complete)
    }
}

crate::simple_display! {
    StepState {
        Pending => "pending",
        Started => "started",
        Running => "running",
        Interrupting => "interrupting",
        Complete => "complete",
    }
}

/// Output stream a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Engine-generated annotations (command line, skip reasons).
    Header,
}

/// One line of step output, appended in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

impl LogLine {
    pub fn stdout(line: impl Into<String>) -> Self {
        Self { stream: LogStream::Stdout, line: line.into() }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self { stream: LogStream::Stderr, line: line.into() }
    }

    pub fn header(line: impl Into<String>) -> Self {
        Self { stream: LogStream::Header, line: line.into() }
    }
}

/// What a step does when it runs. A closed set: new kinds of step are
/// new variants here, not implementations of an open trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepBehaviorSpec {
    /// Run a shell command on the worker. The command string is
    /// interpolated against the build's properties at dispatch time.
    Shell { command: String },
    /// Sync the build's source revisions into the worker's workdir.
    Checkout,
    /// Set properties on the build without touching the worker.
    SetProperties { props: BTreeMap<String, Value> },
}

/// Configuration for one step in a builder's sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(flatten)]
    pub behavior: StepBehaviorSpec,
    /// When true, a result of `Failure` or worse stops the sequence;
    /// later non-informational steps are recorded as `Skipped`.
    #[serde(default)]
    pub halt_on_failure: bool,
    /// Informational steps are excluded from result aggregation and
    /// still run after the sequence has halted.
    #[serde(default)]
    pub informational: bool,
    /// Names of locks (from the master's lock table) held for the
    /// duration of this step only.
    #[serde(default)]
    pub locks: Vec<String>,
    /// Substring of step output that downgrades a success to warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_on_output: Option<String>,
    /// Precondition: the step runs only when this property is present
    /// and not `false`/`null`. Checked before any side effect; an unmet
    /// precondition completes the step as `Skipped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_if: Option<String>,
}

impl StepSpec {
    pub fn shell(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: StepBehaviorSpec::Shell { command: command.into() },
            halt_on_failure: false,
            informational: false,
            locks: Vec::new(),
            warn_on_output: None,
            only_if: None,
        }
    }

    pub fn checkout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: StepBehaviorSpec::Checkout,
            halt_on_failure: true,
            informational: false,
            locks: Vec::new(),
            warn_on_output: None,
            only_if: None,
        }
    }

    crate::setters! {
        set {
            halt_on_failure: bool,
            informational: bool,
            locks: Vec<String>,
        }
        option {
            warn_on_output: String,
            only_if: String,
        }
    }
}

/// Execution record for one step of a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Results>,
    #[serde(default)]
    pub log: Vec<LogLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    /// True when the step actually executed (dispatched a command or ran
    /// a local behavior), as opposed to being skipped or cancelled
    /// before it began. Only executed steps count toward the build's
    /// aggregated result.
    #[serde(default)]
    pub ran: bool,
}

impl StepRecord {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StepState::Pending,
            results: None,
            log: Vec::new(),
            started_at_ms: None,
            finished_at_ms: None,
            ran: false,
        }
    }

    /// Advance to a later state. Transitions only move forward; an
    /// attempt to revisit an earlier state is ignored, which makes late
    /// transport messages harmless.
    pub fn advance(&mut self, next: StepState, epoch_ms: u64) {
        if !self.state.can_advance_to(next) {
            return;
        }
        if self.started_at_ms.is_none() && next != StepState::Pending {
            self.started_at_ms = Some(epoch_ms);
        }
        self.state = next;
    }

    /// Finalize with a result. Idempotent: the first finalization wins.
    pub fn finalize(&mut self, results: Results, epoch_ms: u64) {
        if self.finished_at_ms.is_some() {
            return;
        }
        self.state = StepState::Complete;
        self.results = Some(results);
        self.finished_at_ms = Some(epoch_ms);
    }

    pub fn append_log(&mut self, line: LogLine) {
        self.log.push(line);
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Render the remote command for a behavior, if it needs one.
///
/// Returns `None` for behaviors that complete locally. The argument map
/// is what travels in the command message; its shape is part of the
/// worker protocol.
pub fn remote_command(
    behavior: &StepBehaviorSpec,
    props: &Properties,
    revisions: &[crate::request::SourceRev],
) -> Option<(String, BTreeMap<String, Value>)> {
    match behavior {
        StepBehaviorSpec::Shell { command } => {
            let mut args = BTreeMap::new();
            args.insert("command".to_string(), Value::String(props.interpolate(command)));
            Some(("shell".to_string(), args))
        }
        StepBehaviorSpec::Checkout => {
            let mut args = BTreeMap::new();
            let revs = revisions
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "repo": r.repo,
                        "branch": r.branch,
                        "revision": r.revision,
                    })
                })
                .collect::<Vec<_>>();
            args.insert("revisions".to_string(), Value::Array(revs));
            Some(("checkout".to_string(), args))
        }
        StepBehaviorSpec::SetProperties { .. } => None,
    }
}

crate::builder! {
    pub struct StepSpecBuilder => StepSpec {
        into {
            name: String = "compile",
        }
        set {
            behavior: StepBehaviorSpec = StepBehaviorSpec::Shell { command: "make".into() },
            halt_on_failure: bool = false,
            informational: bool = false,
            locks: Vec<String> = Vec::new(),
        }
        option {
            warn_on_output: String = None,
            only_if: String = None,
        }
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
