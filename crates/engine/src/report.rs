// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reporting seam: build completions and live log streaming.
//!
//! The engine notifies and moves on — it never waits for a reporter.
//! Implementations that need to do real work should hand the event to
//! their own task (as [`ChannelReporter`] does).

use forge_core::{Build, BuildId, LogLine, Results};
use tokio::sync::mpsc;

/// Collaborator notified of build lifecycle events.
pub trait Reporter: Send + Sync {
    fn build_started(&self, _build: &Build) {}
    fn step_log(&self, _build_id: &BuildId, _step: &str, _line: &LogLine) {}
    fn build_finished(&self, _build: &Build, _results: Results) {}
}

/// Discards everything.
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Logs lifecycle events through `tracing`. Step output is logged at
/// debug to keep build logs out of the master's own log by default.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn build_started(&self, build: &Build) {
        tracing::info!(build = %build.id, builder = build.builder.as_str(),
            worker = build.worker.as_str(), "build started");
    }

    fn step_log(&self, build_id: &BuildId, step: &str, line: &LogLine) {
        tracing::debug!(build = %build_id, step, line = line.line.as_str(), "step output");
    }

    fn build_finished(&self, build: &Build, results: Results) {
        tracing::info!(build = %build.id, builder = build.builder.as_str(),
            worker = build.worker.as_str(), %results, "build finished");
    }
}

/// Event stream for subscribers (and tests).
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    BuildStarted { build_id: BuildId },
    StepLog { build_id: BuildId, step: String, line: LogLine },
    BuildFinished { build_id: BuildId, results: Results },
}

/// Forwards events into an unbounded channel; send failures (receiver
/// gone) are ignored, keeping the engine decoupled from subscribers.
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ReportEvent>,
}

impl ChannelReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn build_started(&self, build: &Build) {
        let _ = self.tx.send(ReportEvent::BuildStarted { build_id: build.id.clone() });
    }

    fn step_log(&self, build_id: &BuildId, step: &str, line: &LogLine) {
        let _ = self.tx.send(ReportEvent::StepLog {
            build_id: build_id.clone(),
            step: step.to_string(),
            line: line.clone(),
        });
    }

    fn build_finished(&self, build: &Build, results: Results) {
        let _ = self.tx.send(ReportEvent::BuildFinished { build_id: build.id.clone(), results });
    }
}
