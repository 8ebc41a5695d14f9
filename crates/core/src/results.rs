// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result severities for steps and builds.

use serde::{Deserialize, Serialize};

/// Outcome of a step or build.
///
/// The first four variants form an ordered severity scale
/// (`Success < Warnings < Failure < Exception`). The remaining three are
/// terminal markers for work that never ran to completion: `Skipped`
/// (precondition not met, or sequence halted), `Cancelled` (interrupted
/// before or during execution), and `Retry` (should be resubmitted by a
/// layer above the engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Results {
    Success,
    Warnings,
    Failure,
    Exception,
    Skipped,
    Cancelled,
    Retry,
}

impl Results {
    /// Total rank used by [`worst`](Self::worst). `Skipped` sits below
    /// `Success` so skipped steps never drag a build's result up; the
    /// interruption markers outrank everything so an interrupted build
    /// is never reported as a plain failure.
    fn rank(self) -> u8 {
        match self {
            Results::Skipped => 0,
            Results::Success => 1,
            Results::Warnings => 2,
            Results::Failure => 3,
            Results::Exception => 4,
            Results::Retry => 5,
            Results::Cancelled => 6,
        }
    }

    /// The worse of two results under the severity ordering.
    pub fn worst(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    /// True for `Failure`, `Exception`, `Retry`, and `Cancelled`.
    pub fn is_failure_or_worse(self) -> bool {
        self.rank() >= Results::Failure.rank()
    }

    /// True when the work ran and finished on its own (including with
    /// warnings or an ordinary failure).
    pub fn ran_to_completion(self) -> bool {
        matches!(self, Results::Success | Results::Warnings | Results::Failure)
    }

    /// Map a remote command exit status to a result.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Results::Success
        } else {
            Results::Failure
        }
    }
}

crate::simple_display! {
    Results {
        Success => "success",
        Warnings => "warnings",
        Failure => "failure",
        Exception => "exception",
        Skipped => "skipped",
        Cancelled => "cancelled",
        Retry => "retry",
    }
}

#[cfg(test)]
#[path = "results_tests.rs"]
mod tests;
