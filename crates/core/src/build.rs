// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builds: one execution instance satisfying one or more requests.

use crate::props::Properties;
use crate::request::{RequestId, SourceRev};
use crate::results::Results;
use crate::step::{StepRecord, StepSpec};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a build.
    pub struct BuildId("bld-");
}

/// One execution instance on one worker, satisfying one or more
/// compatible build requests. Created when a builder claims a worker;
/// archived when it reaches a terminal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub builder: String,
    /// Requests satisfied by this build (merged requests share it).
    pub requests: Vec<RequestId>,
    pub worker: String,
    pub revisions: Vec<SourceRev>,
    /// Accumulated properties: seeded from the requests, extended by
    /// step completion messages.
    pub props: Properties,
    /// Execution records, one per step spec, in declared order.
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Results>,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl Build {
    /// Materialize a build from the claim transaction: step records are
    /// created pending, one per spec, in declared order.
    pub fn materialize(
        id: BuildId,
        builder: impl Into<String>,
        worker: impl Into<String>,
        requests: Vec<RequestId>,
        revisions: Vec<SourceRev>,
        props: Properties,
        specs: &[StepSpec],
        epoch_ms: u64,
    ) -> Self {
        Self {
            id,
            builder: builder.into(),
            requests,
            worker: worker.into(),
            revisions,
            props,
            steps: specs.iter().map(|s| StepRecord::pending(&s.name)).collect(),
            results: None,
            started_at_ms: epoch_ms,
            finished_at_ms: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at_ms.is_some()
    }

    /// Finalize with a result. Idempotent: the first finalization wins.
    pub fn finalize(&mut self, results: Results, epoch_ms: u64) {
        if self.finished_at_ms.is_some() {
            return;
        }
        self.results = Some(results);
        self.finished_at_ms = Some(epoch_ms);
    }

    /// Aggregate the build's result from its steps: the worst result
    /// among non-informational steps that actually executed. Steps
    /// skipped or cancelled before running carry no weight. A build
    /// whose steps all skipped is a success.
    pub fn aggregate(&self, specs: &[StepSpec]) -> Results {
        let mut overall = Results::Success;
        for (record, spec) in self.steps.iter().zip(specs) {
            if spec.informational || !record.ran {
                continue;
            }
            if let Some(r) = record.results {
                overall = overall.worst(r);
            }
        }
        overall
    }
}

crate::builder! {
    pub struct BuildBuilder => Build {
        into {
            id: BuildId = BuildId::new(),
            builder: String = "ci",
            worker: String = "w1",
        }
        set {
            requests: Vec<RequestId> = Vec::new(),
            revisions: Vec<SourceRev> = Vec::new(),
            props: Properties = Properties::new(),
            steps: Vec<StepRecord> = Vec::new(),
            started_at_ms: u64 = 1_000_000,
        }
        option {
            results: Results = None,
            finished_at_ms: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "build_tests.rs"]
mod tests;
