// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol: the trigger surface exposed to tooling above the
//! engine (change sources, schedulers, operators).

use forge_core::{BuildId, Properties, RequestId, Results, SourceRev};
use serde::{Deserialize, Serialize};

/// Inbound control requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Submit a build request for a builder.
    Submit {
        builder: String,
        #[serde(default)]
        props: Properties,
        #[serde(default)]
        revisions: Vec<SourceRev>,
        #[serde(default)]
        priority: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dedup_key: Option<String>,
    },
    /// Cancel a request: removed if unclaimed, otherwise the build
    /// satisfying it is interrupted.
    Cancel { request_id: RequestId },
    Status,
}

/// What happened to a cancelled request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The request was still pending and has been removed.
    Removed,
    /// The request was claimed; its build is being interrupted.
    Interrupting,
}

/// One worker's row in a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub attached: bool,
    pub slots: u32,
    pub busy: u32,
}

/// Engine status for the `status` verb.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Unclaimed request counts per builder.
    pub pending: Vec<(String, usize)>,
    /// Running build ids with their builder and worker.
    pub running: Vec<(BuildId, String, String)>,
    pub workers: Vec<WorkerStatus>,
}

/// Control replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Submitted {
        request_id: RequestId,
    },
    /// The submission duplicated a pending request; `request_id` is the
    /// surviving one.
    Duplicate {
        request_id: RequestId,
    },
    Cancelled {
        outcome: CancelOutcome,
    },
    Status {
        snapshot: StatusSnapshot,
    },
    /// A completed build, echoed on subscription surfaces.
    BuildDone {
        build_id: BuildId,
        results: Results,
    },
    Error {
        message: String,
    },
}
