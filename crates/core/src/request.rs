// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build requests: units of demand for a builder.

use crate::build::BuildId;
use crate::props::Properties;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a build request.
    pub struct RequestId("req-");
}

/// A source revision the request asks to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRev {
    pub repo: String,
    pub branch: String,
    /// Concrete revision; `None` means tip of the branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl SourceRev {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self { repo: repo.into(), branch: branch.into(), revision: None }
    }

    pub fn at(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

/// Record of which build claimed a request, and on whose behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub build_id: BuildId,
    pub worker: String,
    /// Name of the master instance that performed the claim.
    pub master: String,
    pub claimed_at_ms: u64,
}

/// A unit of demand for a builder.
///
/// Immutable after submission except for the claim field. Completed when
/// the build satisfying it finishes, or cancelled while still unclaimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: RequestId,
    pub builder: String,
    pub props: Properties,
    pub revisions: Vec<SourceRev>,
    /// Higher runs first; ties break on submission time.
    pub priority: i32,
    pub submitted_at_ms: u64,
    /// Caller-supplied idempotency key; a second submission with the same
    /// key while this request is pending is rejected as a duplicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
}

impl BuildRequest {
    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    /// Whether two pending requests may be satisfied by one build:
    /// same builder, equal properties, equal revision sets.
    pub fn compatible_with(&self, other: &BuildRequest) -> bool {
        self.builder == other.builder
            && self.props == other.props
            && self.revisions == other.revisions
    }

    /// Sort key for the pending queue: highest priority first, then
    /// oldest submission, then id for a stable total order.
    pub fn queue_key(&self) -> (i32, u64, &str) {
        (-self.priority, self.submitted_at_ms, self.id.as_str())
    }
}

crate::builder! {
    pub struct BuildRequestBuilder => BuildRequest {
        into {
            id: RequestId = RequestId::new(),
            builder: String = "ci",
        }
        set {
            props: Properties = Properties::new(),
            revisions: Vec<SourceRev> = Vec::new(),
            priority: i32 = 0,
            submitted_at_ms: u64 = 1_000_000,
        }
        option {
            dedup_key: String = None,
            claim: Claim = None,
        }
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
