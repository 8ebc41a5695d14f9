// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persistent-store contract the engine programs against.

use async_trait::async_trait;
use forge_core::{Build, BuildId, BuildRequest, Claim, RequestId, Results, StepRecord};
use thiserror::Error;

/// Errors surfaced by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is momentarily unreachable; the operation may be
    /// retried as-is.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// One or more requests were already claimed. Not retryable: the
    /// caller lost the race and must restart its match pass.
    #[error("claim conflict on {0:?}")]
    ClaimConflict(Vec<RequestId>),
    #[error("no such record: {0}")]
    NotFound(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Durable records for requests, builds, and steps.
///
/// `claim_requests` is the one operation with transactional semantics:
/// it claims all of the given requests or none of them, and rejects the
/// whole batch if any is already claimed or already complete.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn create_request(&self, req: &BuildRequest) -> Result<(), StoreError>;

    /// Atomically claim a batch of requests. All-or-nothing.
    async fn claim_requests(&self, ids: &[RequestId], claim: &Claim) -> Result<(), StoreError>;

    /// Drop the claim on a batch of requests (a claim that could not be
    /// turned into a running build).
    async fn unclaim_requests(&self, ids: &[RequestId]) -> Result<(), StoreError>;

    /// Mark requests complete with the results of the build that
    /// satisfied them (or `Cancelled` for requests cancelled while
    /// still pending).
    async fn complete_requests(&self, ids: &[RequestId], results: Results)
        -> Result<(), StoreError>;

    async fn create_build(&self, build: &Build) -> Result<(), StoreError>;

    /// Record one step's final state on its build.
    async fn append_step(
        &self,
        build_id: &BuildId,
        index: usize,
        step: &StepRecord,
    ) -> Result<(), StoreError>;

    /// Record a build's terminal state (steps included).
    async fn finalize_build(&self, build: &Build) -> Result<(), StoreError>;

    async fn get_request(&self, id: &RequestId) -> Result<Option<BuildRequest>, StoreError>;

    async fn get_build(&self, id: &BuildId) -> Result<Option<Build>, StoreError>;

    /// All requests that are neither claimed nor complete, for recovery
    /// at startup.
    async fn pending_requests(&self) -> Result<Vec<BuildRequest>, StoreError>;
}
