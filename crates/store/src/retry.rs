// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retrying adapter: survive momentary store unavailability by
//! retrying the specific operation rather than losing in-memory state.

use crate::datastore::{Datastore, StoreError};
use async_trait::async_trait;
use forge_core::{Build, BuildId, BuildRequest, Claim, RequestId, Results, StepRecord};
use std::future::Future;
use std::time::Duration;

/// Backoff schedule for retries. `max_attempts = None` retries until
/// the store recovers; the engine's claim/finalize boundaries use that
/// mode so durable and in-memory state never diverge.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(50), cap: Duration::from_secs(10), max_attempts: None }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based attempt that just failed).
    fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.cap)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt >= max,
            None => false,
        }
    }
}

/// Wraps any [`Datastore`] and retries retryable failures.
/// Non-retryable errors (claim conflicts, corruption) pass through.
pub struct Retrying<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: Datastore> Retrying<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn with_defaults(inner: S) -> Self {
        Self::new(inner, RetryPolicy::default())
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && !self.policy.exhausted(attempt) => {
                    let delay = self.policy.delay(attempt);
                    tracing::warn!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "store operation failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: Datastore> Datastore for Retrying<S> {
    async fn create_request(&self, req: &BuildRequest) -> Result<(), StoreError> {
        self.run("create_request", || self.inner.create_request(req)).await
    }

    async fn claim_requests(&self, ids: &[RequestId], claim: &Claim) -> Result<(), StoreError> {
        self.run("claim_requests", || self.inner.claim_requests(ids, claim)).await
    }

    async fn unclaim_requests(&self, ids: &[RequestId]) -> Result<(), StoreError> {
        self.run("unclaim_requests", || self.inner.unclaim_requests(ids)).await
    }

    async fn complete_requests(
        &self,
        ids: &[RequestId],
        results: Results,
    ) -> Result<(), StoreError> {
        self.run("complete_requests", || self.inner.complete_requests(ids, results)).await
    }

    async fn create_build(&self, build: &Build) -> Result<(), StoreError> {
        self.run("create_build", || self.inner.create_build(build)).await
    }

    async fn append_step(
        &self,
        build_id: &BuildId,
        index: usize,
        step: &StepRecord,
    ) -> Result<(), StoreError> {
        self.run("append_step", || self.inner.append_step(build_id, index, step)).await
    }

    async fn finalize_build(&self, build: &Build) -> Result<(), StoreError> {
        self.run("finalize_build", || self.inner.finalize_build(build)).await
    }

    async fn get_request(&self, id: &RequestId) -> Result<Option<BuildRequest>, StoreError> {
        self.run("get_request", || self.inner.get_request(id)).await
    }

    async fn get_build(&self, id: &BuildId) -> Result<Option<Build>, StoreError> {
        self.run("get_build", || self.inner.get_build(id)).await
    }

    async fn pending_requests(&self) -> Result<Vec<BuildRequest>, StoreError> {
        self.run("pending_requests", || self.inner.pending_requests()).await
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
