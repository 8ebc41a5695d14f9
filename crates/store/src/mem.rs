// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store: the reference implementation of [`Datastore`].

use crate::datastore::{Datastore, StoreError};
use async_trait::async_trait;
use forge_core::{Build, BuildId, BuildRequest, Claim, RequestId, Results, StepRecord};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct StoredRequest {
    req: BuildRequest,
    complete: Option<Results>,
}

#[derive(Default)]
struct MemInner {
    requests: HashMap<RequestId, StoredRequest>,
    builds: HashMap<BuildId, Build>,
}

/// Maps behind one mutex. Claim batches are checked and applied under a
/// single guard, which is what gives the claim its all-or-nothing
/// semantics.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay hook used by the journal: apply without going through the
    /// async trait.
    pub(crate) fn apply_create_request(&self, req: BuildRequest) {
        self.inner
            .lock()
            .requests
            .entry(req.id.clone())
            .or_insert(StoredRequest { req, complete: None });
    }

    pub(crate) fn apply_claim(&self, ids: &[RequestId], claim: &Claim) {
        let mut inner = self.inner.lock();
        for id in ids {
            if let Some(stored) = inner.requests.get_mut(id) {
                stored.req.claim = Some(claim.clone());
            }
        }
    }

    pub(crate) fn apply_unclaim(&self, ids: &[RequestId]) {
        let mut inner = self.inner.lock();
        for id in ids {
            if let Some(stored) = inner.requests.get_mut(id) {
                stored.req.claim = None;
            }
        }
    }

    pub(crate) fn apply_complete(&self, ids: &[RequestId], results: Results) {
        let mut inner = self.inner.lock();
        for id in ids {
            if let Some(stored) = inner.requests.get_mut(id) {
                stored.complete.get_or_insert(results);
            }
        }
    }

    pub(crate) fn apply_build(&self, build: Build) {
        self.inner.lock().builds.insert(build.id.clone(), build);
    }

    pub(crate) fn apply_step(&self, build_id: &BuildId, index: usize, step: StepRecord) {
        let mut inner = self.inner.lock();
        if let Some(build) = inner.builds.get_mut(build_id) {
            if let Some(slot) = build.steps.get_mut(index) {
                *slot = step;
            }
        }
    }

    /// Results recorded for a completed request, if any.
    pub fn request_results(&self, id: &RequestId) -> Option<Results> {
        self.inner.lock().requests.get(id).and_then(|s| s.complete)
    }
}

#[async_trait]
impl Datastore for MemStore {
    async fn create_request(&self, req: &BuildRequest) -> Result<(), StoreError> {
        self.apply_create_request(req.clone());
        Ok(())
    }

    async fn claim_requests(&self, ids: &[RequestId], claim: &Claim) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let mut conflicts = Vec::new();
        for id in ids {
            match inner.requests.get(id) {
                Some(stored) if stored.req.is_claimed() || stored.complete.is_some() => {
                    conflicts.push(id.clone());
                }
                Some(_) => {}
                None => conflicts.push(id.clone()),
            }
        }
        if !conflicts.is_empty() {
            return Err(StoreError::ClaimConflict(conflicts));
        }
        for id in ids {
            if let Some(stored) = inner.requests.get_mut(id) {
                stored.req.claim = Some(claim.clone());
            }
        }
        Ok(())
    }

    async fn unclaim_requests(&self, ids: &[RequestId]) -> Result<(), StoreError> {
        self.apply_unclaim(ids);
        Ok(())
    }

    async fn complete_requests(
        &self,
        ids: &[RequestId],
        results: Results,
    ) -> Result<(), StoreError> {
        self.apply_complete(ids, results);
        Ok(())
    }

    async fn create_build(&self, build: &Build) -> Result<(), StoreError> {
        self.apply_build(build.clone());
        Ok(())
    }

    async fn append_step(
        &self,
        build_id: &BuildId,
        index: usize,
        step: &StepRecord,
    ) -> Result<(), StoreError> {
        self.apply_step(build_id, index, step.clone());
        Ok(())
    }

    async fn finalize_build(&self, build: &Build) -> Result<(), StoreError> {
        self.apply_build(build.clone());
        Ok(())
    }

    async fn get_request(&self, id: &RequestId) -> Result<Option<BuildRequest>, StoreError> {
        Ok(self.inner.lock().requests.get(id).map(|s| s.req.clone()))
    }

    async fn get_build(&self, id: &BuildId) -> Result<Option<Build>, StoreError> {
        Ok(self.inner.lock().builds.get(id).cloned())
    }

    async fn pending_requests(&self) -> Result<Vec<BuildRequest>, StoreError> {
        let inner = self.inner.lock();
        let mut pending: Vec<BuildRequest> = inner
            .requests
            .values()
            .filter(|s| !s.req.is_claimed() && s.complete.is_none())
            .map(|s| s.req.clone())
            .collect();
        pending.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        Ok(pending)
    }
}

#[cfg(test)]
#[path = "mem_tests.rs"]
mod tests;
