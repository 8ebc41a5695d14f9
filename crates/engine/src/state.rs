// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduling domain's shared mutable state.
//!
//! Pending request queues, the worker slot table, and the running build
//! set live together in one object behind one mutex. Every compound
//! transition — claim requests + reserve a slot + register the build,
//! or the inverse on release/rollback — happens inside one critical
//! section, so concurrent claim attempts can never double-reserve a
//! slot or double-claim a request.

use crate::config::BuilderConfig;
use crate::policy::{IdleWorker, WorkerPolicy};
use forge_core::{
    Build, BuildId, BuildRequest, Claim, Properties, RequestId, WorkerInfo,
};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Per-worker slot accounting and attachment state. The record exists
/// for every configured worker whether or not it is attached.
#[derive(Debug)]
pub(crate) struct WorkerState {
    pub slots: u32,
    pub busy: u32,
    pub attached: bool,
    pub info: WorkerInfo,
}

impl WorkerState {
    pub fn new(name: &str, slots: u32) -> Self {
        Self { slots, busy: 0, attached: false, info: WorkerInfo::new(name) }
    }

    pub fn is_idle(&self) -> bool {
        self.attached && self.busy < self.slots
    }
}

/// A build registered as running.
pub(crate) struct RunningBuild {
    pub builder: String,
    pub worker: String,
    pub requests: Vec<RequestId>,
    pub cancel: CancellationToken,
}

/// Everything a successful claim transaction produced. Handed to the
/// dispatcher to persist and launch; handed back to
/// [`SchedState::rollback_claim`] if persistence loses the race.
pub(crate) struct PreparedClaim {
    pub build: Build,
    pub requests: Vec<BuildRequest>,
    pub claim: Claim,
}

#[derive(Default)]
pub(crate) struct SchedState {
    /// Unclaimed requests per builder, kept sorted by queue key.
    pending: HashMap<String, Vec<BuildRequest>>,
    /// Idempotency keys of pending requests.
    dedup: HashMap<String, RequestId>,
    /// Claimed requests → the build satisfying them.
    claimed: HashMap<RequestId, BuildId>,
    workers: HashMap<String, WorkerState>,
    running: HashMap<BuildId, RunningBuild>,
    /// Set during shutdown: no new claims.
    pub draining: bool,
}

impl SchedState {
    pub fn new(workers: impl Iterator<Item = (String, u32)>) -> Self {
        let mut state = Self::default();
        for (name, slots) in workers {
            state.workers.insert(name.clone(), WorkerState::new(&name, slots));
        }
        state
    }

    // --- request intake ---

    /// Reserve an idempotency key for a submission. Returns the already
    /// pending request id if the key is taken.
    pub fn reserve_dedup_key(&mut self, key: &str, id: &RequestId) -> Result<(), RequestId> {
        if let Some(existing) = self.dedup.get(key) {
            return Err(existing.clone());
        }
        self.dedup.insert(key.to_string(), id.clone());
        Ok(())
    }

    pub fn drop_dedup_key(&mut self, key: &str) {
        self.dedup.remove(key);
    }

    /// Insert a persisted request into its builder's pending queue.
    pub fn enqueue(&mut self, req: BuildRequest) {
        let queue = self.pending.entry(req.builder.clone()).or_default();
        let pos = queue
            .binary_search_by(|probe| probe.queue_key().cmp(&req.queue_key()))
            .unwrap_or_else(|pos| pos);
        queue.insert(pos, req);
    }

    /// Remove a pending request by id (cancellation). Returns it.
    pub fn remove_pending(&mut self, id: &RequestId) -> Option<BuildRequest> {
        for queue in self.pending.values_mut() {
            if let Some(pos) = queue.iter().position(|r| &r.id == id) {
                let req = queue.remove(pos);
                if let Some(key) = &req.dedup_key {
                    self.dedup.remove(key);
                }
                return Some(req);
            }
        }
        None
    }

    pub fn pending_count(&self, builder: &str) -> usize {
        self.pending.get(builder).map(Vec::len).unwrap_or(0)
    }

    /// (priority, submitted_at) of the best pending request, for
    /// ordering builders in the match pass.
    pub fn best_pending(&self, builder: &str) -> Option<(i32, u64)> {
        self.pending
            .get(builder)?
            .first()
            .map(|r| (r.priority, r.submitted_at_ms))
    }

    // --- claim transaction ---

    /// Attempt to claim for one builder: pick the oldest eligible
    /// pending request, gather merge-compatible requests behind it,
    /// select an idle worker through the policy, and — atomically with
    /// respect to this state object — mark the requests claimed,
    /// reserve the worker slot, and register the build.
    ///
    /// Returns `None` (leaving state untouched) when there is nothing
    /// to claim or no idle eligible worker.
    pub fn try_claim(
        &mut self,
        cfg: &BuilderConfig,
        policy: &mut dyn WorkerPolicy,
        master: &str,
        epoch_ms: u64,
    ) -> Option<PreparedClaim> {
        if self.draining {
            return None;
        }
        let queue = self.pending.get(&cfg.name)?;
        if queue.is_empty() {
            return None;
        }

        let candidates: Vec<IdleWorker> = cfg
            .workers
            .iter()
            .filter_map(|name| self.workers.get(name).map(|w| (name, w)))
            .filter(|(_, w)| w.is_idle() && w.info.satisfies(cfg.requires.iter()))
            .map(|(name, w)| IdleWorker { name: name.clone(), busy: w.busy, slots: w.slots })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let worker = policy.select(&candidates)?;
        if !candidates.iter().any(|c| c.name == worker) {
            // Policy picked something outside its candidate set.
            tracing::warn!(builder = cfg.name.as_str(), worker, "policy chose ineligible worker");
            return None;
        }

        // Oldest eligible request plus everything mergeable with it.
        let queue = self.pending.get_mut(&cfg.name)?;
        let head = queue.remove(0);
        let mut requests = vec![head];
        let mut i = 0;
        while i < queue.len() {
            if queue[i].compatible_with(&requests[0]) {
                requests.push(queue.remove(i));
            } else {
                i += 1;
            }
        }

        let build_id = BuildId::new();
        let claim = Claim {
            build_id: build_id.clone(),
            worker: worker.clone(),
            master: master.to_string(),
            claimed_at_ms: epoch_ms,
        };

        let mut props = Properties::new();
        for req in &mut requests {
            req.claim = Some(claim.clone());
            props.merge(&req.props);
            if let Some(key) = &req.dedup_key {
                self.dedup.remove(key);
            }
            self.claimed.insert(req.id.clone(), build_id.clone());
        }

        if let Some(w) = self.workers.get_mut(&worker) {
            w.busy += 1;
        }

        let build = Build::materialize(
            build_id.clone(),
            cfg.name.clone(),
            worker.clone(),
            requests.iter().map(|r| r.id.clone()).collect(),
            requests[0].revisions.clone(),
            props,
            &cfg.steps,
            epoch_ms,
        );

        self.running.insert(
            build_id,
            RunningBuild {
                builder: cfg.name.clone(),
                worker,
                requests: requests.iter().map(|r| r.id.clone()).collect(),
                cancel: CancellationToken::new(),
            },
        );

        Some(PreparedClaim { build, requests, claim })
    }

    /// Undo a prepared claim whose persistence failed: requests return
    /// to the pending queue unclaimed, the slot frees, the build
    /// unregisters. The inverse of [`try_claim`], in one critical
    /// section.
    pub fn rollback_claim(&mut self, prepared: PreparedClaim) {
        let PreparedClaim { build, requests, .. } = prepared;
        self.running.remove(&build.id);
        if let Some(w) = self.workers.get_mut(&build.worker) {
            w.busy = w.busy.saturating_sub(1);
        }
        for mut req in requests {
            req.claim = None;
            self.claimed.remove(&req.id);
            if let Some(key) = &req.dedup_key {
                self.dedup.insert(key.clone(), req.id.clone());
            }
            self.enqueue(req);
        }
    }

    /// Release everything a finished build held: slot, claimed-request
    /// entries, running registration.
    pub fn release_build(&mut self, id: &BuildId) -> Option<RunningBuild> {
        let running = self.running.remove(id)?;
        if let Some(w) = self.workers.get_mut(&running.worker) {
            w.busy = w.busy.saturating_sub(1);
        }
        for req in &running.requests {
            self.claimed.remove(req);
        }
        Some(running)
    }

    // --- workers ---

    pub fn worker_attached(&mut self, info: WorkerInfo) {
        if let Some(w) = self.workers.get_mut(&info.name) {
            w.attached = true;
            w.info = info;
        }
    }

    pub fn worker_detached(&mut self, name: &str) {
        if let Some(w) = self.workers.get_mut(name) {
            w.attached = false;
        }
    }

    pub fn worker_known(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    // --- queries ---

    pub fn build_for_request(&self, id: &RequestId) -> Option<&BuildId> {
        self.claimed.get(id)
    }

    pub fn cancel_token(&self, build: &BuildId) -> Option<CancellationToken> {
        self.running.get(build).map(|r| r.cancel.clone())
    }

    pub fn running_tokens(&self) -> Vec<CancellationToken> {
        self.running.values().map(|r| r.cancel.clone()).collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn snapshot(&self) -> forge_wire::StatusSnapshot {
        let mut pending: Vec<(String, usize)> = self
            .pending
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(b, q)| (b.clone(), q.len()))
            .collect();
        pending.sort();
        let mut running: Vec<(BuildId, String, String)> = self
            .running
            .iter()
            .map(|(id, r)| (id.clone(), r.builder.clone(), r.worker.clone()))
            .collect();
        running.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        let mut workers: Vec<forge_wire::WorkerStatus> = self
            .workers
            .iter()
            .map(|(name, w)| forge_wire::WorkerStatus {
                name: name.clone(),
                attached: w.attached,
                slots: w.slots,
                busy: w.busy,
            })
            .collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        forge_wire::StatusSnapshot { pending, running, workers }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
