// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher: the serialized match pass.
//!
//! One task owns matching. Every event that can create work — a
//! submission, a worker attaching, a build finishing — lands here as a
//! signal; the pass walks builders in a stable order (best pending
//! priority first, ties to the oldest request, then name) and lets each
//! claim until nothing moves. Serializing the pass through one task
//! means no two claim transactions ever interleave.

use crate::build::run_build;
use crate::engine::Inner;
use crate::state::PreparedClaim;
use forge_core::Clock;
use forge_store::{Datastore, StoreError};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Reasons the dispatcher wakes up. All of them trigger the same pass;
/// the variants exist for the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Submitted,
    WorkerAttached,
    WorkerChanged,
    BuildFinished,
}

pub(crate) async fn run_dispatcher<C: Clock>(
    inner: Arc<Inner<C>>,
    mut rx: mpsc::UnboundedReceiver<Signal>,
) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            sig = rx.recv() => {
                let Some(sig) = sig else { break };
                // Coalesce queued wakeups into one pass.
                while rx.try_recv().is_ok() {}
                tracing::trace!(?sig, "match pass");
                match_pass(&inner).await;
            }
        }
    }
    tracing::debug!("dispatcher stopped");
}

/// Walk builders until a full pass claims nothing.
pub(crate) async fn match_pass<C: Clock>(inner: &Arc<Inner<C>>) {
    loop {
        let order = builder_order(inner);
        if order.is_empty() {
            return;
        }
        let mut progressed = false;
        for builder in &order {
            while try_claim_and_launch(inner, builder).await {
                progressed = true;
            }
        }
        if !progressed {
            return;
        }
    }
}

/// Builders with pending requests, ordered by (best pending priority
/// desc, oldest pending request, name).
fn builder_order<C: Clock>(inner: &Inner<C>) -> Vec<String> {
    let state = inner.state.lock();
    let mut order: Vec<(i32, u64, String)> = inner
        .cfg
        .builders
        .keys()
        .filter_map(|name| {
            state.best_pending(name).map(|(prio, at)| (-prio, at, name.clone()))
        })
        .collect();
    order.sort();
    order.into_iter().map(|(_, _, name)| name).collect()
}

/// One claim attempt for one builder: prepare in memory, persist the
/// claim, launch the controller. A store-level conflict rolls the
/// in-memory transition back; the requests another master claimed leave
/// our queue.
async fn try_claim_and_launch<C: Clock>(inner: &Arc<Inner<C>>, builder: &str) -> bool {
    let Some(cfg) = inner.cfg.builders.get(builder) else {
        return false;
    };

    let prepared: Option<PreparedClaim> = {
        let mut policies = inner.policies.lock();
        let Some(policy) = policies.get_mut(builder) else {
            return false;
        };
        let epoch_ms = inner.clock.epoch_ms();
        let mut state = inner.state.lock();
        state.try_claim(cfg, policy.as_mut(), &inner.cfg.master_name, epoch_ms)
    };
    let Some(prepared) = prepared else {
        return false;
    };

    let ids: Vec<_> = prepared.requests.iter().map(|r| r.id.clone()).collect();
    match inner.store.claim_requests(&ids, &prepared.claim).await {
        Ok(()) => {}
        Err(StoreError::ClaimConflict(conflicted)) => {
            tracing::warn!(builder, conflicts = conflicted.len(),
                "claim lost to a concurrent master, rolling back");
            let mut state = inner.state.lock();
            state.rollback_claim(prepared);
            for id in &conflicted {
                state.remove_pending(id);
            }
            return !conflicted.is_empty(); // queue shrank; let the pass retry
        }
        Err(e) => {
            tracing::error!(builder, error = %e, "claim persistence failed, rolling back");
            inner.state.lock().rollback_claim(prepared);
            return false;
        }
    }

    if let Err(e) = inner.store.create_build(&prepared.build).await {
        tracing::error!(builder, error = %e, "build persistence failed, unclaiming");
        if let Err(e) = inner.store.unclaim_requests(&ids).await {
            tracing::error!(builder, error = %e, "unclaim failed after build persistence failure");
        }
        inner.state.lock().rollback_claim(prepared);
        return false;
    }

    let token = inner
        .state
        .lock()
        .cancel_token(&prepared.build.id)
        .unwrap_or_default();
    tracing::debug!(builder, build = %prepared.build.id, worker = prepared.build.worker.as_str(),
        requests = ids.len(), "claim persisted, launching build");
    inner.tracker.spawn(run_build(inner.clone(), prepared.build, token));
    true
}

