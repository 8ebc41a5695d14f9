// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build controller: one task per build.
//!
//! Acquires the builder's locks in the fixed global order, drives steps
//! strictly sequentially, aggregates results, and finalizes through the
//! store. Every exit path releases the locks, the worker slot, and the
//! claimed requests — including interruption, disconnect, and lock
//! configuration failures.

use crate::engine::Inner;
use crate::locks::LockGuard;
use crate::step::run_step;
use forge_core::{Build, BuildId, Clock, LockKey, Results};
use forge_store::Datastore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Acquire a set of named locks in the fixed global order, dropping
/// duplicates. Returns `Ok(None)` if the build was interrupted while
/// waiting; an abandoned queue slot is reclaimed by the lock manager.
async fn acquire_ordered<C: Clock>(
    inner: &Inner<C>,
    worker: &str,
    claimant: &BuildId,
    names: &[String],
    token: &CancellationToken,
) -> Result<Option<Vec<LockGuard>>, crate::EngineError> {
    let mut keyed: Vec<(LockKey, &String)> = Vec::with_capacity(names.len());
    for name in names {
        keyed.push((inner.locks.key_for(name, worker)?, name));
    }
    keyed.sort();
    keyed.dedup_by(|a, b| a.0 == b.0);

    let mut guards = Vec::with_capacity(keyed.len());
    for (key, name) in keyed {
        tracing::debug!(claimant = %claimant, lock = %key, "acquiring lock");
        tokio::select! {
            res = inner.locks.acquire(name, worker, claimant) => guards.push(res?),
            _ = token.cancelled() => return Ok(None),
        }
    }
    Ok(Some(guards))
}

/// Drive one claimed build to a terminal state.
pub(crate) async fn run_build<C: Clock>(
    inner: Arc<Inner<C>>,
    mut build: Build,
    token: CancellationToken,
) {
    let build_id = build.id.clone();
    let Some(bcfg) = inner.cfg.builders.get(&build.builder) else {
        // Claims are only prepared for configured builders.
        tracing::error!(build = %build_id, builder = build.builder.as_str(),
            "no configuration for claimed build");
        finish(&inner, &mut build, Results::Exception).await;
        return;
    };

    inner.reporter.build_started(&build);
    tracing::info!(build = %build_id, builder = bcfg.name.as_str(),
        worker = build.worker.as_str(), requests = build.requests.len(), "build starting");

    let mut cancelled = false; // interrupt or worker loss: later steps never start
    let mut interrupted = false; // user interrupt specifically
    let mut halted = false; // halting failure: later non-informational steps skip
    let mut config_failed = false;

    // Builder-level locks are held for the whole build.
    let mut build_guards: Vec<LockGuard> = Vec::new();
    match acquire_ordered(&inner, &build.worker, &build_id, &bcfg.locks, &token).await {
        Ok(Some(guards)) => build_guards = guards,
        Ok(None) => {
            cancelled = true;
            interrupted = true;
        }
        Err(e) => {
            tracing::error!(build = %build_id, error = %e, "lock acquisition failed");
            config_failed = true;
        }
    }

    for idx in 0..bcfg.steps.len() {
        let spec = &bcfg.steps[idx];
        // An interrupt that raced a step's normal completion still stops
        // the sequence here, before the next step starts.
        if token.is_cancelled() && !cancelled {
            cancelled = true;
            interrupted = true;
        }
        if cancelled || config_failed {
            build.steps[idx].finalize(Results::Cancelled, inner.clock.epoch_ms());
        } else if halted && !spec.informational {
            build.steps[idx].finalize(Results::Skipped, inner.clock.epoch_ms());
        } else {
            // Step-level locks are acquired lazily, just before the
            // step, and released as soon as it completes.
            let step_guards =
                match acquire_ordered(&inner, &build.worker, &build_id, &spec.locks, &token).await
                {
                    Ok(Some(guards)) => guards,
                    Ok(None) => {
                        cancelled = true;
                        interrupted = true;
                        build.steps[idx].finalize(Results::Cancelled, inner.clock.epoch_ms());
                        persist_step(&inner, &build, idx).await;
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(build = %build_id, step = spec.name.as_str(), error = %e,
                            "lock acquisition failed");
                        config_failed = true;
                        build.steps[idx].finalize(Results::Exception, inner.clock.epoch_ms());
                        persist_step(&inner, &build, idx).await;
                        continue;
                    }
                };

            let outcome = run_step(&inner, &mut build, idx, spec, &token).await;
            drop(step_guards);

            if outcome.worker_lost {
                cancelled = true;
            }
            if outcome.interrupted {
                cancelled = true;
                interrupted = true;
            }
            if spec.halt_on_failure && outcome.results.is_failure_or_worse() {
                halted = true;
            }
        }
        persist_step(&inner, &build, idx).await;
    }

    let aggregate = build.aggregate(&bcfg.steps);
    let overall = if config_failed {
        aggregate.worst(Results::Exception)
    } else if interrupted {
        aggregate.worst(Results::Cancelled)
    } else {
        aggregate
    };

    // Locks release after the store acknowledges the terminal state, so
    // a crash-restart never finds a lock-protected resource in use by a
    // build the store still thinks is running.
    finish(&inner, &mut build, overall).await;
    drop(build_guards);
}

async fn persist_step<C: Clock>(inner: &Inner<C>, build: &Build, idx: usize) {
    if let Err(e) = inner.store.append_step(&build.id, idx, &build.steps[idx]).await {
        tracing::error!(build = %build.id, step = idx, error = %e, "failed to record step");
    }
}

/// Finalize the build in the store, release its slot and requests, and
/// notify the reporter. Runs on every exit path.
async fn finish<C: Clock>(inner: &Inner<C>, build: &mut Build, overall: Results) {
    let build_id = build.id.clone();
    build.finalize(overall, inner.clock.epoch_ms());

    if let Err(e) = inner.store.finalize_build(build).await {
        tracing::error!(build = %build_id, error = %e, "failed to record build result");
    }
    if let Err(e) = inner.store.complete_requests(&build.requests, overall).await {
        tracing::error!(build = %build_id, error = %e, "failed to complete requests");
    }

    {
        let mut state = inner.state.lock();
        state.release_build(&build_id);
    }

    inner.reporter.build_finished(build, overall);
    tracing::info!(build = %build_id, %overall, "build finished");
    inner.signal(crate::dispatch::Signal::BuildFinished);
}

