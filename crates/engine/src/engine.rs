// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine facade: wiring, entry points, lifecycle.

use crate::config::{ConfigError, EngineConfig};
use crate::dispatch::{run_dispatcher, Signal};
use crate::error::EngineError;
use crate::locks::LockManager;
use crate::policy::WorkerPolicy;
use crate::registry::{Connection, WorkerRegistry};
use crate::report::Reporter;
use crate::state::SchedState;
use forge_core::{
    BuildRequest, Clock, Properties, RequestId, Results, SourceRev, SystemClock, WorkerInfo,
};
use forge_store::Datastore;
use forge_wire::{CancelOutcome, StatusSnapshot, WorkerMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A build request as submitted by the trigger interface.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub builder: String,
    pub props: Properties,
    pub revisions: Vec<SourceRev>,
    pub priority: i32,
    pub dedup_key: Option<String>,
}

impl Submission {
    pub fn to(builder: impl Into<String>) -> Self {
        Self { builder: builder.into(), ..Default::default() }
    }

    forge_core::setters! {
        set {
            props: Properties,
            revisions: Vec<SourceRev>,
            priority: i32,
        }
        option {
            dedup_key: String,
        }
    }
}

pub(crate) struct Inner<C: Clock> {
    pub cfg: EngineConfig,
    pub state: Mutex<SchedState>,
    /// Per-builder worker-selection policy instances. Locked only
    /// inside the claim transaction.
    pub policies: Mutex<HashMap<String, Box<dyn WorkerPolicy>>>,
    pub locks: LockManager,
    pub registry: WorkerRegistry,
    pub store: Arc<dyn Datastore>,
    pub reporter: Arc<dyn Reporter>,
    pub clock: C,
    pub signal_tx: mpsc::UnboundedSender<Signal>,
    pub tracker: TaskTracker,
    pub shutdown: CancellationToken,
}

impl<C: Clock> Inner<C> {
    pub(crate) fn signal(&self, sig: Signal) {
        let _ = self.signal_tx.send(sig);
    }

    /// Treat a worker's connection as dead: drop it, fail its in-flight
    /// commands, mark it detached. Used on disconnect, on connection
    /// replacement, and when a cancel acknowledgement times out.
    pub(crate) fn sever_worker(&self, name: &str, reason: &str) {
        let had_conn = self.registry.detach(name).is_some();
        let failed = self.registry.fail_inflight(name);
        self.state.lock().worker_detached(name);
        if had_conn || failed > 0 {
            tracing::warn!(worker = name, reason, failed, "worker connection severed");
        }
    }
}

/// One scheduling domain: submit requests, attach workers, and the
/// engine matches, runs, and records builds.
///
/// Cheap to clone. Construction spawns the dispatcher task, so it must
/// happen inside a tokio runtime.
pub struct Engine<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<C: Clock> Engine<C> {
    pub fn new(
        cfg: EngineConfig,
        store: Arc<dyn Datastore>,
        reporter: Arc<dyn Reporter>,
        clock: C,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let state = SchedState::new(cfg.workers.values().map(|w| (w.name.clone(), w.slots)));
        let policies = cfg
            .builders
            .values()
            .map(|b| (b.name.clone(), b.policy.instantiate()))
            .collect::<HashMap<_, _>>();
        let locks = LockManager::new(cfg.locks.clone());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            cfg,
            state: Mutex::new(state),
            policies: Mutex::new(policies),
            locks,
            registry: WorkerRegistry::new(),
            store,
            reporter,
            clock,
            signal_tx,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_dispatcher(inner.clone(), signal_rx));
        Ok(Self { inner })
    }

    /// The trigger interface: store a request and wake the dispatcher.
    ///
    /// The request is durable before this returns; submission blocks
    /// (retrying) while the store is unavailable rather than holding
    /// the request only in memory.
    pub async fn submit(&self, sub: Submission) -> Result<RequestId, EngineError> {
        if !self.inner.cfg.builders.contains_key(&sub.builder) {
            return Err(EngineError::UnknownBuilder(sub.builder));
        }

        let req = BuildRequest {
            id: RequestId::new(),
            builder: sub.builder,
            props: sub.props,
            revisions: sub.revisions,
            priority: sub.priority,
            submitted_at_ms: self.inner.clock.epoch_ms(),
            dedup_key: sub.dedup_key,
            claim: None,
        };

        // Reserve the idempotency key before touching the store so two
        // concurrent submissions of the same key cannot both pass.
        if let Some(key) = &req.dedup_key {
            if let Err(existing) = self.inner.state.lock().reserve_dedup_key(key, &req.id) {
                return Err(EngineError::DuplicateRequest { key: key.clone(), existing });
            }
        }

        if let Err(e) = self.inner.store.create_request(&req).await {
            if let Some(key) = &req.dedup_key {
                self.inner.state.lock().drop_dedup_key(key);
            }
            return Err(e.into());
        }

        let id = req.id.clone();
        self.inner.state.lock().enqueue(req);
        self.inner.signal(Signal::Submitted);
        Ok(id)
    }

    /// Cancel a request: removed outright if unclaimed, otherwise the
    /// build satisfying it is asked to interrupt.
    pub async fn cancel(&self, id: &RequestId) -> Result<CancelOutcome, EngineError> {
        let removed = self.inner.state.lock().remove_pending(id);
        if removed.is_some() {
            self.inner
                .store
                .complete_requests(std::slice::from_ref(id), Results::Cancelled)
                .await?;
            tracing::info!(request = %id, "cancelled pending request");
            return Ok(CancelOutcome::Removed);
        }

        let token = {
            let state = self.inner.state.lock();
            state.build_for_request(id).and_then(|b| state.cancel_token(b))
        };
        match token {
            Some(token) => {
                token.cancel();
                tracing::info!(request = %id, "interrupting claimed request");
                Ok(CancelOutcome::Interrupting)
            }
            None => Err(EngineError::UnknownRequest(id.clone())),
        }
    }

    /// Accept a worker connection after its handshake. A previous live
    /// connection for the same worker is treated as lost first — its
    /// in-flight steps fail — so at most one connection is live per
    /// worker.
    pub fn worker_attached(
        &self,
        info: WorkerInfo,
        conn: Arc<dyn Connection>,
    ) -> Result<(), EngineError> {
        if !self.inner.state.lock().worker_known(&info.name) {
            return Err(EngineError::UnknownWorker(info.name));
        }
        let name = info.name.clone();
        if self.inner.registry.is_attached(&name) {
            self.inner.sever_worker(&name, "replaced by new connection");
        }
        self.inner.registry.attach(&name, conn);
        self.inner.state.lock().worker_attached(info);
        tracing::info!(worker = name.as_str(), "worker attached");
        self.inner.signal(Signal::WorkerAttached);
        Ok(())
    }

    /// Transport-level disconnect notification.
    pub fn worker_detached(&self, name: &str) {
        self.inner.sever_worker(name, "disconnected");
        self.inner.signal(Signal::WorkerChanged);
    }

    /// Disconnect notification from a specific connection's reader
    /// loop. A no-op when that connection has already been replaced —
    /// the stale loop must not tear down its replacement.
    pub fn worker_connection_lost(&self, name: &str, conn: &Arc<dyn Connection>) {
        if !self.inner.registry.detach_if(name, conn) {
            return;
        }
        let failed = self.inner.registry.fail_inflight(name);
        self.inner.state.lock().worker_detached(name);
        tracing::warn!(worker = name, failed, "worker disconnected");
        self.inner.signal(Signal::WorkerChanged);
    }

    /// Inbound message from a worker's connection. Routed to the step
    /// driving the referenced command; unknown or stale references are
    /// dropped.
    pub fn handle_worker_message(&self, worker: &str, msg: WorkerMessage) {
        self.inner.registry.deliver(worker, msg);
    }

    /// Re-enqueue unclaimed requests from the store (startup recovery).
    /// Returns how many requests went back into the queue.
    pub async fn restore_pending(&self) -> Result<usize, EngineError> {
        let pending = self.inner.store.pending_requests().await?;
        let mut restored = 0;
        {
            let mut state = self.inner.state.lock();
            for req in pending {
                if !self.inner.cfg.builders.contains_key(&req.builder) {
                    tracing::warn!(request = %req.id, builder = req.builder.as_str(),
                        "dropping stored request for unconfigured builder");
                    continue;
                }
                if let Some(key) = &req.dedup_key {
                    let _ = state.reserve_dedup_key(key, &req.id);
                }
                state.enqueue(req);
                restored += 1;
            }
        }
        self.inner.signal(Signal::Submitted);
        Ok(restored)
    }

    pub fn master_name(&self) -> &str {
        &self.inner.cfg.master_name
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.state.lock().snapshot()
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running_count()
    }

    /// Graceful shutdown: stop claiming, give running builds `grace` to
    /// finish, then interrupt whatever remains and wait for it.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!(grace_secs = grace.as_secs(), "engine shutting down");
        self.inner.state.lock().draining = true;
        self.inner.tracker.close();
        if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_err() {
            let tokens = self.inner.state.lock().running_tokens();
            tracing::warn!(interrupted = tokens.len(), "interrupting builds at shutdown deadline");
            for token in tokens {
                token.cancel();
            }
            self.inner.tracker.wait().await;
        }
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
