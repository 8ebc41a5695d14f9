// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock manager: exclusive and counting locks spanning builds.
//!
//! Acquisition suspends the caller (no busy wait) and queues FIFO per
//! lock; release hands the lock to the next waiter atomically. No
//! timeout is imposed here — a build stuck on a lock is resolved by
//! interrupting the build. Builds acquire multi-lock sets in the fixed
//! global order defined by [`LockKey`]'s `Ord`, which is what keeps
//! concurrently starting builds from deadlocking against each other.

use crate::error::EngineError;
use forge_core::{BuildId, LockKey, LockMode, LockSpec};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

struct LockWaiter {
    claimant: BuildId,
    grant: oneshot::Sender<LockGuard>,
}

struct LockState {
    mode: LockMode,
    holders: Vec<BuildId>,
    waiters: VecDeque<LockWaiter>,
}

impl LockState {
    fn new(mode: LockMode) -> Self {
        Self { mode, holders: Vec::new(), waiters: VecDeque::new() }
    }

    fn has_capacity(&self) -> bool {
        match self.mode {
            LockMode::Exclusive => self.holders.is_empty(),
            LockMode::Counting { max } => (self.holders.len() as u32) < max,
        }
    }
}

struct LockInner {
    specs: HashMap<String, LockSpec>,
    table: Mutex<HashMap<LockKey, LockState>>,
}

/// Arbitrates access to the named locks of one scheduling domain.
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<LockInner>,
}

impl LockManager {
    pub fn new(specs: HashMap<String, LockSpec>) -> Self {
        Self { inner: Arc::new(LockInner { specs, table: Mutex::new(HashMap::new()) }) }
    }

    /// Acquire a lock by configured name, on behalf of a build assigned
    /// to `worker` (used to resolve per-worker scope). Suspends until
    /// granted. Fails only on malformed configuration (unknown name).
    ///
    /// Dropping the returned future while it waits abandons the queue
    /// slot; a grant that raced with the drop is released again by the
    /// guard's drop, so no capacity leaks.
    pub async fn acquire(
        &self,
        name: &str,
        worker: &str,
        claimant: &BuildId,
    ) -> Result<LockGuard, EngineError> {
        let spec = self
            .inner
            .specs
            .get(name)
            .ok_or_else(|| EngineError::LockConfig(format!("unknown lock '{name}'")))?;
        let key = spec.key_for(worker);

        let rx = {
            let mut table = self.inner.table.lock();
            let state = table.entry(key.clone()).or_insert_with(|| LockState::new(spec.mode));
            // Grant immediately only when nobody is queued ahead.
            if state.has_capacity() && state.waiters.is_empty() {
                state.holders.push(claimant.clone());
                return Ok(LockGuard {
                    manager: self.clone(),
                    key,
                    claimant: claimant.clone(),
                    released: false,
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(LockWaiter { claimant: claimant.clone(), grant: tx });
            tracing::debug!(lock = %key, claimant = %claimant, "queued for lock");
            rx
        };

        rx.await.map_err(|_| {
            EngineError::LockConfig(format!("lock manager dropped while waiting on '{name}'"))
        })
    }

    /// Resolve the instance key for a named lock (for ordering lock
    /// sets before acquisition).
    pub fn key_for(&self, name: &str, worker: &str) -> Result<LockKey, EngineError> {
        self.inner
            .specs
            .get(name)
            .map(|s| s.key_for(worker))
            .ok_or_else(|| EngineError::LockConfig(format!("unknown lock '{name}'")))
    }

    fn release(&self, key: &LockKey, claimant: &BuildId) {
        let mut table = self.inner.table.lock();
        let Some(state) = table.get_mut(key) else {
            return;
        };
        if let Some(pos) = state.holders.iter().position(|h| h == claimant) {
            state.holders.remove(pos);
        }

        // Hand capacity to queued waiters in FIFO order. A waiter whose
        // receiver is gone (abandoned acquisition) is skipped; the
        // defused guard it would have received must not re-release.
        while state.has_capacity() {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.holders.push(waiter.claimant.clone());
            let guard = LockGuard {
                manager: self.clone(),
                key: key.clone(),
                claimant: waiter.claimant.clone(),
                released: false,
            };
            if let Err(mut unclaimed) = waiter.grant.send(guard) {
                unclaimed.released = true;
                if let Some(pos) = state.holders.iter().position(|h| h == &waiter.claimant) {
                    state.holders.remove(pos);
                }
            }
        }

        if state.holders.is_empty() && state.waiters.is_empty() {
            table.remove(key);
        }
    }

    /// Current holder count, for observability and tests.
    pub fn holder_count(&self, key: &LockKey) -> usize {
        self.inner.table.lock().get(key).map(|s| s.holders.len()).unwrap_or(0)
    }

    /// Current waiter count, for observability and tests.
    pub fn waiter_count(&self, key: &LockKey) -> usize {
        self.inner.table.lock().get(key).map(|s| s.waiters.len()).unwrap_or(0)
    }
}

/// Held lock. Releasing grants the next waiter; dropping releases, so
/// every exit path out of a build pairs acquisition with release.
pub struct LockGuard {
    manager: LockManager,
    key: LockKey,
    claimant: BuildId,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("claimant", &self.claimant)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(&self.key, &self.claimant);
        }
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
