// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock descriptors: named resource guards spanning builds.

use serde::{Deserialize, Serialize};

/// Admission mode of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// At most one holder.
    Exclusive,
    /// Up to `max` concurrent holders.
    Counting { max: u32 },
}

/// Scope of a lock's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One lock instance shared by every build on every worker.
    Global,
    /// An independent lock instance per worker: builds on different
    /// workers never contend.
    PerWorker,
}

/// Static configuration of one named lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSpec {
    pub name: String,
    pub mode: LockMode,
    #[serde(default = "default_scope")]
    pub scope: LockScope,
}

fn default_scope() -> LockScope {
    LockScope::Global
}

impl LockSpec {
    pub fn exclusive(name: impl Into<String>) -> Self {
        Self { name: name.into(), mode: LockMode::Exclusive, scope: LockScope::Global }
    }

    pub fn counting(name: impl Into<String>, max: u32) -> Self {
        Self { name: name.into(), mode: LockMode::Counting { max }, scope: LockScope::Global }
    }

    pub fn per_worker(mut self) -> Self {
        self.scope = LockScope::PerWorker;
        self
    }

    /// Resolve the concrete instance key for an acquisition by a build
    /// assigned to `worker`.
    pub fn key_for(&self, worker: &str) -> LockKey {
        match self.scope {
            LockScope::Global => LockKey { name: self.name.clone(), worker: None },
            LockScope::PerWorker => {
                LockKey { name: self.name.clone(), worker: Some(worker.to_string()) }
            }
        }
    }
}

/// Concrete lock instance key. Per-worker-scoped locks key on
/// (name, worker) so the same nominal lock is independent per worker.
///
/// `Ord` defines the fixed global acquisition order that keeps
/// concurrently starting builds from deadlocking against each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.worker {
            Some(w) => write!(f, "{}@{}", self.name, w),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
