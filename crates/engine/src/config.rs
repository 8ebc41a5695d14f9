// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static engine configuration: workers, builders, locks, timeouts.

use forge_core::{LockMode, LockSpec, StepSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Worker-selection strategy for a builder. The seam itself is the
/// [`WorkerPolicy`](crate::policy::WorkerPolicy) trait; these are the
/// shipped strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// First idle worker in configured order.
    #[default]
    FirstIdle,
    /// Rotate through the eligible set across claims.
    RoundRobin,
    /// Worker with the most free slots.
    LeastBusy,
}

/// One configured worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    /// Concurrent build slots. Default 1.
    #[serde(default = "default_slots")]
    pub slots: u32,
}

fn default_slots() -> u32 {
    1
}

/// One configured builder: what to build and which workers may run it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub name: String,
    /// Eligible workers; the order here is the preference order for
    /// the first-idle policy.
    pub workers: Vec<String>,
    #[serde(default)]
    pub policy: SelectionPolicy,
    /// Capability tags a worker must have reported to be eligible.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Locks held for the whole build.
    #[serde(default)]
    pub locks: Vec<String>,
    pub steps: Vec<StepSpec>,
}

/// Full engine configuration for one scheduling domain.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name this master uses when claiming requests.
    pub master_name: String,
    /// Bound on the wait for a worker to acknowledge a cancel request.
    pub interrupt_timeout: Duration,
    pub workers: IndexMap<String, WorkerConfig>,
    pub builders: IndexMap<String, BuilderConfig>,
    pub locks: HashMap<String, LockSpec>,
}

impl EngineConfig {
    pub fn new(master_name: impl Into<String>) -> Self {
        Self {
            master_name: master_name.into(),
            interrupt_timeout: Duration::from_secs(10),
            workers: IndexMap::new(),
            builders: IndexMap::new(),
            locks: HashMap::new(),
        }
    }

    pub fn worker(mut self, worker: WorkerConfig) -> Self {
        self.workers.insert(worker.name.clone(), worker);
        self
    }

    pub fn builder(mut self, builder: BuilderConfig) -> Self {
        self.builders.insert(builder.name.clone(), builder);
        self
    }

    pub fn lock(mut self, spec: LockSpec) -> Self {
        self.locks.insert(spec.name.clone(), spec);
        self
    }

    pub fn interrupt_timeout(mut self, timeout: Duration) -> Self {
        self.interrupt_timeout = timeout;
        self
    }

    /// Validate cross-references before the engine starts. Running with
    /// a builder that points at a worker or lock that does not exist
    /// would only surface mid-claim, so it is rejected up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for builder in self.builders.values() {
            if builder.workers.is_empty() {
                return Err(ConfigError::NoWorkers(builder.name.clone()));
            }
            if builder.steps.is_empty() {
                return Err(ConfigError::NoSteps(builder.name.clone()));
            }
            for worker in &builder.workers {
                if !self.workers.contains_key(worker) {
                    return Err(ConfigError::UnknownWorker {
                        builder: builder.name.clone(),
                        worker: worker.clone(),
                    });
                }
            }
            let lock_refs = builder
                .locks
                .iter()
                .chain(builder.steps.iter().flat_map(|s| s.locks.iter()));
            for lock in lock_refs {
                if !self.locks.contains_key(lock) {
                    return Err(ConfigError::UnknownLock {
                        builder: builder.name.clone(),
                        lock: lock.clone(),
                    });
                }
            }
        }
        for worker in self.workers.values() {
            if worker.slots == 0 {
                return Err(ConfigError::ZeroSlots(worker.name.clone()));
            }
        }
        for lock in self.locks.values() {
            if let LockMode::Counting { max: 0 } = lock.mode {
                return Err(ConfigError::ZeroCount(lock.name.clone()));
            }
        }
        Ok(())
    }
}

/// Configuration rejected at engine construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("builder '{0}' has no eligible workers")]
    NoWorkers(String),
    #[error("builder '{0}' has no steps")]
    NoSteps(String),
    #[error("builder '{builder}' references unknown worker '{worker}'")]
    UnknownWorker { builder: String, worker: String },
    #[error("builder '{builder}' references unknown lock '{lock}'")]
    UnknownLock { builder: String, lock: String },
    #[error("worker '{0}' is configured with zero slots")]
    ZeroSlots(String),
    #[error("counting lock '{0}' is configured with zero capacity")]
    ZeroCount(String),
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
