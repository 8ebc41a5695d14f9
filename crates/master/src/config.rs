// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master configuration: a TOML file describing workers, builders,
//! locks, and daemon plumbing, converted into the engine's
//! configuration with validation up front.

use forge_core::{LockMode, LockScope, LockSpec, StepSpec};
use forge_engine::{BuilderConfig, EngineConfig, SelectionPolicy, WorkerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("lock '{name}' has unknown mode '{mode}' (expected 'exclusive' or 'counting')")]
    UnknownLockMode { name: String, mode: String },
    #[error("lock '{name}' has unknown scope '{scope}' (expected 'global' or 'per_worker')")]
    UnknownLockScope { name: String, scope: String },
    #[error("counting lock '{0}' needs a 'count'")]
    MissingCount(String),
    #[error("no state directory configured and none could be derived")]
    NoStateDir,
    #[error(transparent)]
    Engine(#[from] forge_engine::ConfigError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    master: RawMaster,
    #[serde(default)]
    workers: Vec<WorkerConfig>,
    #[serde(default)]
    builders: Vec<RawBuilder>,
    #[serde(default)]
    locks: Vec<RawLock>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMaster {
    name: String,
    /// Address the worker listener binds, e.g. "0.0.0.0:9989".
    worker_listen: String,
    #[serde(default)]
    state_dir: Option<PathBuf>,
    #[serde(default)]
    control_socket: Option<PathBuf>,
    #[serde(default = "default_interrupt_timeout")]
    interrupt_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    shutdown_grace_secs: u64,
}

fn default_interrupt_timeout() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBuilder {
    name: String,
    workers: Vec<String>,
    #[serde(default)]
    policy: SelectionPolicy,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    locks: Vec<String>,
    #[serde(default)]
    steps: Vec<StepSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLock {
    name: String,
    mode: String,
    #[serde(default)]
    count: Option<u32>,
    #[serde(default)]
    scope: Option<String>,
}

impl RawLock {
    fn into_spec(self) -> Result<LockSpec, ConfigError> {
        let mode = match self.mode.as_str() {
            "exclusive" => LockMode::Exclusive,
            "counting" => LockMode::Counting {
                max: self.count.ok_or_else(|| ConfigError::MissingCount(self.name.clone()))?,
            },
            other => {
                return Err(ConfigError::UnknownLockMode {
                    name: self.name,
                    mode: other.to_string(),
                })
            }
        };
        let scope = match self.scope.as_deref() {
            None | Some("global") => LockScope::Global,
            Some("per_worker") => LockScope::PerWorker,
            Some(other) => {
                return Err(ConfigError::UnknownLockScope {
                    name: self.name,
                    scope: other.to_string(),
                })
            }
        };
        Ok(LockSpec { name: self.name, mode, scope })
    }
}

/// Fully resolved master configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub engine: EngineConfig,
    pub worker_listen: String,
    pub state_dir: PathBuf,
    pub control_socket: PathBuf,
    pub shutdown_grace: Duration,
}

impl MasterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

        let state_dir = match raw.master.state_dir {
            Some(dir) => dir,
            None => dirs::state_dir().map(|d| d.join("forge")).ok_or(ConfigError::NoStateDir)?,
        };
        let control_socket =
            raw.master.control_socket.unwrap_or_else(|| state_dir.join("control.sock"));

        let mut engine = EngineConfig::new(raw.master.name)
            .interrupt_timeout(Duration::from_secs(raw.master.interrupt_timeout_secs));
        for worker in raw.workers {
            engine = engine.worker(worker);
        }
        for lock in raw.locks {
            engine = engine.lock(lock.into_spec()?);
        }
        for builder in raw.builders {
            engine = engine.builder(BuilderConfig {
                name: builder.name,
                workers: builder.workers,
                policy: builder.policy,
                requires: builder.requires,
                locks: builder.locks,
                steps: builder.steps,
            });
        }
        engine.validate()?;

        Ok(Self {
            engine,
            worker_listen: raw.master.worker_listen,
            state_dir,
            control_socket,
            shutdown_grace: Duration::from_secs(raw.master.shutdown_grace_secs),
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.state_dir.join("journal").join("forge.journal")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("forged.pid")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
