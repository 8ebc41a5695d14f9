// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! forge-engine: the build scheduling and execution kernel.
//!
//! The engine owns one scheduling domain: a queue of pending build
//! requests, a table of workers and their slots, and the set of running
//! builds. A single dispatcher task serializes match passes; each
//! claimed build runs as its own task that drives steps sequentially,
//! holding locks from the [`locks::LockManager`] and dispatching
//! commands through the [`registry::WorkerRegistry`].
//!
//! Everything mutable shared between components lives in one state
//! object behind one mutex ([`state::SchedState`]); compound
//! transitions (claim a request + reserve a worker slot + register the
//! build) are single critical sections, so no observer ever sees a
//! half-applied claim.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod build;
mod config;
mod dispatch;
mod engine;
mod error;
mod locks;
mod policy;
mod registry;
mod report;
mod state;
mod step;

pub use config::{BuilderConfig, ConfigError, EngineConfig, SelectionPolicy, WorkerConfig};
pub use engine::{Engine, Submission};
pub use error::EngineError;
pub use locks::{LockGuard, LockManager};
pub use policy::{FirstIdle, IdleWorker, LeastBusy, RoundRobin, WorkerPolicy};
pub use registry::{Connection, ConnectionLost};
pub use report::{ChannelReporter, NullReporter, ReportEvent, Reporter, TracingReporter};
pub use forge_wire::CancelOutcome;
