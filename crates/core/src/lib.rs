// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! forge-core: data model for the Forge build master.
//!
//! Plain types only — identifiers, result severities, build requests,
//! builds, steps, locks, and the clock abstraction. No async, no I/O.

pub mod macros;

pub mod build;
pub mod clock;
pub mod id;
pub mod lock;
pub mod props;
pub mod request;
pub mod results;
pub mod step;
pub mod worker;

pub use build::{Build, BuildId};
pub use clock::{Clock, FakeClock, SystemClock};
pub use id::short;
pub use lock::{LockKey, LockMode, LockScope, LockSpec};
pub use props::Properties;
pub use request::{BuildRequest, Claim, RequestId, SourceRev};
pub use results::Results;
#[cfg(any(test, feature = "test-support"))]
pub use step::StepSpecBuilder;
pub use step::{
    remote_command, CommandId, LogLine, LogStream, StepBehaviorSpec, StepRecord, StepSpec,
    StepState,
};
pub use worker::WorkerInfo;
