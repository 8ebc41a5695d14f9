// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the Forge build master.
//!
//! Two message surfaces share one framing: the master↔worker protocol
//! (command dispatch and progress/log/completion traffic) and the
//! control protocol (submit/cancel/status from tooling above the
//! engine). Wire format: 4-byte length prefix (big-endian) + JSON
//! payload.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod control;
mod worker;

pub use codec::{
    decode, encode, read_frame, read_message, write_frame, write_message, ProtocolError,
    MAX_FRAME_LEN,
};
pub use control::{CancelOutcome, ControlRequest, ControlResponse, StatusSnapshot, WorkerStatus};
pub use worker::{Hello, MasterMessage, Welcome, WorkerMessage};
