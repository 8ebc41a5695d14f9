// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.

use forge_core::RequestId;
use forge_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the engine's public operations.
///
/// Worker-side command failures are not errors — they flow through the
/// step state machine as ordinary results. Store-level claim conflicts
/// are handled inside the dispatcher (the losing claim is rolled back
/// and the pass retried) and never reach a caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Dispatch to a worker with no live connection. The affected step
    /// fails immediately; the engine does not retry on its own.
    #[error("worker '{0}' is not connected")]
    NotConnected(String),

    /// A submission reused an idempotency key that is still pending.
    /// Carries the surviving request so the caller can track it.
    #[error("duplicate request: key '{key}' is already pending as {existing}")]
    DuplicateRequest { key: String, existing: RequestId },

    /// Malformed lock usage (unknown lock name). Fatal to the build
    /// that referenced it, not to the engine.
    #[error("lock configuration error: {0}")]
    LockConfig(String),

    #[error("unknown builder '{0}'")]
    UnknownBuilder(String),

    #[error("unknown worker '{0}'")]
    UnknownWorker(String),

    #[error("unknown request '{0}'")]
    UnknownRequest(RequestId),

    /// The store rejected an operation with a non-retryable error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
