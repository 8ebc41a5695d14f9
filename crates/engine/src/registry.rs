// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker registry: connection lifecycle and command routing.
//!
//! The registry is the single owner of live connections. Builds and
//! steps refer to workers by name; at most one live connection exists
//! per worker, and a second connection for the same name severs the
//! first (failing its in-flight commands) before being accepted.

use crate::error::EngineError;
use forge_core::{CommandId, LogLine, Properties};
use forge_wire::{MasterMessage, WorkerMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Outbound half of a worker connection. The inbound half is whatever
/// transport feeds [`Engine::handle_worker_message`]; tests use an
/// in-memory implementation, the daemon wraps a TCP writer task.
///
/// [`Engine::handle_worker_message`]: crate::Engine::handle_worker_message
pub trait Connection: Send + Sync {
    fn send(&self, msg: MasterMessage) -> Result<(), ConnectionLost>;
}

/// The connection is gone; the send did not happen.
#[derive(Debug, Error)]
#[error("connection lost: {0}")]
pub struct ConnectionLost(pub String);

/// Event delivered to the step runner driving one in-flight command.
#[derive(Debug)]
pub(crate) enum StepEvent {
    Progress,
    Log(LogLine),
    Done { exit_code: Option<i32>, cancelled: bool, props: Properties },
    /// The worker's connection was lost (or replaced) while the
    /// command was in flight.
    WorkerLost,
}

struct Inflight {
    worker: String,
    tx: mpsc::UnboundedSender<StepEvent>,
}

/// Connection table plus the routing table for in-flight commands.
#[derive(Default)]
pub(crate) struct WorkerRegistry {
    conns: Mutex<HashMap<String, Arc<dyn Connection>>>,
    inflight: Mutex<HashMap<CommandId, Inflight>>,
}

impl WorkerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install a connection, returning the one it replaced (if any).
    /// The caller severs the old connection's in-flight work first.
    pub(crate) fn attach(
        &self,
        worker: &str,
        conn: Arc<dyn Connection>,
    ) -> Option<Arc<dyn Connection>> {
        self.conns.lock().insert(worker.to_string(), conn)
    }

    pub(crate) fn detach(&self, worker: &str) -> Option<Arc<dyn Connection>> {
        self.conns.lock().remove(worker)
    }

    /// Detach only if `conn` is still the live connection. A reader
    /// loop that lost a race with a replacement connection must not
    /// tear the replacement down.
    pub(crate) fn detach_if(&self, worker: &str, conn: &Arc<dyn Connection>) -> bool {
        let mut conns = self.conns.lock();
        match conns.get(worker) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                conns.remove(worker);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_attached(&self, worker: &str) -> bool {
        self.conns.lock().contains_key(worker)
    }

    /// Forward a message to the worker's live connection. A missing or
    /// broken connection is the same thing to callers: the worker is
    /// not connected.
    pub(crate) fn dispatch(&self, worker: &str, msg: MasterMessage) -> Result<(), EngineError> {
        let conn = {
            let conns = self.conns.lock();
            conns.get(worker).cloned()
        };
        match conn {
            Some(conn) => conn.send(msg).map_err(|e| {
                tracing::debug!(worker, error = %e, "send on dead connection");
                EngineError::NotConnected(worker.to_string())
            }),
            None => Err(EngineError::NotConnected(worker.to_string())),
        }
    }

    /// Open the event channel for a command about to be dispatched.
    pub(crate) fn open_channel(
        &self,
        command_id: CommandId,
        worker: &str,
    ) -> mpsc::UnboundedReceiver<StepEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inflight
            .lock()
            .insert(command_id, Inflight { worker: worker.to_string(), tx });
        rx
    }

    pub(crate) fn close_channel(&self, command_id: &CommandId) {
        self.inflight.lock().remove(command_id);
    }

    /// Route an inbound worker message to the step driving its command.
    /// Messages for unknown commands (late output after a forced
    /// completion) or from the wrong worker are dropped.
    pub(crate) fn deliver(&self, worker: &str, msg: WorkerMessage) {
        let Some(command_id) = msg.command_id().cloned() else {
            return;
        };
        let inflight = self.inflight.lock();
        let Some(entry) = inflight.get(&command_id) else {
            tracing::debug!(worker, command = %command_id, "dropping message for unknown command");
            return;
        };
        if entry.worker != worker {
            tracing::warn!(
                worker,
                owner = entry.worker.as_str(),
                command = %command_id,
                "dropping message from wrong worker"
            );
            return;
        }
        let event = match msg {
            WorkerMessage::Progress { .. } => StepEvent::Progress,
            WorkerMessage::Log { stream, line, .. } => StepEvent::Log(LogLine { stream, line }),
            WorkerMessage::Done { exit_code, cancelled, props, .. } => {
                StepEvent::Done { exit_code, cancelled, props }
            }
            WorkerMessage::Pong => return,
        };
        // Receiver gone means the step already completed; ignore.
        let _ = entry.tx.send(event);
    }

    /// Fail every in-flight command assigned to a worker. Used on
    /// disconnect and on connection replacement.
    pub(crate) fn fail_inflight(&self, worker: &str) -> usize {
        let mut inflight = self.inflight.lock();
        let ids: Vec<CommandId> = inflight
            .iter()
            .filter(|(_, entry)| entry.worker == worker)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(entry) = inflight.remove(id) {
                let _ = entry.tx.send(StepEvent::WorkerLost);
            }
        }
        ids.len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
