// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master↔worker protocol messages.
//!
//! The transport under these messages is ordered and reliable; the
//! engine treats out-of-order delivery as a transport bug, not
//! something to compensate for.

use forge_core::{CommandId, LogStream, Properties, WorkerInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// First message on a new worker connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    #[serde(flatten)]
    pub info: WorkerInfo,
}

/// Master's handshake reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    /// Name of the master instance that accepted the connection.
    pub master: String,
}

/// Messages the master sends to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterMessage {
    /// Start a remote command. `name` selects the command implementation
    /// on the worker; `args` is its argument map.
    RunCommand {
        command_id: CommandId,
        name: String,
        args: BTreeMap<String, Value>,
    },
    /// Ask the worker to stop a running command. The worker acknowledges
    /// by sending the command's final [`WorkerMessage::Done`].
    CancelCommand { command_id: CommandId },
    Ping,
}

/// Messages a worker sends to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Periodic liveness/progress note for a running command.
    Progress { command_id: CommandId },
    /// One line of command output. Lines arrive in the order the worker
    /// produced them.
    Log {
        command_id: CommandId,
        stream: LogStream,
        line: String,
    },
    /// Final message for a command. `exit_code` is `None` when the
    /// command never ran (dispatch fault on the worker side).
    Done {
        command_id: CommandId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        /// True when this completion is the acknowledgement of a
        /// cancel request rather than a natural finish.
        #[serde(default)]
        cancelled: bool,
        /// Properties the command contributes back to the build.
        #[serde(default, skip_serializing_if = "Properties::is_empty")]
        props: Properties,
    },
    Pong,
}

impl WorkerMessage {
    /// The command this message belongs to, if any.
    pub fn command_id(&self) -> Option<&CommandId> {
        match self {
            WorkerMessage::Progress { command_id }
            | WorkerMessage::Log { command_id, .. }
            | WorkerMessage::Done { command_id, .. } => Some(command_id),
            WorkerMessage::Pong => None,
        }
    }
}
