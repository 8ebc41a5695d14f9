// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identity and capabilities reported at handshake.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a worker reports about itself when it connects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub name: String,
    /// Capability tags builders may require (e.g. "docker", "macos").
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl WorkerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), capabilities: BTreeSet::new(), version: None }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this worker offers every capability in `required`.
    pub fn satisfies<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> bool {
        required.into_iter().all(|c| self.capabilities.contains(c))
    }
}
