// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSON-lines journal layered over [`MemStore`].
//!
//! Every mutation is appended as one line, then applied to the
//! in-memory state. Opening an existing journal replays it; a torn
//! final line (crash mid-append) is tolerated and truncated from the
//! replay, everything before it is kept.

use crate::datastore::{Datastore, StoreError};
use crate::mem::MemStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_core::{Build, BuildId, BuildRequest, Claim, RequestId, Results, StepRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One journaled mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    RequestCreated { req: BuildRequest },
    RequestsClaimed { ids: Vec<RequestId>, claim: Claim },
    RequestsUnclaimed { ids: Vec<RequestId> },
    RequestsCompleted { ids: Vec<RequestId>, results: Results },
    BuildCreated { build: Build },
    StepAppended { build_id: BuildId, index: usize, step: StepRecord },
    BuildFinalized { build: Build },
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    at: DateTime<Utc>,
    #[serde(flatten)]
    op: JournalOp,
}

/// Durable [`Datastore`] backed by a JSON-lines file.
pub struct JournalStore {
    mem: MemStore,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JournalStore {
    /// Open (or create) a journal and replay its contents.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mem = MemStore::new();
        if path.exists() {
            replay(&path, &mem)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { mem, writer: Mutex::new(BufWriter::new(file)), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, op: JournalOp) -> Result<(), StoreError> {
        let line = JournalLine { at: Utc::now(), op };
        let json = serde_json::to_string(&line)
            .map_err(|e| StoreError::Corrupt(format!("journal encode: {e}")))?;
        let mut writer = self.writer.lock();
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

fn replay(path: &Path, mem: &MemStore) -> Result<(), StoreError> {
    let reader = BufReader::new(File::open(path)?);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: JournalLine = match serde_json::from_str(&line) {
            Ok(p) => p,
            Err(e) => {
                // A torn final line is expected after a crash; anything
                // else is corruption worth failing on.
                tracing::warn!(line = lineno + 1, error = %e, "stopping journal replay");
                break;
            }
        };
        match parsed.op {
            JournalOp::RequestCreated { req } => mem.apply_create_request(req),
            JournalOp::RequestsClaimed { ids, claim } => mem.apply_claim(&ids, &claim),
            JournalOp::RequestsUnclaimed { ids } => mem.apply_unclaim(&ids),
            JournalOp::RequestsCompleted { ids, results } => mem.apply_complete(&ids, results),
            JournalOp::BuildCreated { build } | JournalOp::BuildFinalized { build } => {
                mem.apply_build(build)
            }
            JournalOp::StepAppended { build_id, index, step } => {
                mem.apply_step(&build_id, index, step)
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Datastore for JournalStore {
    async fn create_request(&self, req: &BuildRequest) -> Result<(), StoreError> {
        self.append(JournalOp::RequestCreated { req: req.clone() })?;
        self.mem.create_request(req).await
    }

    async fn claim_requests(&self, ids: &[RequestId], claim: &Claim) -> Result<(), StoreError> {
        // Validate against memory first so a conflicting claim never
        // reaches the journal.
        self.mem.claim_requests(ids, claim).await?;
        self.append(JournalOp::RequestsClaimed { ids: ids.to_vec(), claim: claim.clone() })
    }

    async fn unclaim_requests(&self, ids: &[RequestId]) -> Result<(), StoreError> {
        self.append(JournalOp::RequestsUnclaimed { ids: ids.to_vec() })?;
        self.mem.unclaim_requests(ids).await
    }

    async fn complete_requests(
        &self,
        ids: &[RequestId],
        results: Results,
    ) -> Result<(), StoreError> {
        self.append(JournalOp::RequestsCompleted { ids: ids.to_vec(), results })?;
        self.mem.complete_requests(ids, results).await
    }

    async fn create_build(&self, build: &Build) -> Result<(), StoreError> {
        self.append(JournalOp::BuildCreated { build: build.clone() })?;
        self.mem.create_build(build).await
    }

    async fn append_step(
        &self,
        build_id: &BuildId,
        index: usize,
        step: &StepRecord,
    ) -> Result<(), StoreError> {
        self.append(JournalOp::StepAppended {
            build_id: build_id.clone(),
            index,
            step: step.clone(),
        })?;
        self.mem.append_step(build_id, index, step).await
    }

    async fn finalize_build(&self, build: &Build) -> Result<(), StoreError> {
        self.append(JournalOp::BuildFinalized { build: build.clone() })?;
        self.mem.finalize_build(build).await
    }

    async fn get_request(&self, id: &RequestId) -> Result<Option<BuildRequest>, StoreError> {
        self.mem.get_request(id).await
    }

    async fn get_build(&self, id: &BuildId) -> Result<Option<Build>, StoreError> {
        self.mem.get_build(id).await
    }

    async fn pending_requests(&self) -> Result<Vec<BuildRequest>, StoreError> {
        self.mem.pending_requests().await
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
