//! Append-only task checkpoints with a latest pointer.
//!
//! Layout: one immutable `checkpoints/<id>.json` per checkpoint, plus
//! `checkpoints/latest.json` holding the id of the most recent one. Nothing
//! here expires or deletes old checkpoints; pruning is a manual operation
//! outside this subsystem.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::path::PathBuf;

use crate::error::Result;
use crate::error::StoreError;
use crate::lock::StateLock;
use crate::persistence::save_json;
use crate::state_dir::StateDir;
use toolgate_protocol::HookEventKind;
use toolgate_protocol::ToolInvocationEvent;
use toolgate_protocol::Verdict;

pub const LATEST_FILE: &str = "latest.json";

/// One immutable checkpoint record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// `cp-<epoch-millis>`; unique and monotonically orderable.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<String>,
    pub phase: Option<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub pending_steps: Vec<String>,
    /// Opaque task state, stored verbatim.
    #[serde(default)]
    pub state: serde_json::Value,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LatestPointer {
    latest: String,
}

/// Disk-backed checkpoint store.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(state: &StateDir) -> Self {
        Self {
            dir: state.checkpoints_dir(),
        }
    }

    /// Route one hook event: create, recover, or nothing to do.
    pub fn apply(&self, event: &ToolInvocationEvent, now: DateTime<Utc>) -> Result<Verdict> {
        match event.event {
            Some(HookEventKind::CreateCheckpoint) => {
                let checkpoint = self.create(
                    event.task_id.clone(),
                    event.phase.clone(),
                    event.completed_steps.clone(),
                    event.pending_steps.clone(),
                    event.state.clone(),
                    now,
                )?;
                Ok(Verdict::advisory(format!(
                    "CHECKPOINT: Created {} at phase \"{}\"",
                    checkpoint.id,
                    checkpoint.phase.as_deref().unwrap_or("")
                )))
            }
            Some(HookEventKind::RecoverFromCheckpoint) => match self.recover()? {
                Some(checkpoint) => Ok(render_recovery(&checkpoint)),
                None => Ok(Verdict::advisory(
                    "RECOVERY: No checkpoint found. Starting fresh.",
                )),
            },
            // Not a checkpoint activation; nothing to say.
            None => Ok(Verdict::allow()),
        }
    }

    /// Write a new immutable checkpoint and repoint `latest.json` at it.
    pub fn create(
        &self,
        task_id: Option<String>,
        phase: Option<String>,
        completed_steps: Vec<String>,
        pending_steps: Vec<String>,
        state: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        std::fs::create_dir_all(&self.dir)?;
        let _lock = StateLock::acquire(&self.dir.join(LATEST_FILE))?;

        let id = self.allocate_id(now);
        let checkpoint = Checkpoint {
            id,
            timestamp: now,
            task_id,
            phase,
            completed_steps,
            pending_steps,
            state,
            recoverable: true,
        };
        save_json(&self.dir.join(format!("{}.json", checkpoint.id)), &checkpoint)?;
        save_json(
            &self.dir.join(LATEST_FILE),
            &LatestPointer {
                latest: checkpoint.id.clone(),
            },
        )?;
        Ok(checkpoint)
    }

    /// Load the checkpoint referenced by the latest pointer.
    ///
    /// `Ok(None)` when no pointer exists or the referenced file is gone —
    /// both read as "no checkpoint found" to the caller.
    pub fn recover(&self) -> Result<Option<Checkpoint>> {
        let pointer_path = self.dir.join(LATEST_FILE);
        let raw = match std::fs::read_to_string(&pointer_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pointer: LatestPointer =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: pointer_path,
                source,
            })?;

        let checkpoint_path = self.dir.join(format!("{}.json", pointer.latest));
        let raw = match std::fs::read_to_string(&checkpoint_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "latest pointer references missing checkpoint {}",
                    pointer.latest
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let checkpoint = serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: checkpoint_path,
            source,
        })?;
        Ok(Some(checkpoint))
    }

    /// Millisecond ids collide under rapid successive creates; probe forward
    /// until a free slot is found so ids stay unique and ordered. Runs under
    /// the store lock.
    fn allocate_id(&self, now: DateTime<Utc>) -> String {
        let mut millis = now.timestamp_millis();
        loop {
            let id = format!("cp-{millis}");
            if !self.dir.join(format!("{id}.json")).exists() {
                return id;
            }
            millis += 1;
        }
    }
}

fn render_recovery(checkpoint: &Checkpoint) -> Verdict {
    let phase = checkpoint.phase.as_deref().unwrap_or("");
    let mut verdict = Verdict::advisory(format!(
        "RECOVERY: Restoring from checkpoint {}",
        checkpoint.id
    ));
    verdict.push(format!("RECOVERY: Phase: {phase}"));
    verdict.push(format!(
        "RECOVERY: Completed: {} steps",
        checkpoint.completed_steps.len()
    ));
    verdict.push(format!(
        "RECOVERY: Pending: {} steps",
        checkpoint.pending_steps.len()
    ));
    verdict.push(format!("CONTEXT_REMINDER: Resume from phase \"{phase}\""));
    if !checkpoint.pending_steps.is_empty() {
        let next: Vec<&str> = checkpoint
            .pending_steps
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        verdict.push(format!("CONTEXT_REMINDER: Next steps: {}", next.join(", ")));
    }
    verdict
}
