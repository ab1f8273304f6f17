use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ProcessId, ProcessRecord, Status, ToolCallId, WorkspaceId};

/// Input to `Registry::start`.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub workspace_id: WorkspaceId,
    /// Non-empty caller-supplied shell text.
    pub script: String,
    /// Must be absolute.
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub display_name: Option<String>,
    /// `nice` level applied to the spawned session leader, if any.
    pub niceness: Option<i32>,
    /// Whether the caller is starting this directly in the background, as
    /// opposed to a foreground run later handed off via
    /// `send_to_background`.
    pub run_in_background: bool,
    /// Present when this start is attributed to a foreground bash tool
    /// call, for later auto-background handoff (see §4.6).
    pub tool_call_id: Option<ToolCallId>,
}

impl StartRequest {
    /// Minimal constructor for the common case: a background script with no
    /// environment overrides or display name.
    pub fn new(workspace_id: WorkspaceId, script: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            workspace_id,
            script: script.into(),
            cwd,
            env: BTreeMap::new(),
            display_name: None,
            niceness: None,
            run_in_background: true,
            tool_call_id: None,
        }
    }
}

/// Read-only view of a `ProcessRecord`, safe to hand to callers across the
/// library boundary (no scratch paths, no raw env — those are engine
/// internals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub id: ProcessId,
    pub workspace_id: WorkspaceId,
    pub pid: u32,
    pub script: String,
    pub display_name: Option<String>,
    pub started_at: Option<i64>,
    pub status: Status,
    pub exit_code: Option<i32>,
    pub finished_at: Option<i64>,
    pub last_error: Option<String>,
}

impl From<&ProcessRecord> for ProcessSnapshot {
    fn from(record: &ProcessRecord) -> Self {
        Self {
            id: record.id.clone(),
            workspace_id: record.workspace_id.clone(),
            pid: record.pid,
            script: record.script.clone(),
            display_name: record.display_name.clone(),
            started_at: record.started_at,
            status: record.status,
            exit_code: record.exit_code,
            finished_at: record.finished_at,
            last_error: record.last_error.clone(),
        }
    }
}

/// Result of `get_output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSnapshot {
    pub status: Status,
    pub text: String,
    pub next_offset: u64,
    /// True when the requested `from_offset` had already fallen out of the
    /// retained window.
    pub truncated_start: bool,
    /// True once the buffer has ever dropped bytes from its head.
    pub buffer_truncated: bool,
}

/// Structured mutation events emitted by the `Registry`. For a given
/// process, these are emitted in causal order:
/// `Added -> (OutputAppended | StatusChanged | Terminating)* -> Removed`.
/// Across processes no ordering is guaranteed.
#[derive(Debug, Clone)]
pub enum Event {
    Added {
        id: ProcessId,
        workspace_id: WorkspaceId,
    },
    StatusChanged {
        id: ProcessId,
        workspace_id: WorkspaceId,
        status: Status,
    },
    OutputAppended {
        id: ProcessId,
        workspace_id: WorkspaceId,
    },
    Terminating {
        id: ProcessId,
        workspace_id: WorkspaceId,
    },
    Removed {
        id: ProcessId,
        workspace_id: WorkspaceId,
    },
}

impl Event {
    pub fn id(&self) -> &ProcessId {
        match self {
            Event::Added { id, .. }
            | Event::StatusChanged { id, .. }
            | Event::OutputAppended { id, .. }
            | Event::Terminating { id, .. }
            | Event::Removed { id, .. } => id,
        }
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        match self {
            Event::Added { workspace_id, .. }
            | Event::StatusChanged { workspace_id, .. }
            | Event::OutputAppended { workspace_id, .. }
            | Event::Terminating { workspace_id, .. }
            | Event::Removed { workspace_id, .. } => workspace_id,
        }
    }
}
