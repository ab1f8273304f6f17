use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{ProcessId, Status, WorkspaceId};

/// Persistent state of one background process. Owned exclusively by the
/// `Registry`; the controller holds only an id-indexed handle while its
/// loops run (see `bpe-engine`).
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub workspace_id: WorkspaceId,
    /// OS process id of the session leader. Never reused within this
    /// record's lifetime. Zero while `status == Starting`.
    pub pid: u32,
    /// Caller-supplied shell text, retained verbatim for display/debugging.
    pub script: String,
    pub display_name: Option<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub exit_code_path: PathBuf,
    /// Monotonic millis from the injected clock. Unset until the
    /// `Starting -> Running` transition.
    pub started_at: Option<i64>,
    pub status: Status,
    /// Present iff `status` is `Exited` or `Killed`. For `Killed`, this is
    /// 143 (SIGTERM) or 137 (SIGKILL), as recorded by the terminator.
    pub exit_code: Option<i32>,
    pub finished_at: Option<i64>,
    pub last_error: Option<String>,
    /// True if this record originated as a foreground run later handed off
    /// to the background. Informational only.
    pub was_foreground: bool,
}

impl ProcessRecord {
    /// Whether a `terminate` against this record can still have an effect.
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}
