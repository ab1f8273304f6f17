use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use bpe_buffer::OutputBuffer;
use bpe_core::{BpeError, Event, ProcessId, ProcessRecord, Result, ToolCallId, WorkspaceId};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Entry {
    record: ProcessRecord,
    buffer: Arc<Mutex<OutputBuffer>>,
    cancel: CancellationToken,
}

struct Inner {
    entries: HashMap<ProcessId, Entry>,
    terminating: HashMap<WorkspaceId, HashSet<ProcessId>>,
    /// Foreground bash tool calls attributed per workspace, paired with the
    /// record each call is attached to (so a demote can flip that record's
    /// `was_foreground` bit). The specification's invariant is that at most
    /// one is live at a time; violating it is a logic error upstream, not
    /// fatal here, so this stays a `Vec` rather than a single slot.
    foreground_tool_calls: HashMap<WorkspaceId, Vec<(ToolCallId, ProcessId)>>,
}

/// The process table plus its event bus. Mirrors the stateful-pool shape of
/// `csa-mcp-hub`'s `StatefulServerPool`: one `tokio::sync::Mutex`-guarded
/// inner map plus a `CancellationToken` per pooled resource (there, a
/// warm server queue; here, a record's controller loop).
pub struct Registry {
    inner: Mutex<Inner>,
    events: broadcast::Sender<Event>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                terminating: HashMap::new(),
                foreground_tool_calls: HashMap::new(),
            }),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // A lagging or absent receiver is not an error: events are
        // best-effort broadcast, and subscribers reconcile via a fresh
        // snapshot on resubscribe.
        let _ = self.events.send(event);
    }

    pub(crate) async fn insert(
        &self,
        record: ProcessRecord,
        buffer: OutputBuffer,
        cancel: CancellationToken,
    ) {
        let id = record.id.clone();
        let workspace_id = record.workspace_id.clone();
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            id.clone(),
            Entry {
                record,
                buffer: Arc::new(Mutex::new(buffer)),
                cancel,
            },
        );
        drop(inner);
        self.emit(Event::Added { id, workspace_id });
    }

    pub(crate) async fn buffer(&self, id: &ProcessId) -> Option<Arc<Mutex<OutputBuffer>>> {
        let inner = self.inner.lock().await;
        inner.entries.get(id).map(|e| e.buffer.clone())
    }

    pub(crate) async fn cancel_token(&self, id: &ProcessId) -> Option<CancellationToken> {
        let inner = self.inner.lock().await;
        inner.entries.get(id).map(|e| e.cancel.clone())
    }

    pub(crate) async fn update<F: FnOnce(&mut ProcessRecord)>(&self, id: &ProcessId, f: F) {
        let (workspace_id, status) = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.entries.get_mut(id) else {
                return;
            };
            f(&mut entry.record);
            (entry.record.workspace_id.clone(), entry.record.status)
        };
        self.emit(Event::StatusChanged {
            id: id.clone(),
            workspace_id,
            status,
        });
    }

    pub(crate) async fn notify_output_appended(&self, id: &ProcessId) {
        let workspace_id = {
            let inner = self.inner.lock().await;
            match inner.entries.get(id) {
                Some(entry) => entry.record.workspace_id.clone(),
                None => return,
            }
        };
        self.emit(Event::OutputAppended {
            id: id.clone(),
            workspace_id,
        });
    }

    pub async fn get(&self, id: &ProcessId) -> Option<ProcessRecord> {
        let inner = self.inner.lock().await;
        inner.entries.get(id).map(|e| e.record.clone())
    }

    pub async fn list_by_workspace(&self, workspace_id: &WorkspaceId) -> Vec<ProcessRecord> {
        let inner = self.inner.lock().await;
        let mut records: Vec<ProcessRecord> = inner
            .entries
            .values()
            .map(|e| e.record.clone())
            .filter(|r| &r.workspace_id == workspace_id)
            .collect();
        records.sort_by_key(|r| r.started_at.unwrap_or(i64::MAX));
        records
    }

    pub(crate) async fn is_terminating(&self, id: &ProcessId) -> bool {
        let inner = self.inner.lock().await;
        inner.terminating.values().any(|set| set.contains(id))
    }

    pub async fn terminating_ids(&self, workspace_id: &WorkspaceId) -> HashSet<ProcessId> {
        let inner = self.inner.lock().await;
        inner
            .terminating
            .get(workspace_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) async fn mark_terminating(&self, id: &ProcessId, workspace_id: &WorkspaceId) {
        {
            let mut inner = self.inner.lock().await;
            inner
                .terminating
                .entry(workspace_id.clone())
                .or_default()
                .insert(id.clone());
        }
        self.emit(Event::Terminating {
            id: id.clone(),
            workspace_id: workspace_id.clone(),
        });
    }

    pub(crate) async fn clear_terminating(&self, id: &ProcessId, workspace_id: &WorkspaceId) {
        let mut inner = self.inner.lock().await;
        if let Some(set) = inner.terminating.get_mut(workspace_id) {
            set.remove(id);
        }
    }

    /// Remove a record entirely. Only valid once the controller has
    /// confirmed terminal state; the caller (`Engine::dispose`) enforces
    /// that invariant before calling this.
    pub(crate) async fn remove(&self, id: &ProcessId) -> Result<ProcessRecord> {
        let (record, workspace_id) = {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .entries
                .remove(id)
                .ok_or_else(|| BpeError::NotFound(id.clone()))?;
            if let Some(set) = inner.terminating.get_mut(&entry.record.workspace_id) {
                set.remove(id);
            }
            (entry.record.clone(), entry.record.workspace_id.clone())
        };
        self.emit(Event::Removed { id: id.clone(), workspace_id });
        Ok(record)
    }

    pub(crate) async fn set_foreground(
        &self,
        workspace_id: WorkspaceId,
        tool_call_id: ToolCallId,
        process_id: ProcessId,
    ) {
        let mut inner = self.inner.lock().await;
        inner
            .foreground_tool_calls
            .entry(workspace_id)
            .or_default()
            .push((tool_call_id, process_id));
    }

    /// Removes `tool_call_id` from the foreground set and returns the
    /// `ProcessId` it was attached to, so the caller can mark that record's
    /// `was_foreground` bit.
    pub(crate) async fn remove_foreground(
        &self,
        workspace_id: &WorkspaceId,
        tool_call_id: &ToolCallId,
    ) -> Option<ProcessId> {
        let mut inner = self.inner.lock().await;
        let entries = inner.foreground_tool_calls.get_mut(workspace_id)?;
        let position = entries.iter().position(|(id, _)| id == tool_call_id)?;
        let (_, process_id) = entries.remove(position);
        Some(process_id)
    }

    /// Every foreground tool call currently attributed to `workspace_id`,
    /// for the auto-background handoff (see `Engine::handle_new_message`).
    pub(crate) async fn foreground_tool_calls(&self, workspace_id: &WorkspaceId) -> Vec<ToolCallId> {
        let inner = self.inner.lock().await;
        inner
            .foreground_tool_calls
            .get(workspace_id)
            .map(|entries| entries.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) async fn all_live_ids(&self) -> Vec<ProcessId> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .values()
            .filter(|e| e.record.is_live())
            .map(|e| e.record.id.clone())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::collections::BTreeMap;
    use bpe_core::Status;

    fn sample_record(id: &str, ws: &str) -> ProcessRecord {
        ProcessRecord {
            id: ProcessId::from(id.to_string()),
            workspace_id: WorkspaceId::new(ws),
            pid: 42,
            script: "echo hi".into(),
            display_name: None,
            cwd: PathBuf::from("/tmp"),
            env: BTreeMap::new(),
            stdout_path: PathBuf::from(format!("/tmp/{id}.out")),
            stderr_path: PathBuf::from(format!("/tmp/{id}.err")),
            exit_code_path: PathBuf::from(format!("/tmp/{id}.rc")),
            started_at: Some(1),
            status: Status::Running,
            exit_code: None,
            finished_at: None,
            last_error: None,
            was_foreground: false,
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let registry = Registry::new();
        let record = sample_record("p1", "ws");
        registry
            .insert(record.clone(), OutputBuffer::new(1024), CancellationToken::new())
            .await;
        let fetched = registry.get(&record.id).await.unwrap();
        assert_eq!(fetched.id, record.id);
    }

    #[tokio::test]
    async fn list_by_workspace_orders_by_started_at() {
        let registry = Registry::new();
        let mut a = sample_record("a", "ws");
        a.started_at = Some(20);
        let mut b = sample_record("b", "ws");
        b.started_at = Some(10);
        registry.insert(a.clone(), OutputBuffer::new(64), CancellationToken::new()).await;
        registry.insert(b.clone(), OutputBuffer::new(64), CancellationToken::new()).await;
        let listed = registry.list_by_workspace(&WorkspaceId::new("ws")).await;
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[tokio::test]
    async fn remove_clears_terminating_set() {
        let registry = Registry::new();
        let record = sample_record("p1", "ws");
        registry.insert(record.clone(), OutputBuffer::new(64), CancellationToken::new()).await;
        registry.mark_terminating(&record.id, &record.workspace_id).await;
        assert!(registry.terminating_ids(&record.workspace_id).await.contains(&record.id));
        registry.remove(&record.id).await.unwrap();
        assert!(!registry.terminating_ids(&record.workspace_id).await.contains(&record.id));
        assert!(registry.get(&record.id).await.is_none());
    }

    #[tokio::test]
    async fn remove_unknown_id_is_not_found() {
        let registry = Registry::new();
        let err = registry.remove(&ProcessId::from("missing".to_string())).await.unwrap_err();
        assert!(matches!(err, BpeError::NotFound(_)));
    }

    #[tokio::test]
    async fn removing_a_foreground_call_leaves_the_others() {
        let registry = Registry::new();
        let ws = WorkspaceId::new("ws");
        let p1 = ProcessId::from("p1".to_string());
        let p2 = ProcessId::from("p2".to_string());
        registry
            .set_foreground(ws.clone(), ToolCallId::new("call-1"), p1.clone())
            .await;
        registry
            .set_foreground(ws.clone(), ToolCallId::new("call-2"), p2)
            .await;
        let removed = registry
            .remove_foreground(&ws, &ToolCallId::new("call-1"))
            .await;
        assert_eq!(removed, Some(p1));
        assert_eq!(
            registry.foreground_tool_calls(&ws).await,
            vec![ToolCallId::new("call-2")]
        );
    }

    #[tokio::test]
    async fn subscribers_receive_added_and_removed_events() {
        let registry = Registry::new();
        let mut rx = registry.subscribe();
        let record = sample_record("p1", "ws");
        registry.insert(record.clone(), OutputBuffer::new(64), CancellationToken::new()).await;
        registry.remove(&record.id).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Event::Added { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Event::Removed { .. }));
    }
}
