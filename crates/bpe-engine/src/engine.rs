use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bpe_core::{
    BpeError, Clock, EngineConfig, Event, OutputSnapshot, ProcessId, ProcessRecord,
    ProcessSnapshot, Result, ScratchAllocator, StartRequest, Status, ToolCallId, WorkspaceId,
};
use bpe_executor::CommandExecutor;

use crate::controller::{self, ControllerContext};
use crate::registry::Registry;

/// Top-level library surface (§6 of the specification): the entry point a
/// host embeds to start, observe, and tear down background processes.
///
/// Grounded on `csa_session::manager`'s CRUD-shaped operations, reshaped to
/// return `bpe_core::BpeError` and to fan a subscription stream out of the
/// `Registry` instead of mutating a UI store directly.
pub struct Engine {
    executor: Arc<dyn CommandExecutor>,
    clock: Arc<dyn Clock>,
    scratch: Arc<dyn ScratchAllocator>,
    registry: Arc<Registry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        clock: Arc<dyn Clock>,
        scratch: Arc<dyn ScratchAllocator>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            executor,
            clock,
            scratch,
            registry: Arc::new(Registry::new()),
            config,
        })
    }

    /// §4.4 operation 1: allocate scratch paths, compose the wrapper/spawn
    /// commands, and hand them to the executor. On a parseable PID, starts
    /// the combined tail/exit-probe loop; otherwise the record is born
    /// already `Failed`.
    pub async fn start(&self, request: StartRequest) -> Result<ProcessId> {
        if request.script.is_empty() {
            return Err(BpeError::InvalidArgument("script must not be empty".into()));
        }
        if !request.cwd.is_absolute() {
            return Err(BpeError::InvalidArgument("cwd must be absolute".into()));
        }

        let id = ProcessId::generate();
        let paths = self.scratch.allocate(&id);

        let wrapper = bpe_shell::build_wrapper_script(bpe_shell::WrapperScriptInput {
            exit_code_path: &paths.exit_code_path,
            cwd: &request.cwd,
            env: &request.env,
            script: &request.script,
        });
        let spawn_cmd = bpe_shell::build_spawn_command(bpe_shell::SpawnCommandInput {
            wrapper_script: &wrapper,
            stdout_path: &paths.stdout_path,
            stderr_path: &paths.stderr_path,
            niceness: request.niceness,
            bash_path: None,
        });

        let spawn_result = self.executor.spawn(&spawn_cmd).await;

        let mut record = ProcessRecord {
            id: id.clone(),
            workspace_id: request.workspace_id.clone(),
            pid: 0,
            script: request.script.clone(),
            display_name: request.display_name.clone(),
            cwd: request.cwd.clone(),
            env: request.env.clone(),
            stdout_path: paths.stdout_path.clone(),
            stderr_path: paths.stderr_path.clone(),
            exit_code_path: paths.exit_code_path.clone(),
            started_at: None,
            status: Status::Starting,
            exit_code: None,
            finished_at: None,
            last_error: None,
            was_foreground: false,
        };

        let pid = match spawn_result {
            Ok(output) => bpe_shell::parse_pid(&output.stdout).ok_or_else(|| {
                let detail = if !output.stderr.trim().is_empty() {
                    output.stderr.clone()
                } else if !output.stdout.trim().is_empty() {
                    output.stdout.clone()
                } else {
                    "unknown".to_string()
                };
                detail
            }),
            Err(e) => Err(e.to_string()),
        };

        let cancel = CancellationToken::new();
        match pid {
            Ok(pid) => {
                record.pid = pid;
                record.started_at = Some(self.clock.now_ms());
                record.status = Status::Running;
                self.registry
                    .insert(record, controller::new_output_buffer(&self.config), cancel.clone())
                    .await;

                if let Some(tool_call_id) = request.tool_call_id.filter(|_| !request.run_in_background) {
                    self.registry
                        .set_foreground(request.workspace_id.clone(), tool_call_id, id.clone())
                        .await;
                }

                let ctx = ControllerContext {
                    registry: self.registry.clone(),
                    executor: self.executor.clone(),
                    clock: self.clock.clone(),
                    config: self.config,
                    id: id.clone(),
                    stdout_path: paths.stdout_path,
                    stderr_path: paths.stderr_path,
                    exit_code_path: paths.exit_code_path,
                };
                tokio::spawn(controller::run(ctx, cancel));
                info!(id = %id, pid = record.pid, "process started");
            }
            Err(detail) => {
                record.status = Status::Failed;
                record.last_error = Some(BpeError::SpawnFailed(detail).to_string());
                record.finished_at = Some(self.clock.now_ms());
                self.registry
                    .insert(record, controller::new_output_buffer(&self.config), cancel)
                    .await;
                warn!(id = %id, error = %detail, "spawn failed");
            }
        }

        Ok(id)
    }

    pub async fn list(&self, workspace_id: &WorkspaceId) -> Vec<ProcessSnapshot> {
        self.registry
            .list_by_workspace(workspace_id)
            .await
            .iter()
            .map(ProcessSnapshot::from)
            .collect()
    }

    pub async fn get(&self, id: &ProcessId) -> Result<ProcessSnapshot> {
        self.registry
            .get(id)
            .await
            .map(|r| ProcessSnapshot::from(&r))
            .ok_or_else(|| BpeError::NotFound(id.clone()))
    }

    /// §4.4 operation 4: idempotent even against an already-terminal record
    /// (the terminator script still runs; it simply finds nothing to kill).
    pub async fn terminate(&self, id: &ProcessId) -> Result<()> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| BpeError::NotFound(id.clone()))?;

        self.registry
            .mark_terminating(id, &record.workspace_id)
            .await;
        controller::issue_terminate(
            self.executor.as_ref(),
            id,
            record.pid,
            &record.exit_code_path,
            self.config.grace_secs,
        )
        .await;

        self.schedule_force_retry(id.clone(), record.pid, record.exit_code_path.clone());
        Ok(())
    }

    /// If the record is still non-terminal after `terminate_force_timeout`,
    /// re-issue the terminator once more (§4.4 failure semantics).
    fn schedule_force_retry(&self, id: ProcessId, pid: u32, exit_code_path: std::path::PathBuf) {
        let registry = self.registry.clone();
        let executor = self.executor.clone();
        let timeout = self.config.terminate_force_timeout();
        let grace_secs = self.config.grace_secs;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(record) = registry.get(&id).await {
                if record.is_live() {
                    warn!(id = %id, "terminate did not land in time, re-issuing");
                    controller::issue_terminate(
                        executor.as_ref(),
                        &id,
                        pid,
                        &exit_code_path,
                        grace_secs,
                    )
                    .await;
                }
            }
        });
    }

    /// §4.6: called when the host has a workspace send a new message while
    /// a foreground bash tool call is outstanding. Demotes every foreground
    /// tool call attributed to `workspace_id`; the underlying OS processes
    /// were always detached, so this only changes caller-visible
    /// attribution, never process state.
    pub async fn handle_new_message(&self, workspace_id: &WorkspaceId) {
        for tool_call_id in self.registry.foreground_tool_calls(workspace_id).await {
            self.send_to_background(workspace_id, &tool_call_id).await;
        }
    }

    /// §4.4 operation 5. Removes `tool_call_id` from the foreground set,
    /// flips the record's `was_foreground` bit, and emits a notification.
    /// Never touches the OS process.
    pub async fn send_to_background(&self, workspace_id: &WorkspaceId, tool_call_id: &ToolCallId) {
        if let Some(id) = self
            .registry
            .remove_foreground(workspace_id, tool_call_id)
            .await
        {
            self.registry
                .update(&id, |record| record.was_foreground = true)
                .await;
        }
        debug!(%workspace_id, %tool_call_id, "demoted foreground tool call to background");
    }

    /// §4.4 operation 6.
    pub async fn get_output(
        &self,
        id: &ProcessId,
        from_offset: Option<u64>,
        tail_bytes: Option<usize>,
    ) -> Result<OutputSnapshot> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| BpeError::NotFound(id.clone()))?;
        let buffer = self
            .registry
            .buffer(id)
            .await
            .ok_or_else(|| BpeError::NotFound(id.clone()))?;
        let buffer = buffer.lock().await;

        let (text, next_offset, truncated_start) = if let Some(n) = tail_bytes {
            let tail = buffer.tail(n);
            (
                String::from_utf8_lossy(&tail.bytes).into_owned(),
                buffer.end_offset(),
                false,
            )
        } else {
            let read = buffer.read(from_offset.unwrap_or(0));
            (
                String::from_utf8_lossy(&read.bytes).into_owned(),
                read.next_offset,
                read.truncated_start,
            )
        };

        Ok(OutputSnapshot {
            status: record.status,
            text,
            next_offset,
            truncated_start,
            buffer_truncated: buffer.truncated(),
        })
    }

    /// §4.4 operation 7. Only permitted once the record is terminal.
    pub async fn dispose(&self, id: &ProcessId) -> Result<()> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| BpeError::NotFound(id.clone()))?;
        if record.is_live() {
            return Err(BpeError::NotTerminal(id.clone()));
        }

        for path in [&record.stdout_path, &record.stderr_path, &record.exit_code_path] {
            if let Err(e) = self.executor.delete_file(path).await {
                warn!(id = %id, path = %path.display(), error = %e, "scratch cleanup failed (non-fatal)");
            }
        }

        self.registry.remove(id).await?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.registry.subscribe()
    }

    /// Terminate every non-terminal record, wait up to `shutdown_grace` for
    /// them to finish, then return regardless — any still-live record is
    /// abandoned along with its scratch files.
    pub async fn shutdown(&self) {
        let live_ids = self.registry.all_live_ids().await;
        for id in &live_ids {
            if let Err(e) = self.terminate(id).await {
                warn!(id = %id, error = %e, "terminate during shutdown failed");
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace();
        loop {
            let still_live = self.registry.all_live_ids().await;
            if still_live.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(count = still_live.len(), "shutdown grace expired, abandoning controller loops");
                for id in &still_live {
                    if let Some(cancel) = self.registry.cancel_token(id).await {
                        cancel.cancel();
                    }
                }
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}
