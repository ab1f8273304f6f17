use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bpe_buffer::OutputBuffer;
use bpe_core::{BpeError, Clock, EngineConfig, ProcessId, Status};
use bpe_executor::CommandExecutor;

use crate::registry::Registry;

/// Everything the combined tail/exit-probe loop needs, gathered at `start`
/// time and moved into the spawned task. Modeled on `csa_process`'s
/// poll-with-injected-clock watchdog shape: plain state threaded through an
/// explicit loop, no hidden globals.
pub(crate) struct ControllerContext {
    pub registry: Arc<Registry>,
    pub executor: Arc<dyn CommandExecutor>,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
    pub id: ProcessId,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub exit_code_path: PathBuf,
}

/// Runs until the record reaches a terminal state or `cancel` fires. This is
/// the sole writer of the record's `OutputBuffer` during normal operation;
/// folding the tail read and exit-code probe into one cooperative loop is
/// explicitly allowed by the specification.
pub(crate) async fn run(ctx: ControllerContext, cancel: CancellationToken) {
    let mut stdout_offset: u64 = 0;
    let mut stderr_offset: u64 = 0;
    let mut consecutive_failures: u32 = 0;
    let mut first_tick = true;
    let mut last_notify_ms: Option<i64> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(id = %ctx.id, "controller loop cancelled");
                return;
            }
            _ = tokio::time::sleep(ctx.config.tail_poll_interval()) => {}
        }

        let max_bytes = first_tick.then_some(ctx.config.initial_tail_bytes);
        first_tick = false;

        let stdout_read = ctx
            .executor
            .read_file(&ctx.stdout_path, Some(stdout_offset), max_bytes)
            .await;
        let stderr_read = ctx
            .executor
            .read_file(&ctx.stderr_path, Some(stderr_offset), max_bytes)
            .await;

        match (stdout_read, stderr_read) {
            (Ok(out), Ok(err)) => {
                consecutive_failures = 0;
                stdout_offset = out.next_offset;
                stderr_offset = err.next_offset;
                if !out.bytes.is_empty() || !err.bytes.is_empty() {
                    append_output(&ctx, &out.bytes, &err.bytes, &mut last_notify_ms).await;
                }
            }
            (stdout_result, stderr_result) => {
                consecutive_failures += 1;
                warn!(
                    id = %ctx.id,
                    attempt = consecutive_failures,
                    stdout_ok = stdout_result.is_ok(),
                    stderr_ok = stderr_result.is_ok(),
                    "tail read failed"
                );
                if consecutive_failures >= ctx.config.max_consecutive_tail_failures {
                    let message = stdout_result
                        .err()
                        .or(stderr_result.err())
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown tail failure".to_string());
                    let failure = BpeError::TailFailure {
                        id: ctx.id.clone(),
                        attempts: consecutive_failures,
                        message,
                    };
                    ctx.registry
                        .update(&ctx.id, |record| {
                            record.status = Status::Failed;
                            record.last_error = Some(failure.to_string());
                            record.finished_at = Some(ctx.clock.now_ms());
                        })
                        .await;
                    return;
                }
                continue;
            }
        }

        if let Some(exit_code) = probe_exit_code(&ctx).await {
            // One more flush so output written right before exit isn't lost.
            let final_stdout = ctx
                .executor
                .read_file(&ctx.stdout_path, Some(stdout_offset), None)
                .await
                .ok();
            let final_stderr = ctx
                .executor
                .read_file(&ctx.stderr_path, Some(stderr_offset), None)
                .await
                .ok();
            if let (Some(out), Some(err)) = (&final_stdout, &final_stderr) {
                if !out.bytes.is_empty() || !err.bytes.is_empty() {
                    // Final flush before a terminal transition always notifies,
                    // bypassing the coalescing window: there won't be another
                    // tick to catch up on a throttled event.
                    append_output_forced(&ctx, &out.bytes, &err.bytes).await;
                }
            }

            let was_terminating = ctx.registry.is_terminating(&ctx.id).await;
            let status = if was_terminating && matches!(exit_code, 137 | 143) {
                Status::Killed
            } else {
                Status::Exited
            };
            debug!(id = %ctx.id, %status, exit_code, "process reached terminal state");

            let workspace_id = ctx.registry.get(&ctx.id).await.map(|r| r.workspace_id);
            ctx.registry
                .update(&ctx.id, |record| {
                    record.status = status;
                    record.exit_code = Some(exit_code);
                    record.finished_at = Some(ctx.clock.now_ms());
                })
                .await;
            if let Some(workspace_id) = workspace_id {
                ctx.registry.clear_terminating(&ctx.id, &workspace_id).await;
            }
            return;
        }
    }
}

/// Appends new bytes to the record's buffer and notifies subscribers, but
/// coalesces the notification: if the previous notification for this record
/// happened less than `output_coalesce_ms` ago, the event is skipped even
/// though the buffer itself was updated. A later tick (or the forced flush
/// at terminal state) will still surface the bytes.
async fn append_output(
    ctx: &ControllerContext,
    stdout: &[u8],
    stderr: &[u8],
    last_notify_ms: &mut Option<i64>,
) {
    write_to_buffer(ctx, stdout, stderr).await;

    let now = ctx.clock.now_ms();
    let window_ms = ctx.config.output_coalesce_window().as_millis() as i64;
    let should_notify = match *last_notify_ms {
        Some(last) => now.saturating_sub(last) >= window_ms,
        None => true,
    };
    if should_notify {
        *last_notify_ms = Some(now);
        ctx.registry.notify_output_appended(&ctx.id).await;
    }
}

async fn append_output_forced(ctx: &ControllerContext, stdout: &[u8], stderr: &[u8]) {
    write_to_buffer(ctx, stdout, stderr).await;
    ctx.registry.notify_output_appended(&ctx.id).await;
}

async fn write_to_buffer(ctx: &ControllerContext, stdout: &[u8], stderr: &[u8]) {
    let Some(buffer) = ctx.registry.buffer(&ctx.id).await else {
        return;
    };
    let mut buffer = buffer.lock().await;
    if !stdout.is_empty() {
        buffer.append(stdout);
    }
    if !stderr.is_empty() {
        buffer.append(stderr);
    }
}

async fn probe_exit_code(ctx: &ControllerContext) -> Option<i32> {
    match ctx.executor.file_exists(&ctx.exit_code_path).await {
        Ok(true) => {}
        Ok(false) => return None,
        Err(e) => {
            warn!(id = %ctx.id, error = %e, "exit-code probe read failed, will retry");
            return None;
        }
    }
    let read = ctx
        .executor
        .read_file(&ctx.exit_code_path, None, None)
        .await
        .ok()?;
    let text = String::from_utf8_lossy(&read.bytes);
    bpe_shell::parse_exit_code(&text)
}

/// Compose and fire the terminator script. Failures are logged, never
/// surfaced: the exit-probe loop is what actually finalizes the record once
/// the script's write lands.
pub(crate) async fn issue_terminate(
    executor: &dyn CommandExecutor,
    id: &ProcessId,
    pid: u32,
    exit_code_path: &Path,
    grace_secs: u64,
) {
    let quote = |p: &str| executor.quote_path(Path::new(p));
    let cmd = bpe_shell::build_terminate_command(pid, exit_code_path, Some(grace_secs), quote);
    if let Err(e) = executor.exec(&cmd, None).await {
        warn!(id = %id, error = %e, "terminate command failed to run");
    }
}

/// Used by `OutputBuffer` allocation at `start` time; kept here so the
/// buffer's capacity source of truth is the same config the controller
/// loop reads from.
pub(crate) fn new_output_buffer(config: &EngineConfig) -> OutputBuffer {
    OutputBuffer::new(config.max_total_bytes)
}
