use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bpe_core::{Clock, EngineConfig, FakeClock, ScratchAllocator, StartRequest, Status,
    TempDirScratchAllocator, WorkspaceId};
use bpe_engine::Engine;
use bpe_executor::{CommandExecutor, FlakyExecutor};

/// Drives the controller's retry/backoff path deterministically: a
/// `FlakyExecutor` that never stops failing `read_file` forces
/// `max_consecutive_tail_failures` consecutive ticks, which must land the
/// record in `Failed` with a `TailFailure`-shaped `last_error`.
#[tokio::test(start_paused = true)]
async fn tail_loop_fails_the_record_after_max_consecutive_failures() {
    let mut config = EngineConfig::default();
    config.tail_poll_ms = 1;
    config.max_consecutive_tail_failures = 3;

    let executor: Arc<dyn CommandExecutor> = Arc::new(FlakyExecutor::new(u32::MAX));
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let scratch: Arc<dyn ScratchAllocator> =
        Arc::new(TempDirScratchAllocator::new_in_temp_dir().unwrap());
    let engine = Engine::new(executor, clock, scratch, config).unwrap();

    let ws = WorkspaceId::new("ws");
    let id = engine
        .start(StartRequest::new(ws, "irrelevant, never actually run", PathBuf::from("/tmp")))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let snapshot = loop {
        let snapshot = engine.get(&id).await.unwrap();
        if snapshot.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            break snapshot;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    };

    assert_eq!(snapshot.status, Status::Failed);
    let last_error = snapshot.last_error.expect("Failed record must carry last_error");
    assert!(
        last_error.contains("tail loop") && last_error.contains("3"),
        "expected a TailFailure-shaped message, got: {last_error}"
    );
}

/// A `FlakyExecutor` that recovers after a handful of failures should not
/// trip the failure threshold: the controller keeps polling and the record
/// is still live once the flakiness ends.
#[tokio::test(start_paused = true)]
async fn tail_loop_survives_transient_failures_under_the_threshold() {
    let mut config = EngineConfig::default();
    config.tail_poll_ms = 1;
    config.max_consecutive_tail_failures = 5;

    let executor: Arc<dyn CommandExecutor> = Arc::new(FlakyExecutor::new(2));
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let scratch: Arc<dyn ScratchAllocator> =
        Arc::new(TempDirScratchAllocator::new_in_temp_dir().unwrap());
    let engine = Engine::new(executor, clock, scratch, config).unwrap();

    let ws = WorkspaceId::new("ws");
    let id = engine
        .start(StartRequest::new(ws, "irrelevant, never actually run", PathBuf::from("/tmp")))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = engine.get(&id).await.unwrap();
    assert_eq!(snapshot.status, Status::Running);
}
