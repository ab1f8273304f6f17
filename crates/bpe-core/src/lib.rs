//! Shared types for the Background Process Engine: opaque ids, the process
//! record, the lifecycle status enum, the closed error taxonomy, the
//! injected clock/scratch-path abstractions, and engine configuration.
//!
//! This crate has no async runtime dependency and no I/O beyond
//! `TempDirScratchAllocator`'s use of `tempfile` — it is the vocabulary the
//! rest of the engine (`bpe-shell`, `bpe-executor`, `bpe-buffer`,
//! `bpe-engine`) is built from.

mod api_types;
mod clock;
mod config;
mod error;
mod ids;
mod record;
mod status;

pub use api_types::{Event, OutputSnapshot, ProcessSnapshot, StartRequest};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::EngineConfig;
pub use error::{BpeError, Result};
pub use ids::{ProcessId, ToolCallId, WorkspaceId};
pub use record::ProcessRecord;
pub use scratch::{ScratchAllocator, ScratchPaths, TempDirScratchAllocator};
pub use status::Status;

mod scratch;
