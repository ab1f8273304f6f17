//! The lifecycle controller (C5) and registry & events (C6): the engine
//! that turns `bpe-shell` command text and a `bpe-executor::CommandExecutor`
//! into tracked, observable background processes.
//!
//! [`Engine`] is the library surface described in the specification's
//! external-interfaces section; [`Registry`] is its internal process table
//! and event bus, exposed for callers that want direct read access (list,
//! get, subscribe) without going through `Engine`.

mod controller;
mod engine;
mod registry;

pub use engine::Engine;
pub use registry::Registry;

pub use bpe_core::{
    BpeError, Clock, Event, EngineConfig, OutputSnapshot, ProcessId, ProcessRecord,
    ProcessSnapshot, Result, ScratchAllocator, StartRequest, Status, ToolCallId, WorkspaceId,
};
