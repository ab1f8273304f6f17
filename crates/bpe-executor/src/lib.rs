//! The executor port (C2): the abstract capability set the engine consumes
//! to run commands and read/write scratch files, local or remote.
//!
//! This crate ships [`LocalExecutor`], backed by `tokio::process` and
//! `tokio::fs`. A remote (SSH) implementation is out of this crate's scope
//! (per the specification); any caller can implement [`CommandExecutor`]
//! for their own transport.

mod error;
#[cfg(any(test, feature = "test-util"))]
mod fake;
mod local;

pub use error::{ExecutorError, Result};
pub use local::LocalExecutor;
#[cfg(any(test, feature = "test-util"))]
pub use fake::FlakyExecutor;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

/// Output of a short-lived command (`exec`/`spawn`).
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Result of a (possibly partial) file read.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub bytes: Vec<u8>,
    pub next_offset: u64,
    pub size: u64,
}

/// Abstract capability set the engine needs from a host, local or remote.
///
/// Operations against the same path are ordered; concurrent calls against
/// different paths may interleave freely.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `cmd_text` and wait for it to finish.
    async fn exec(&self, cmd_text: &str, timeout: Option<Duration>) -> Result<ExecOutput>;

    /// Like `exec`, but used when the caller expects the command to print a
    /// PID and return immediately (the spawn command backgrounds its own
    /// child and exits).
    async fn spawn(&self, cmd_text: &str) -> Result<ExecOutput>;

    async fn file_exists(&self, path: &Path) -> Result<bool>;

    /// Read `path`, optionally resuming from `from_offset` and capping the
    /// read at `max_bytes`. Must tolerate a file that is still being
    /// appended to by another process.
    async fn read_file(
        &self,
        path: &Path,
        from_offset: Option<u64>,
        max_bytes: Option<usize>,
    ) -> Result<ReadResult>;

    /// Idempotent: deleting a file that does not exist is success.
    async fn delete_file(&self, path: &Path) -> Result<()>;

    fn path_join(&self, segments: &[&str]) -> PathBuf {
        let mut joined = PathBuf::new();
        for segment in segments {
            joined.push(segment);
        }
        joined
    }

    fn tmp_dir(&self) -> PathBuf;

    /// Quote a path for inclusion in a command run by this executor.
    /// Defaults to POSIX single-quoting; a remote executor may override
    /// this for host-specific tilde/path handling.
    fn quote_path(&self, path: &Path) -> String {
        bpe_shell::shell_quote(&path.to_string_lossy())
    }
}
