//! A deterministic, in-memory `CommandExecutor` used only by this crate's
//! own test suite to simulate an unreliable remote transport: every read
//! fails with `ExecutorError::Unavailable` until a configured number of
//! calls have been made, after which it starts serving from an in-memory
//! file map. Exercises the same retry/failure path a real SSH transport
//! would trigger, without needing a network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ExecutorError, Result};
use crate::{CommandExecutor, ExecOutput, ReadResult};

pub struct FlakyExecutor {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    failures_remaining: Mutex<u32>,
}

impl FlakyExecutor {
    /// `fail_n_times`: how many consecutive `read_file` calls return
    /// `Unavailable` before the executor starts serving real content.
    pub fn new(fail_n_times: u32) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            failures_remaining: Mutex::new(fail_n_times),
        }
    }

    pub fn put_file(&self, path: &Path, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_vec());
    }
}

#[async_trait]
impl CommandExecutor for FlakyExecutor {
    async fn exec(&self, _cmd_text: &str, _timeout: Option<Duration>) -> Result<ExecOutput> {
        Ok(ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn spawn(&self, _cmd_text: &str) -> Result<ExecOutput> {
        Ok(ExecOutput {
            stdout: "1234\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn file_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    async fn read_file(
        &self,
        path: &Path,
        from_offset: Option<u64>,
        max_bytes: Option<usize>,
    ) -> Result<ReadResult> {
        {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ExecutorError::Unavailable(
                    "simulated remote disconnect".into(),
                ));
            }
        }

        let files = self.files.lock().unwrap();
        let Some(contents) = files.get(path) else {
            return Ok(ReadResult {
                bytes: Vec::new(),
                next_offset: from_offset.unwrap_or(0),
                size: 0,
            });
        };
        let size = contents.len() as u64;
        let start = from_offset.unwrap_or(0).min(size) as usize;
        let end = max_bytes
            .map(|m| (start + m).min(contents.len()))
            .unwrap_or(contents.len());
        let bytes = contents[start..end].to_vec();
        let next_offset = start as u64 + bytes.len() as u64;
        Ok(ReadResult {
            bytes,
            next_offset,
            size,
        })
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn tmp_dir(&self) -> PathBuf {
        PathBuf::from("/tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_unavailable_for_the_configured_number_of_reads() {
        let exec = FlakyExecutor::new(2);
        let path = PathBuf::from("/scratch/x.out");
        exec.put_file(&path, b"hello");

        let first = exec.read_file(&path, None, None).await;
        assert!(matches!(first, Err(ExecutorError::Unavailable(_))));
        let second = exec.read_file(&path, None, None).await;
        assert!(matches!(second, Err(ExecutorError::Unavailable(_))));

        let third = exec.read_file(&path, None, None).await.unwrap();
        assert_eq!(third.bytes, b"hello");
    }

    #[tokio::test]
    async fn recovers_and_resumes_from_offset_after_flakiness_ends() {
        let exec = FlakyExecutor::new(1);
        let path = PathBuf::from("/scratch/x.out");
        exec.put_file(&path, b"0123456789");

        assert!(exec.read_file(&path, None, None).await.is_err());
        let first = exec.read_file(&path, None, Some(4)).await.unwrap();
        assert_eq!(first.bytes, b"0123");
        let second = exec
            .read_file(&path, Some(first.next_offset), None)
            .await
            .unwrap();
        assert_eq!(second.bytes, b"456789");
    }
}
