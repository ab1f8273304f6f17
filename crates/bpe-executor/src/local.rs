use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;

use crate::error::{ExecutorError, Result};
use crate::{CommandExecutor, ExecOutput, ReadResult};

/// Runs commands via `/bin/sh -c <text>` and reads/writes the local
/// filesystem directly. This is the executor a caller uses when the
/// background process runs on the same host as the engine.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    shell: PathBuf,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the shell used to run command text (defaults to
    /// `/bin/sh`). Does not affect the `bash` invoked inside a wrapper
    /// script — that is controlled separately via `SpawnCommandInput::bash_path`.
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    async fn run(&self, cmd_text: &str, timeout: Option<Duration>) -> Result<ExecOutput> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(cmd_text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(ExecutorError::Io)?;
        let output_fut = child.wait_with_output();

        let output = match timeout {
            Some(d) => tokio::time::timeout(d, output_fut)
                .await
                .map_err(|_| ExecutorError::Timeout(d))?
                .map_err(ExecutorError::Io)?,
            None => output_fut.await.map_err(ExecutorError::Io)?,
        };

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn exec(&self, cmd_text: &str, timeout: Option<Duration>) -> Result<ExecOutput> {
        self.run(cmd_text, timeout).await
    }

    async fn spawn(&self, cmd_text: &str) -> Result<ExecOutput> {
        // No timeout: a spawn command backgrounds its own child and returns
        // immediately once it prints the PID.
        self.run(cmd_text, None).await
    }

    async fn file_exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::metadata(path).await.is_ok())
    }

    async fn read_file(
        &self,
        path: &Path,
        from_offset: Option<u64>,
        max_bytes: Option<usize>,
    ) -> Result<ReadResult> {
        let mut file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ReadResult {
                    bytes: Vec::new(),
                    next_offset: from_offset.unwrap_or(0),
                    size: 0,
                });
            }
            Err(e) => return Err(ExecutorError::Io(e)),
        };

        let size = file.metadata().await.map_err(ExecutorError::Io)?.len();
        let start = from_offset.unwrap_or(0).min(size);
        if start > 0 {
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(ExecutorError::Io)?;
        }

        let to_read = max_bytes.map(|m| m as u64).unwrap_or(size - start);
        let mut buf = vec![0u8; to_read.min(size - start) as usize];
        let mut read_total = 0usize;
        while read_total < buf.len() {
            let n = file
                .read(&mut buf[read_total..])
                .await
                .map_err(ExecutorError::Io)?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        buf.truncate(read_total);

        Ok(ReadResult {
            next_offset: start + read_total as u64,
            bytes: buf,
            size,
        })
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExecutorError::Io(e)),
        }
    }

    fn tmp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_captures_stdout_stderr_and_exit_code() {
        let exec = LocalExecutor::new();
        let out = exec
            .exec("echo out; echo err 1>&2; exit 3", None)
            .await
            .unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn exec_honors_timeout() {
        let exec = LocalExecutor::new();
        let result = exec.exec("sleep 5", Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(ExecutorError::Timeout(_))));
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty_not_an_error() {
        let exec = LocalExecutor::new();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.out");
        let result = exec.read_file(&missing, None, None).await.unwrap();
        assert!(result.bytes.is_empty());
        assert_eq!(result.size, 0);
    }

    #[tokio::test]
    async fn read_file_resumes_from_offset() {
        let exec = LocalExecutor::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.out");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let first = exec.read_file(&path, None, Some(4)).await.unwrap();
        assert_eq!(first.bytes, b"0123");
        assert_eq!(first.next_offset, 4);

        let second = exec
            .read_file(&path, Some(first.next_offset), None)
            .await
            .unwrap();
        assert_eq!(second.bytes, b"456789");
        assert_eq!(second.next_offset, 10);
    }

    #[tokio::test]
    async fn delete_file_is_idempotent() {
        let exec = LocalExecutor::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.out");
        exec.delete_file(&path).await.unwrap();
        tokio::fs::write(&path, b"x").await.unwrap();
        exec.delete_file(&path).await.unwrap();
        exec.delete_file(&path).await.unwrap();
        assert!(!exec.file_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn spawn_prints_pid_on_stdout() {
        let exec = LocalExecutor::new();
        let dir = tempfile::tempdir().unwrap();
        let stdout_path = dir.path().join("x.out");
        let stderr_path = dir.path().join("x.err");
        let exit_path = dir.path().join("x.rc");
        let wrapper = bpe_shell::build_wrapper_script(bpe_shell::WrapperScriptInput {
            exit_code_path: &exit_path,
            cwd: dir.path(),
            env: &Default::default(),
            script: "echo hi",
        });
        let spawn_cmd = bpe_shell::build_spawn_command(bpe_shell::SpawnCommandInput {
            wrapper_script: &wrapper,
            stdout_path: &stdout_path,
            stderr_path: &stderr_path,
            niceness: None,
            bash_path: None,
        });
        let result = exec.spawn(&spawn_cmd).await.unwrap();
        let pid = bpe_shell::parse_pid(&result.stdout);
        assert!(pid.is_some(), "expected a PID on stdout, got {result:?}");
    }
}
