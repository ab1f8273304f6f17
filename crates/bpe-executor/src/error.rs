/// Failure taxonomy for `CommandExecutor` operations. The engine maps
/// `Unavailable` onto `BpeError::ExecutorUnavailable` and everything else
/// onto `BpeError::Io`/`SpawnFailed` as appropriate for the call site.
#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("executor disconnected: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
