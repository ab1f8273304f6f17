use crate::ProcessId;

/// Closed error taxonomy for the engine's library surface.
///
/// Expected state errors (`NotFound`, `NotTerminal`, `InvalidArgument`)
/// surface synchronously from the call that triggered them. Asynchronous
/// failures (`SpawnFailed`, `TailFailure`, `ExecutorUnavailable`) never
/// propagate as a `BpeError` to a caller already past `start`; they are
/// instead reflected in the next `StatusChanged` event and in the record's
/// `last_error` field.
#[derive(thiserror::Error, Debug)]
pub enum BpeError {
    #[error("could not start process: {0}")]
    SpawnFailed(String),

    #[error("tail loop for process {id} failed after {attempts} consecutive retries: {message}")]
    TailFailure {
        id: ProcessId,
        attempts: u32,
        message: String,
    },

    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("no such process: {0}")]
    NotFound(ProcessId),

    #[error("process {0} is not in a terminal state")]
    NotTerminal(ProcessId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BpeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_spawn_failed() {
        let err = BpeError::SpawnFailed("exec: not found".into());
        assert_eq!(err.to_string(), "could not start process: exec: not found");
    }

    #[test]
    fn display_tail_failure() {
        let err = BpeError::TailFailure {
            id: ProcessId::from("01ARZ".to_string()),
            attempts: 5,
            message: "connection reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "tail loop for process 01ARZ failed after 5 consecutive retries: connection reset"
        );
    }

    #[test]
    fn display_not_found() {
        let err = BpeError::NotFound(ProcessId::from("missing".to_string()));
        assert_eq!(err.to_string(), "no such process: missing");
    }

    #[test]
    fn display_not_terminal() {
        let err = BpeError::NotTerminal(ProcessId::from("01ARZ".to_string()));
        assert_eq!(
            err.to_string(),
            "process 01ARZ is not in a terminal state"
        );
    }

    #[test]
    fn display_invalid_argument() {
        let err = BpeError::InvalidArgument("cwd must be absolute".into());
        assert_eq!(err.to_string(), "invalid argument: cwd must be absolute");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BpeError>();
    }
}
