use serde::{Deserialize, Serialize};

/// Lifecycle state of one background process.
///
/// Transitions: `Starting -> Running` on PID parse, `Starting -> Failed` on
/// spawn failure, `Running -> Exited|Killed|Failed`. The terminal states
/// (`Exited`, `Killed`, `Failed`) are sticky: once reached, a record never
/// changes status again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Starting,
    Running,
    Exited,
    Killed,
    Failed,
}

impl Status {
    /// Terminal states are sticky; the controller never transitions out of
    /// them and the registry never re-dispatches a tail loop for them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Exited | Status::Killed | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Exited => "exited",
            Status::Killed => "killed",
            Status::Failed => "failed",
        };
        f.write_str(s)
    }
}
