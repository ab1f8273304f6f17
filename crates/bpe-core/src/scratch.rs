use std::path::PathBuf;
use std::sync::Arc;

use crate::ProcessId;

/// The three scratch files owned exclusively by one `ProcessRecord`.
///
/// Invariants: all three paths are distinct, live within a directory the
/// engine controls, and are collision-free against concurrent `start`
/// calls (the default implementation gets this for free by keying on the
/// process id, which is itself collision-free).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchPaths {
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub exit_code_path: PathBuf,
}

/// Allocates scratch paths for a new process. Implementations must return
/// paths valid on whatever host the `CommandExecutor` ultimately targets —
/// a remote executor may need to join paths with forward slashes instead of
/// the allocator's local `std::path::Path` separator, which is why `root()`
/// is exposed separately from the joining logic.
pub trait ScratchAllocator: Send + Sync {
    fn allocate(&self, id: &ProcessId) -> ScratchPaths;
}

/// Default allocator: `{root}/{process_id}.{out,err,rc}` under a directory
/// the engine owns (by default the OS temp dir via `tempfile`).
pub struct TempDirScratchAllocator {
    root: PathBuf,
    // Kept alive for the allocator's lifetime when the root is an
    // engine-owned temp directory rather than a caller-supplied path.
    _owned_root: Option<Arc<tempfile::TempDir>>,
}

impl TempDirScratchAllocator {
    /// Allocate scratch files under a fresh, engine-owned temp directory.
    pub fn new_in_temp_dir() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(Self {
            root: dir.path().to_path_buf(),
            _owned_root: Some(Arc::new(dir)),
        })
    }

    /// Allocate scratch files under a caller-supplied directory. The
    /// directory must already exist; the allocator does not create or
    /// remove it.
    pub fn new_in(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _owned_root: None,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl ScratchAllocator for TempDirScratchAllocator {
    fn allocate(&self, id: &ProcessId) -> ScratchPaths {
        let stem = id.as_str();
        ScratchPaths {
            stdout_path: self.root.join(format!("{stem}.out")),
            stderr_path: self.root.join(format!("{stem}.err")),
            exit_code_path: self.root.join(format!("{stem}.rc")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_paths_are_distinct_and_rooted() {
        let alloc = TempDirScratchAllocator::new_in_temp_dir().unwrap();
        let id = ProcessId::generate();
        let paths = alloc.allocate(&id);

        assert_ne!(paths.stdout_path, paths.stderr_path);
        assert_ne!(paths.stdout_path, paths.exit_code_path);
        assert_ne!(paths.stderr_path, paths.exit_code_path);
        for p in [&paths.stdout_path, &paths.stderr_path, &paths.exit_code_path] {
            assert_eq!(p.parent().unwrap(), alloc.root());
        }
    }

    #[test]
    fn concurrent_starts_never_collide() {
        let alloc = TempDirScratchAllocator::new_in_temp_dir().unwrap();
        let a = alloc.allocate(&ProcessId::generate());
        let b = alloc.allocate(&ProcessId::generate());
        assert_ne!(a.stdout_path, b.stdout_path);
    }
}
