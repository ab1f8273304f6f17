use std::time::Duration;

use crate::error::{BpeError, Result};

/// Engine tunables. Every field has a default matching the values named in
/// the specification; all of them may be overridden via `BPE_*` environment
/// variables, read once at `EngineConfig::from_env()` time the way this
/// codebase's CLI reads `CSA_DEPTH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Output buffer cap, in bytes, before the head is dropped.
    pub max_total_bytes: usize,
    /// Cadence of the combined tail/exit-probe loop.
    pub tail_poll_ms: u64,
    /// Cap on the first read of a pre-existing scratch file, to avoid
    /// re-reading a large file that existed before the tail loop started.
    pub initial_tail_bytes: usize,
    /// Grace period between SIGTERM and SIGKILL in the terminator script.
    pub grace_secs: u64,
    /// If a terminate's exit-code write hasn't landed after this long, the
    /// controller re-issues the terminate command.
    pub terminate_force_timeout_ms: u64,
    /// How long `shutdown()` waits for in-flight terminates before
    /// abandoning remaining scratch files.
    pub shutdown_grace_ms: u64,
    /// Consecutive tail-loop read failures before a record transitions to
    /// `Failed`.
    pub max_consecutive_tail_failures: u32,
    /// `OutputAppended` events are coalesced to at most one per buffer per
    /// this many milliseconds.
    pub output_coalesce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 1024 * 1024,
            tail_poll_ms: 500,
            initial_tail_bytes: 64 * 1024,
            grace_secs: 2,
            terminate_force_timeout_ms: 10_000,
            shutdown_grace_ms: 5_000,
            max_consecutive_tail_failures: 5,
            output_coalesce_ms: 50,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults overridden by `BPE_*` environment
    /// variables, falling back to the default for any variable that is
    /// unset or fails to parse.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_total_bytes: env_or("BPE_MAX_TOTAL_BYTES", defaults.max_total_bytes),
            tail_poll_ms: env_or("BPE_TAIL_POLL_MS", defaults.tail_poll_ms),
            initial_tail_bytes: env_or("BPE_INITIAL_TAIL_BYTES", defaults.initial_tail_bytes),
            grace_secs: env_or("BPE_GRACE_SECS", defaults.grace_secs),
            terminate_force_timeout_ms: env_or(
                "BPE_TERMINATE_FORCE_TIMEOUT_MS",
                defaults.terminate_force_timeout_ms,
            ),
            shutdown_grace_ms: env_or("BPE_SHUTDOWN_GRACE_MS", defaults.shutdown_grace_ms),
            max_consecutive_tail_failures: env_or(
                "BPE_MAX_CONSECUTIVE_TAIL_FAILURES",
                defaults.max_consecutive_tail_failures,
            ),
            output_coalesce_ms: env_or("BPE_OUTPUT_COALESCE_MS", defaults.output_coalesce_ms),
        }
    }

    pub fn tail_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tail_poll_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn terminate_force_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_force_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn output_coalesce_window(&self) -> Duration {
        Duration::from_millis(self.output_coalesce_ms)
    }

    /// Reject configs that can never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_total_bytes == 0 {
            return Err(BpeError::InvalidArgument(
                "max_total_bytes must be greater than zero".into(),
            ));
        }
        if self.tail_poll_ms == 0 {
            return Err(BpeError::InvalidArgument(
                "tail_poll_ms must be greater than zero".into(),
            ));
        }
        if self.max_consecutive_tail_failures == 0 {
            return Err(BpeError::InvalidArgument(
                "max_consecutive_tail_failures must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_specification() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_total_bytes, 1024 * 1024);
        assert_eq!(cfg.tail_poll_ms, 500);
        assert_eq!(cfg.initial_tail_bytes, 64 * 1024);
        assert_eq!(cfg.grace_secs, 2);
        assert_eq!(cfg.terminate_force_timeout_ms, 10_000);
        assert_eq!(cfg.shutdown_grace_ms, 5_000);
        assert_eq!(cfg.max_consecutive_tail_failures, 5);
    }

    #[test]
    fn zero_byte_budget_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.max_total_bytes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unset_env_vars_fall_back_to_defaults() {
        // SAFETY (test-only): no other test in this process reads/writes
        // BPE_TAIL_POLL_MS, and `cargo test` runs each test crate
        // single-threaded by default for env-mutating tests of this shape.
        unsafe {
            std::env::remove_var("BPE_TAIL_POLL_MS");
        }
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.tail_poll_ms, EngineConfig::default().tail_poll_ms);
    }
}
