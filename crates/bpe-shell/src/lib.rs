//! Pure POSIX shell-text composition: quoting, and the three script
//! fragments the engine needs (wrapper, spawn, terminate). Nothing in this
//! module performs I/O or holds state — every function is a total,
//! synchronous string transform, so it is tested without a runtime.

use std::collections::BTreeMap;
use std::path::Path;

/// Quote `s` as a single POSIX shell word. Round-trips any byte sequence:
/// after `eval`, the shell restores `s` exactly.
///
/// ```
/// assert_eq!(bpe_shell::shell_quote("hello"), "'hello'");
/// assert_eq!(bpe_shell::shell_quote("it's"), "'it'\"'\"'s'");
/// assert_eq!(bpe_shell::shell_quote(""), "''");
/// ```
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Inputs to [`build_wrapper_script`].
#[derive(Debug, Clone)]
pub struct WrapperScriptInput<'a> {
    pub exit_code_path: &'a Path,
    pub cwd: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub script: &'a str,
}

/// Compose the wrapper script run inside the spawned shell: sets an `EXIT`
/// trap that writes the shell's exit status to `exit_code_path` before
/// anything else can run, `cd`s into `cwd`, exports `env`, then runs
/// `script`.
///
/// The trap is set first so the exit-code file is written on every exit
/// path — normal completion, a script error, or a trap-propagated signal.
/// `cd` and the exports precede the user's script.
///
/// ```
/// use std::collections::BTreeMap;
/// use std::path::Path;
/// use bpe_shell::{build_wrapper_script, WrapperScriptInput};
///
/// let env = BTreeMap::new();
/// let script = build_wrapper_script(WrapperScriptInput {
///     exit_code_path: Path::new("/tmp/x.rc"),
///     cwd: Path::new("/tmp"),
///     env: &env,
///     script: "echo hi",
/// });
/// assert!(script.starts_with("trap "));
/// assert!(script.contains("cd '/tmp'"));
/// assert!(script.ends_with("echo hi"));
/// ```
pub fn build_wrapper_script(input: WrapperScriptInput<'_>) -> String {
    let trap_body = format!(
        "echo $? > {}",
        shell_quote(&input.exit_code_path.to_string_lossy())
    );
    let mut parts = vec![
        format!("trap {} EXIT", shell_quote(&trap_body)),
        format!("cd {}", shell_quote(&input.cwd.to_string_lossy())),
    ];
    for (key, value) in input.env {
        parts.push(format!("export {key}={}", shell_quote(value)));
    }
    parts.push(input.script.to_string());
    parts.join(" && ")
}

/// Inputs to [`build_spawn_command`].
#[derive(Debug, Clone)]
pub struct SpawnCommandInput<'a> {
    pub wrapper_script: &'a str,
    pub stdout_path: &'a Path,
    pub stderr_path: &'a Path,
    pub niceness: Option<i32>,
    pub bash_path: Option<&'a str>,
}

/// Compose the command that starts `wrapper_script` as a detached session
/// leader and prints its PID to stdout.
///
/// `set -m` enables job control so the child becomes the leader of its own
/// process group (PGID == PID), which is what lets [`build_terminate_command`]
/// target the whole group with `kill -SIGNAL -PID`. `nohup` plus the
/// redirections and `< /dev/null` detach the child from any controlling
/// terminal so the caller may exit without reaping it.
pub fn build_spawn_command(input: SpawnCommandInput<'_>) -> String {
    let bash = shell_quote(input.bash_path.unwrap_or("bash"));
    let nice_prefix = input
        .niceness
        .map(|n| format!("nice -n {n} "))
        .unwrap_or_default();
    format!(
        "(set -m; {nice_prefix}nohup {bash} -c {} > {} 2> {} < /dev/null & echo $!)",
        shell_quote(input.wrapper_script),
        shell_quote(&input.stdout_path.to_string_lossy()),
        shell_quote(&input.stderr_path.to_string_lossy()),
    )
}

const DEFAULT_GRACE_SECS: u64 = 2;

/// Compose the command that terminates the process-group leader `pid`: send
/// `SIGTERM`, wait `grace_secs`, escalate to `SIGKILL` if the group survived,
/// then record the outcome in `exit_code_path`.
///
/// `kill` failures are swallowed (`|| true`) since the group may already be
/// gone; the write to `exit_code_path` is unconditional so a later read
/// always observes 137 or 143, never an empty file. `quote_path` overrides
/// how `exit_code_path` is quoted, for executors (e.g. remote-over-SSH)
/// whose target shell needs different tilde/path handling than
/// [`shell_quote`].
pub fn build_terminate_command(
    pid: u32,
    exit_code_path: &Path,
    grace_secs: Option<u64>,
    quote_path: impl Fn(&str) -> String,
) -> String {
    let grace = grace_secs.unwrap_or(DEFAULT_GRACE_SECS);
    let rc = quote_path(&exit_code_path.to_string_lossy());
    format!(
        "kill -TERM -{pid} 2>/dev/null || true; sleep {grace}; \
         if kill -0 -{pid} 2>/dev/null; then \
         kill -KILL -{pid} 2>/dev/null || true; echo 137 > {rc}; \
         else echo 143 > {rc}; fi"
    )
}

/// Parse a trimmed decimal PID. Accepts only `> 0`.
///
/// ```
/// assert_eq!(bpe_shell::parse_pid("  1234\n"), Some(1234));
/// assert_eq!(bpe_shell::parse_pid("0"), None);
/// assert_eq!(bpe_shell::parse_pid("-5"), None);
/// assert_eq!(bpe_shell::parse_pid("abc"), None);
/// ```
pub fn parse_pid(s: &str) -> Option<u32> {
    let n: u32 = s.trim().parse().ok()?;
    (n > 0).then_some(n)
}

/// Parse a trimmed decimal exit code. Accepts only `>= 0`.
///
/// ```
/// assert_eq!(bpe_shell::parse_exit_code(" 0\n"), Some(0));
/// assert_eq!(bpe_shell::parse_exit_code("143"), Some(143));
/// assert_eq!(bpe_shell::parse_exit_code("-1"), None);
/// assert_eq!(bpe_shell::parse_exit_code(""), None);
/// ```
pub fn parse_exit_code(s: &str) -> Option<i32> {
    s.trim().parse().ok()
}
