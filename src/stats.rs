//! Uniform execution statistics and the merge operator used to combine
//! several sandboxed runs into one record (sequential compilation commands,
//! or concurrent Communication processes).

use serde::{Deserialize, Serialize};

use crate::sandbox::Sandbox;

/// Classification of how a sandboxed run ended, derived from the helper's
/// meta log (see [`crate::sandbox::meta`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    Ok,
    NonzeroReturn,
    Timeout,
    TimeoutWall,
    Signal,
    MemoryLimit,
    SandboxError,
}

/// Statistics about one (or several merged) sandboxed executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub cpu_time: Option<f64>,
    pub wall_time: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub exit_status: ExitStatus,
    pub signal: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl Stats {
    pub fn is_ok(&self) -> bool {
        self.exit_status == ExitStatus::Ok
    }
}

/// Replace bytes that scrub_control would have trouble with when decoding
/// the sandbox's captured stdout/stderr to UTF-8: invalid bytes become
/// U+FFFD during decoding, and C0 controls (except TAB/LF/CR), DEL and the
/// 0x80-0xBF continuation range are additionally scrubbed.
fn scrub_captured_text(bytes: &[u8]) -> String {
    let lossy = String::from_utf8_lossy(bytes).into_owned();
    let scrubbed: String = lossy
        .chars()
        .map(|c| {
            let is_scrubbed_control = matches!(c as u32, 0x00..=0x08 | 0x0b | 0x0c | 0x0e..=0x1f | 0x7f..=0xbf);
            if is_scrubbed_control { '\u{fffd}' } else { c }
        })
        .collect();
    scrubbed.trim().to_string()
}

/// Extract statistics from a sandbox about the last command it ran.
///
/// When `collect_output` is set, `stdout`/`stderr` are populated from the
/// sandbox's configured stdout/stderr files, UTF-8-decoded with control
/// characters scrubbed to U+FFFD.
pub fn execution_stats(sandbox: &mut Sandbox, collect_output: bool) -> anyhow::Result<Stats> {
    sandbox.ensure_meta_loaded()?;
    let exit_status = sandbox.exit_status()?;
    let signal = if exit_status == ExitStatus::Signal {
        Some(sandbox.killing_signal()?)
    } else {
        None
    };

    let mut stats = Stats {
        cpu_time: sandbox.cpu_time()?,
        wall_time: sandbox.wall_time()?,
        memory_bytes: sandbox.memory_used()?,
        exit_status,
        signal,
        stdout: None,
        stderr: None,
    };

    if collect_output {
        if let Some(stdout_file) = sandbox.stdout_file.clone() {
            stats.stdout = Some(scrub_captured_text(&sandbox.get_file_to_bytes(&stdout_file, None)?));
        }
        if let Some(stderr_file) = sandbox.stderr_file.clone() {
            stats.stderr = Some(scrub_captured_text(&sandbox.get_file_to_bytes(&stderr_file, None)?));
        }
    }

    Ok(stats)
}

fn safe_sum(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => Some(a + b),
    }
}

fn safe_max(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => Some(a.max(b)),
    }
}

fn safe_sum_u64(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => Some(a + b),
    }
}

fn safe_max_u64(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => Some(a.max(b)),
    }
}

/// Merge two execution statistics records.
///
/// `first` may be absent, in which case a copy of `second` is returned
/// (useful to seed a fold over a sequence of commands). `second` must be
/// present; passing `None` is a caller bug and returns an error, matching
/// the reference behavior of raising on a missing second operand.
pub fn merge_execution_stats(
    first: Option<Stats>,
    second: Option<Stats>,
    concurrent: bool,
) -> anyhow::Result<Stats> {
    let second = second.ok_or_else(|| anyhow::anyhow!("the second input stats cannot be None"))?;
    let Some(first) = first else {
        return Ok(second);
    };

    let mut merged = first.clone();
    merged.cpu_time = safe_sum(first.cpu_time, second.cpu_time);

    if concurrent {
        merged.wall_time = safe_max(first.wall_time, second.wall_time);
        merged.memory_bytes = safe_sum_u64(first.memory_bytes, second.memory_bytes);
    } else {
        merged.wall_time = safe_sum(first.wall_time, second.wall_time);
        merged.memory_bytes = safe_max_u64(first.memory_bytes, second.memory_bytes);
    }

    if first.exit_status == ExitStatus::Ok {
        merged.exit_status = second.exit_status;
        if second.exit_status == ExitStatus::Signal {
            merged.signal = second.signal;
        }
    }

    merged.stdout = join_optional_field(first.stdout, second.stdout);
    merged.stderr = join_optional_field(first.stderr, second.stderr);

    Ok(merged)
}

fn join_optional_field(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (Some(a), Some(b)) => Some(format!("{a}\n===\n{b}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_stats() -> Stats {
        Stats {
            cpu_time: Some(1.0),
            wall_time: Some(1.5),
            memory_bytes: Some(1024),
            exit_status: ExitStatus::Ok,
            signal: None,
            stdout: None,
            stderr: None,
        }
    }

    #[test]
    fn merge_with_no_first_returns_second() {
        let s = ok_stats();
        let merged = merge_execution_stats(None, Some(s.clone()), true).unwrap();
        assert_eq!(merged, s);
    }

    #[test]
    fn merge_with_no_second_errors() {
        assert!(merge_execution_stats(Some(ok_stats()), None, true).is_err());
    }

    #[test]
    fn merge_keeps_first_non_ok_status() {
        let mut first = ok_stats();
        first.exit_status = ExitStatus::NonzeroReturn;
        let second = ok_stats();
        let merged = merge_execution_stats(Some(first), Some(second), true).unwrap();
        assert_eq!(merged.exit_status, ExitStatus::NonzeroReturn);
    }

    #[test]
    fn merge_takes_second_status_and_signal_when_first_ok() {
        let first = ok_stats();
        let mut second = ok_stats();
        second.exit_status = ExitStatus::Signal;
        second.signal = Some(11);
        let merged = merge_execution_stats(Some(first), Some(second), true).unwrap();
        assert_eq!(merged.exit_status, ExitStatus::Signal);
        assert_eq!(merged.signal, Some(11));
    }

    #[test]
    fn concurrent_merge_maxes_wall_sums_memory() {
        let mut first = ok_stats();
        first.wall_time = Some(2.0);
        first.memory_bytes = Some(100);
        let mut second = ok_stats();
        second.wall_time = Some(3.0);
        second.memory_bytes = Some(200);
        let merged = merge_execution_stats(Some(first), Some(second), true).unwrap();
        assert_eq!(merged.wall_time, Some(3.0));
        assert_eq!(merged.memory_bytes, Some(300));
        assert_eq!(merged.cpu_time, Some(2.0));
    }

    #[test]
    fn sequential_merge_sums_wall_maxes_memory() {
        let mut first = ok_stats();
        first.wall_time = Some(2.0);
        first.memory_bytes = Some(100);
        let mut second = ok_stats();
        second.wall_time = Some(3.0);
        second.memory_bytes = Some(200);
        let merged = merge_execution_stats(Some(first), Some(second), false).unwrap();
        assert_eq!(merged.wall_time, Some(5.0));
        assert_eq!(merged.memory_bytes, Some(200));
    }

    #[test]
    fn stdout_join_preserves_missing_side() {
        let mut first = ok_stats();
        first.stdout = Some("a".to_string());
        let second = ok_stats();
        let merged = merge_execution_stats(Some(first), Some(second), true).unwrap();
        assert_eq!(merged.stdout.as_deref(), Some("a"));
    }

    #[test]
    fn stdout_join_uses_separator_when_both_present() {
        let mut first = ok_stats();
        first.stdout = Some("a".to_string());
        let mut second = ok_stats();
        second.stdout = Some("b".to_string());
        let merged = merge_execution_stats(Some(first), Some(second), true).unwrap();
        assert_eq!(merged.stdout.as_deref(), Some("a\n===\nb"));
    }
}
