//! `compilation_step`: compile a sequence of commands under a permissive,
//! compile-specific resource profile.

use std::path::PathBuf;

use crate::config::Config;
use crate::sandbox::Sandbox;
use crate::stats::{ExitStatus, Stats};
use crate::steps::common::generic_step;
use crate::steps::messages::default_messages;

fn apply_compilation_profile(sandbox: &mut Sandbox, config: &Config) {
    sandbox.add_mapped_directory("/etc", Some(PathBuf::from("/etc")), "", true);
    sandbox.preserve_env = true;
    sandbox.max_processes = config.compilation_sandbox_max_processes;
    sandbox.timeout = Some(config.compilation_sandbox_max_time_s);
    sandbox.wallclock_timeout = Some(2.0 * config.compilation_sandbox_max_time_s + 1.0);
    sandbox.address_space_kib = Some(config.compilation_sandbox_max_memory_kib.0 as u64);
}

/// Compile `command_sequence` in order, stopping at the first command that
/// doesn't exit `OK`. Returns `(box_success, compile_success?, text?, stats?)`.
pub fn compilation_step(
    sandbox: &mut Sandbox,
    config: &Config,
    command_sequence: &[Vec<String>],
) -> anyhow::Result<(bool, Option<bool>, Option<Vec<String>>, Option<Stats>)> {
    apply_compilation_profile(sandbox, config);
    let outcome = generic_step(sandbox, "compilation", command_sequence, true)?;

    if !outcome.box_success {
        log::error!("compilation step {:?}: sandbox failure", sandbox.tag());
        return Ok((false, None, None, None));
    }

    let messages = default_messages();
    let exit_status = outcome.exit_status.expect("box_success implies an exit status");
    let stats = outcome.stats;

    match exit_status {
        ExitStatus::Ok => Ok((true, Some(true), Some(vec![messages.get("compilation_success")?.message.to_string()]), stats)),
        ExitStatus::NonzeroReturn => Ok((true, Some(false), Some(vec![messages.get("compilation_fail")?.message.to_string()]), stats)),
        ExitStatus::Timeout => Ok((true, Some(false), Some(vec![messages.get("compilation_timeout")?.message.to_string()]), stats)),
        ExitStatus::TimeoutWall => Ok((true, Some(false), Some(vec![messages.get("compilation_timeout_wall")?.message.to_string()]), stats)),
        ExitStatus::Signal => {
            let signal = stats.as_ref().and_then(|s| s.signal).unwrap_or(-1);
            Ok((true, Some(false), Some(vec![messages.get("compilation_signal")?.message.to_string(), signal.to_string()]), stats))
        }
        ExitStatus::MemoryLimit => {
            let signal = stats.as_ref().and_then(|s| s.signal).unwrap_or(-1);
            Ok((true, Some(false), Some(vec![messages.get("compilation_signal")?.message.to_string(), signal.to_string()]), stats))
        }
        ExitStatus::SandboxError => {
            log::error!("compilation step {:?}: unrecognized sandbox status", sandbox.tag());
            Ok((false, None, None, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cacher::InMemoryFileCacher;
    use crate::sandbox::testing::FakeSandboxRunner;
    use crate::sandbox::SandboxRunner;
    use std::sync::Arc;

    fn new_sandbox(dir: &std::path::Path) -> Sandbox {
        let config = crate::config::test_config(dir.to_path_buf());
        let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir.to_path_buf()));
        let cacher: Arc<dyn crate::cacher::FileCacher> = Arc::new(InMemoryFileCacher::new());
        Sandbox::new(runner, cacher, &config, Some("compile-test")).unwrap()
    }

    fn tempdir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gradecore-compile-test-{}-{suffix}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn successful_single_command_reports_success() {
        let dir = tempdir("ok");
        let mut sandbox = new_sandbox(&dir);
        let config = crate::config::test_config(dir.clone());
        let commands = vec![vec!["/bin/true".to_string()]];
        let (box_success, compile_success, text, stats) = compilation_step(&mut sandbox, &config, &commands).unwrap();
        assert!(box_success);
        assert_eq!(compile_success, Some(true));
        assert!(text.unwrap()[0].contains("succeeded"));
        assert!(stats.unwrap().is_ok());
    }

    #[test]
    fn nonzero_exit_reports_compile_failure_not_box_failure() {
        let dir = tempdir("fail");
        let mut sandbox = new_sandbox(&dir);
        let config = crate::config::test_config(dir.clone());
        let commands = vec![vec!["/bin/false".to_string()]];
        let (box_success, compile_success, text, _stats) = compilation_step(&mut sandbox, &config, &commands).unwrap();
        assert!(box_success);
        assert_eq!(compile_success, Some(false));
        assert!(text.unwrap()[0].contains("failed"));
    }

    #[test]
    fn stops_at_first_failing_command() {
        let dir = tempdir("seq");
        let mut sandbox = new_sandbox(&dir);
        let config = crate::config::test_config(dir.clone());
        let commands = vec![vec!["/bin/false".to_string()], vec!["/bin/true".to_string()]];
        let (_, compile_success, _, _) = compilation_step(&mut sandbox, &config, &commands).unwrap();
        assert_eq!(compile_success, Some(false));
        assert!(!sandbox.file_exists("compilation_stdout_2.txt"));
    }
}
