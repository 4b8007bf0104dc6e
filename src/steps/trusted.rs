//! `trusted_step`: run admin-authored code (the Communication manager,
//! post-run conversion helpers) under generous, trusted-step limits.
//! Unlike user code, a non-`OK` exit here is an admin-visible fault, not a
//! contestant one, so it's logged at error level.

use crate::config::Config;
use crate::sandbox::Sandbox;
use crate::stats::{ExitStatus, Stats};
use crate::steps::common::generic_step;

fn apply_trusted_profile(sandbox: &mut Sandbox, config: &Config) {
    sandbox.preserve_env = true;
    sandbox.max_processes = config.trusted_sandbox_max_processes;
    sandbox.timeout = Some(config.trusted_sandbox_max_time_s);
    sandbox.wallclock_timeout = Some(2.0 * config.trusted_sandbox_max_time_s + 1.0);
    sandbox.address_space_kib = Some(config.trusted_sandbox_max_memory_kib.0 as u64);
}

/// Run `command_sequence` under trusted-step limits, stopping at the first
/// command whose exit status isn't `OK`. Returns `(box_success,
/// trusted_success?, stats?)`.
pub fn trusted_step(
    sandbox: &mut Sandbox,
    config: &Config,
    command_sequence: &[Vec<String>],
) -> anyhow::Result<(bool, Option<bool>, Option<Stats>)> {
    apply_trusted_profile(sandbox, config);
    let outcome = generic_step(sandbox, "trusted", command_sequence, true)?;

    if !outcome.box_success {
        log::error!("trusted step {:?}: sandbox failure", sandbox.tag());
        return Ok((false, None, None));
    }

    let exit_status = outcome.exit_status.expect("box_success implies an exit status");
    if exit_status != ExitStatus::Ok {
        log::error!("trusted step {:?}: admin code exited {exit_status:?}, not OK", sandbox.tag());
    }
    Ok((true, Some(exit_status == ExitStatus::Ok), outcome.stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cacher::InMemoryFileCacher;
    use crate::sandbox::testing::FakeSandboxRunner;
    use crate::sandbox::SandboxRunner;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn new_sandbox(dir: &std::path::Path) -> Sandbox {
        let config = crate::config::test_config(dir.to_path_buf());
        let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir.to_path_buf()));
        let cacher: Arc<dyn crate::cacher::FileCacher> = Arc::new(InMemoryFileCacher::new());
        Sandbox::new(runner, cacher, &config, Some("trusted-test")).unwrap()
    }

    fn tempdir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gradecore-trusted-test-{}-{suffix}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn successful_admin_command_reports_trusted_success() {
        let dir = tempdir("ok");
        let mut sandbox = new_sandbox(&dir);
        let config = crate::config::test_config(dir.clone());
        let (box_success, trusted_success, stats) = trusted_step(&mut sandbox, &config, &[vec!["/bin/true".to_string()]]).unwrap();
        assert!(box_success);
        assert_eq!(trusted_success, Some(true));
        assert!(stats.unwrap().is_ok());
    }

    #[test]
    fn failing_admin_command_is_still_a_box_success() {
        let dir = tempdir("fail");
        let mut sandbox = new_sandbox(&dir);
        let config = crate::config::test_config(dir.clone());
        let (box_success, trusted_success, _stats) = trusted_step(&mut sandbox, &config, &[vec!["/bin/false".to_string()]]).unwrap();
        assert!(box_success);
        assert_eq!(trusted_success, Some(false));
    }
}
