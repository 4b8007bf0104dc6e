//! `checker_step`: stage the fixed checker inputs and run a checker
//! executable as a trusted step, then parse its verdict.

use crate::comparators::checker_output::parse_checker_output;
use crate::config::Config;
use crate::job::Digest;
use crate::sandbox::Sandbox;
use crate::steps::trusted::trusted_step;

const RESERVED_NAMES: [&str; 3] = ["checker", "input.txt", "correct_output.txt"];

/// Stage `checker`, `input.txt` and `correct_output.txt`, then run
/// `./checker input.txt correct_output.txt <user_output_name> <extra_args>`
/// and parse its (outcome, text). Returns `(success, outcome?, text?)`.
pub fn checker_step(
    sandbox: &mut Sandbox,
    config: &Config,
    checker_digest: &Digest,
    input_digest: &Digest,
    correct_output_digest: &Digest,
    user_output_name: &str,
    extra_args: &[String],
) -> anyhow::Result<(bool, Option<f64>, Option<String>)> {
    if RESERVED_NAMES.contains(&user_output_name) {
        log::error!("checker_step: user output name {user_output_name:?} collides with a reserved checker filename");
        return Ok((false, None, None));
    }

    sandbox.create_file_from_digest("checker", checker_digest, true)?;
    sandbox.create_file_from_digest("input.txt", input_digest, false)?;
    sandbox.create_file_from_digest("correct_output.txt", correct_output_digest, false)?;

    let mut command =
        vec!["./checker".to_string(), "input.txt".to_string(), "correct_output.txt".to_string(), user_output_name.to_string()];
    command.extend(extra_args.iter().cloned());

    let (box_success, _trusted_success, stats) = trusted_step(sandbox, config, &[command])?;
    if !box_success {
        return Ok((false, None, None));
    }
    let stats = stats.expect("box_success implies stats were collected");

    match parse_checker_output(stats.stdout.as_deref().unwrap_or(""), stats.stderr.as_deref().unwrap_or("")) {
        Ok((outcome, text)) => Ok((true, Some(outcome), Some(text))),
        Err(e) => {
            log::error!("checker_step: malformed checker output: {e}");
            Ok((false, None, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cacher::{FileCacher, InMemoryFileCacher};
    use crate::sandbox::testing::FakeSandboxRunner;
    use crate::sandbox::SandboxRunner;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn tempdir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gradecore-checker-test-{}-{suffix}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn write_fake_checker(dir: &std::path::Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("checker_src.sh");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn reserved_user_output_name_is_refused() {
        let dir = tempdir("reserved");
        let config = crate::config::test_config(dir.clone());
        let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir.clone()));
        let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());
        let mut sandbox = Sandbox::new(runner, cacher.clone(), &config, Some("checker-test")).unwrap();

        let checker_digest = cacher.put_file(b"#!/bin/sh\nexit 0\n", "checker").unwrap();
        let input_digest = cacher.put_file(b"2 3\n", "input").unwrap();
        let correct_digest = cacher.put_file(b"5\n", "correct").unwrap();

        let (success, outcome, text) =
            checker_step(&mut sandbox, &config, &checker_digest, &input_digest, &correct_digest, "input.txt", &[]).unwrap();
        assert!(!success);
        assert!(outcome.is_none());
        assert!(text.is_none());
    }

    #[test]
    fn checker_output_is_parsed_into_outcome_and_text() {
        let dir = tempdir("ok");
        let config = crate::config::test_config(dir.clone());
        let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir.clone()));
        let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());
        let mut sandbox = Sandbox::new(runner, cacher.clone(), &config, Some("checker-test")).unwrap();

        let checker_path = write_fake_checker(&dir, "#!/bin/sh\necho 0.5\necho translate:partial 1>&2\n");
        let checker_digest = cacher.put_file(&std::fs::read(checker_path).unwrap(), "checker").unwrap();
        let input_digest = cacher.put_file(b"2 3\n", "input").unwrap();
        let correct_digest = cacher.put_file(b"5\n", "correct").unwrap();

        let (success, outcome, text) =
            checker_step(&mut sandbox, &config, &checker_digest, &input_digest, &correct_digest, "user_output.txt", &[]).unwrap();
        assert!(success);
        assert_eq!(outcome, Some(0.5));
        assert_eq!(text.as_deref(), Some("Output is partially correct"));
    }
}
