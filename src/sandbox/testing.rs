//! A fake sandbox backend for exercising grading steps and task types
//! without the real `isolate` binary. It runs commands directly on the host
//! (honoring `--chdir`/`--stdin`/`--stdout`/`--stderr`/`--meta` from the
//! argv [`crate::sandbox::Sandbox`] builds) and, once the caller has waited
//! on the child, fabricates a plausible meta log from its real exit status.
//! It does not enforce any of the resource limits it's told about — it
//! exists to make the rest of the crate testable, not to sandbox anything.

use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use anyhow::anyhow;

use super::runner::SandboxRunner;

pub struct FakeSandboxRunner {
    root: PathBuf,
}

impl FakeSandboxRunner {
    pub fn new(root: PathBuf) -> Self {
        FakeSandboxRunner { root }
    }
}

fn parsed_flag(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("--{name}=");
    args.iter().find_map(|a| a.strip_prefix(prefix.as_str()).map(str::to_string))
}

/// `-b <id>` is passed as two separate tokens (unlike the `--flag=value`
/// pairs), so it needs its own lookup.
fn box_id(args: &[String]) -> Option<&str> {
    args.iter().position(|a| a == "-b").and_then(|i| args.get(i + 1)).map(String::as_str)
}

impl SandboxRunner for FakeSandboxRunner {
    fn init(&self, box_id: u32) -> anyhow::Result<PathBuf> {
        let dir = self.root.join(box_id.to_string());
        fs::create_dir_all(dir.join("box"))?;
        Ok(dir)
    }

    fn cleanup(&self, box_id: u32) -> anyhow::Result<()> {
        let dir = self.root.join(box_id.to_string());
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn spawn(&self, argv: &[String]) -> anyhow::Result<Child> {
        let separator = argv
            .iter()
            .position(|a| a == "--")
            .ok_or_else(|| anyhow!("fake sandbox runner requires a -- separator"))?;
        let (flags, command) = argv.split_at(separator);
        let command = &command[1..];
        if command.is_empty() {
            anyhow::bail!("fake sandbox runner given an empty command");
        }

        // `--chdir` names a path inside the sandbox (conventionally
        // `/box`), meaningless on the host. The real working directory is
        // the `box` subdirectory this runner created under the sandbox's
        // own id in `init`.
        let base = match box_id(flags) {
            Some(id) => self.root.join(id).join("box"),
            None => self.root.clone(),
        };
        let stdin_path = parsed_flag(flags, "stdin").map(|p| base.join(p));
        let stdout_path = parsed_flag(flags, "stdout").map(|p| base.join(p));
        let stderr_path = parsed_flag(flags, "stderr").map(|p| base.join(p));

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..]);
        cmd.current_dir(&base);

        match stdin_path {
            Some(path) if path.exists() => {
                cmd.stdin(fs::File::open(path)?);
            }
            _ => {
                cmd.stdin(Stdio::piped());
            }
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| anyhow!("fake sandbox failed to spawn command: {e}"))?;

        if let (Some(path), Some(stdout)) = (stdout_path, child.stdout.take()) {
            redirect_to_file(stdout, path);
        }
        if let (Some(path), Some(stderr)) = (stderr_path, child.stderr.take()) {
            redirect_to_file(stderr, path);
        }

        Ok(child)
    }

    fn write_meta_after_run(
        &self,
        _box_id: u32,
        meta_path: &std::path::Path,
        status: ExitStatus,
        wall_elapsed: f64,
    ) -> anyhow::Result<()> {
        let mut lines = vec![format!("time:{wall_elapsed:.4}"), format!("time-wall:{wall_elapsed:.4}")];
        if let Some(signal) = status.signal() {
            lines.push("status:SG".to_string());
            lines.push(format!("exitsig:{signal}"));
        } else if status.code() != Some(0) {
            lines.push("status:RE".to_string());
        }
        fs::write(meta_path, lines.join("\n") + "\n")?;
        Ok(())
    }
}

fn redirect_to_file(mut pipe: impl std::io::Read + Send + 'static, path: PathBuf) {
    std::thread::spawn(move || {
        if let Ok(mut file) = fs::File::create(&path) {
            let _ = std::io::copy(&mut pipe, &mut file);
        }
    });
}
