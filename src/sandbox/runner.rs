//! The swappable sandbox backend.
//!
//! Everything [`crate::sandbox::Sandbox`] needs from the outside world goes
//! through this trait: initializing/cleaning up a box, and spawning the
//! helper itself. Production code only ever uses [`IsolateRunner`]; the
//! trait exists so grading-step and task-type logic can be driven in tests
//! without the real `isolate` binary installed.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use anyhow::{anyhow, bail};

pub trait SandboxRunner: Send + Sync {
    /// Run `isolate -b <id> --cg --init`, returning the outer sandbox
    /// directory it reports (the caller appends `box` for the home dir).
    fn init(&self, box_id: u32) -> anyhow::Result<PathBuf>;

    /// Run `isolate -b <id> --cg --cleanup`.
    fn cleanup(&self, box_id: u32) -> anyhow::Result<()>;

    /// Spawn the helper with the given full argument list (including the
    /// `-b <id> --cg --run -- <command>` tail), with stdin/stdout/stderr
    /// piped so the caller can drain them.
    fn spawn(&self, argv: &[String]) -> anyhow::Result<Child>;

    /// Called once the spawned child has been waited on, with its exit
    /// status and measured wall time. The real helper already wrote its own
    /// meta log during `--run`, so [`IsolateRunner`] does nothing here; a
    /// fake backend that runs commands directly has no helper to do that
    /// bookkeeping and synthesizes the meta log in this hook instead.
    fn write_meta_after_run(
        &self,
        box_id: u32,
        meta_path: &std::path::Path,
        status: std::process::ExitStatus,
        wall_elapsed: f64,
    ) -> anyhow::Result<()>;
}

/// Talks to the real `isolate` binary.
pub struct IsolateRunner {
    isolate_path: PathBuf,
}

impl IsolateRunner {
    pub fn new(isolate_path: PathBuf) -> Self {
        IsolateRunner { isolate_path }
    }
}

impl SandboxRunner for IsolateRunner {
    fn init(&self, box_id: u32) -> anyhow::Result<PathBuf> {
        let output = Command::new(&self.isolate_path)
            .arg("-b")
            .arg(box_id.to_string())
            .arg("--cg")
            .arg("--init")
            .output()
            .map_err(|e| anyhow!("failed to spawn isolate --init: {e}"))?;

        if !output.status.success() {
            bail!(
                "isolate --init exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            bail!("isolate --init produced empty stdout");
        }
        Ok(PathBuf::from(root))
    }

    fn cleanup(&self, box_id: u32) -> anyhow::Result<()> {
        let output = Command::new(&self.isolate_path)
            .arg("-b")
            .arg(box_id.to_string())
            .arg("--cg")
            .arg("--cleanup")
            .output()
            .map_err(|e| anyhow!("failed to spawn isolate --cleanup: {e}"))?;

        if !output.status.success() {
            bail!(
                "isolate --cleanup exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    fn spawn(&self, argv: &[String]) -> anyhow::Result<Child> {
        Command::new(&self.isolate_path)
            .args(argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to spawn isolate: {e}"))
    }

    fn write_meta_after_run(
        &self,
        _box_id: u32,
        _meta_path: &std::path::Path,
        _status: std::process::ExitStatus,
        _wall_elapsed: f64,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
