use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::trace;

use crate::proc::ProcConfig;

pub fn command_for(cfg: &ProcConfig) -> Command {
    let mut cmd = Command::new(&cfg.program);
    cmd.args(cfg.args.iter().map(|s| s.as_str()));
    if let Some(cwd) = &cfg.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &cfg.env {
        cmd.env(k, v);
    }
    cmd.kill_on_drop(true);
    cmd
}

/// SIGTERM, then SIGKILL if the child is still alive after `grace`.
#[cfg(unix)]
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Some(id) = child.id()
        && let Ok(raw) = i32::try_from(id)
        && kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok()
    {
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            trace!(target: "tcd.exec.proc", pid = id, "child exited after SIGTERM");
            return Ok(());
        }
    }
    child.kill().await
}

#[cfg(not(unix))]
pub async fn kill_graceful(child: &mut Child, _grace: Duration) -> std::io::Result<()> {
    child.kill().await
}
