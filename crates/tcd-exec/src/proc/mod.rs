use std::{path::PathBuf, process::Stdio, time::Duration};

use serde::{Deserialize, Serialize};
use tcd_core::{TaskHandle, TaskRunner, WorkContext, WorkError, WorkResult};
use tcd_model::Progress;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tracing::{debug, trace};

use crate::{
    error::ExecError,
    util::{command_for, kill_graceful},
};

mod shell;

fn default_fail_on_non_zero() -> bool {
    true
}

fn default_kill_grace() -> Duration {
    Duration::from_secs(2)
}

/// External command run as a task body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Return an error if the exit code is not 0.
    #[serde(default = "default_fail_on_non_zero")]
    pub fail_on_non_zero: bool,
    /// How long a cancelled child gets between SIGTERM and SIGKILL.
    #[serde(skip, default = "default_kill_grace")]
    pub kill_grace: Duration,
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            fail_on_non_zero: default_fail_on_non_zero(),
            kill_grace: default_kill_grace(),
        }
    }
}

impl ProcConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn fail_on_non_zero(mut self, fail: bool) -> Self {
        self.fail_on_non_zero = fail;
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Task name used by [`submit_command`]: the program's file name.
    pub fn task_name(&self) -> String {
        std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
            .to_string()
    }
}

/// What a finished command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the child was killed by a signal.
    pub code: Option<i32>,
    /// Every non-blank output line, stdout and stderr merged in arrival order.
    pub lines: Vec<String>,
}

fn segments<R: AsyncRead + Unpin>(stream: R) -> Split<BufReader<R>> {
    BufReader::new(stream).split(b'\n')
}

/// Splits one raw output line on `\r` (terminal progress redraws) and drops blank pieces.
fn pieces(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split('\r')
        .map(str::trim_end)
        .filter(|piece| !piece.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn record(ctx: &WorkContext, lines: &mut Vec<String>, raw: &[u8]) {
    for line in pieces(raw) {
        lines.push(line.clone());
        ctx.report(Progress::new(lines.len() as u64).with_message(line));
    }
}

/// Runs `cfg` to completion inside a task body.
///
/// stdout and stderr are merged; each non-blank line (also each `\r`-separated redraw) is
/// reported as progress (completed units = lines so far, message = the line). Cancellation
/// kills the child and yields [`WorkError::Cancelled`].
pub async fn run_command(cfg: &ProcConfig, ctx: &WorkContext) -> WorkResult<CommandOutput> {
    if cfg.program.trim().is_empty() {
        return Err(ExecError::MissingProgram.into());
    }
    ctx.check_cancelled()?;

    trace!(target: "tcd.exec.proc", task = %ctx.id(), program = %cfg.program, args = ?cfg.args, "spawn");

    let mut cmd = command_for(cfg);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: cfg.program.clone(),
        source,
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        ExecError::Io(std::io::Error::other("child stdout was not captured"))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        ExecError::Io(std::io::Error::other("child stderr was not captured"))
    })?;
    let mut out = segments(stdout);
    let mut err = segments(stderr);

    let mut lines = Vec::new();
    let (mut out_open, mut err_open) = (true, true);

    let status = loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                debug!(target: "tcd.exec.proc", task = %ctx.id(), "cancelled; killing child");
                kill_graceful(&mut child, cfg.kill_grace).await.map_err(ExecError::Io)?;
                return Err(WorkError::Cancelled);
            }
            raw = out.next_segment(), if out_open => {
                match raw.map_err(ExecError::Io)? {
                    Some(raw) => record(ctx, &mut lines, &raw),
                    None => out_open = false,
                }
            }
            raw = err.next_segment(), if err_open => {
                match raw.map_err(ExecError::Io)? {
                    Some(raw) => record(ctx, &mut lines, &raw),
                    None => err_open = false,
                }
            }
            status = child.wait(), if !out_open && !err_open => {
                break status.map_err(ExecError::Io)?;
            }
        }
    };

    if !status.success() && cfg.fail_on_non_zero {
        let err = match status.code() {
            Some(code) => ExecError::NonZeroExit { code },
            None => ExecError::KilledBySignal,
        };
        debug!(target: "tcd.exec.proc", task = %ctx.id(), error = %err, "command failed");
        return Err(err.into());
    }

    debug!(target: "tcd.exec.proc", task = %ctx.id(), code = ?status.code(), lines = lines.len(), "exit");
    Ok(CommandOutput {
        code: status.code(),
        lines,
    })
}

/// Submits `cfg` as an async task named after the program.
pub fn submit_command(runner: &TaskRunner, cfg: ProcConfig) -> TaskHandle<CommandOutput> {
    let name = cfg.task_name();
    runner.submit_async(name, move |ctx| async move { run_command(&cfg, &ctx).await })
}
