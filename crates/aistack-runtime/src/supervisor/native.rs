//! Native process launcher.

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{Handle, Launched, ModuleSpec, RuntimeError, TaskContext, finish};

/// Spawn `command + args` with stdout and stderr appended to `log_file`.
pub(super) fn launch(
    spec: &ModuleSpec,
    log_file: File,
    log_path: &Path,
    ctx: &TaskContext,
) -> Result<Launched, RuntimeError> {
    let (program, leading) = spec
        .command
        .split_first()
        .ok_or(RuntimeError::MissingCommand)?;
    let stderr = log_file.try_clone().map_err(|source| RuntimeError::LogFile {
        path: log_path.to_path_buf(),
        source,
    })?;

    let mut command = Command::new(program);
    command
        .args(leading)
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(stderr));
    if let Some(dir) = &spec.work_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();

    let kill = CancellationToken::new();
    let (exited_tx, exited_rx) = watch::channel(false);
    let waiter = {
        let ctx = ctx.clone();
        let kill = kill.clone();
        async move {
            let error = match wait_for_exit(&mut child, &ctx.cancel_run, &kill).await {
                Ok(status) if status.success() => None,
                Ok(status) => Some(format!("process exited with {status}")),
                Err(e) => Some(format!("wait for process: {e}")),
            };
            finish(&ctx.table, &ctx.name, ctx.run_id, error);
            let _ = exited_tx.send(true);
        }
    };

    Ok(Launched {
        pid,
        container_id: None,
        handle: Handle::Native { kill },
        exited: exited_rx,
        last_error: None,
        background: vec![Box::pin(waiter)],
    })
}

/// Wait for the child.  `cancel` asks it to terminate; `kill` forces it.
async fn wait_for_exit(
    child: &mut Child,
    cancel: &CancellationToken,
    kill: &CancellationToken,
) -> io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => return status,
        _ = cancel.cancelled() => {}
    }
    terminate(child);

    tokio::select! {
        status = child.wait() => return status,
        _ = kill.cancelled() => {}
    }
    child.start_kill()?;
    child.wait().await
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // `None` once the child has been reaped.
    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to terminate process");
    }
}

/// Request termination and wait up to `timeout` for the exit watcher to
/// record it; on timeout the process is killed and an error returned.
pub(super) async fn stop(
    name: &str,
    cancel_run: &CancellationToken,
    kill: &CancellationToken,
    exited: &mut watch::Receiver<bool>,
    timeout: Duration,
) -> Result<(), RuntimeError> {
    cancel_run.cancel();
    let exited_in_time = tokio::time::timeout(timeout, exited.wait_for(|done| *done))
        .await
        .is_ok();
    if exited_in_time {
        return Ok(());
    }
    warn!(module = name, ?timeout, "process ignored SIGTERM, killing");
    kill.cancel();
    Err(RuntimeError::StopTimeout {
        name: name.to_string(),
        timeout,
    })
}
