//! Job bodies that run a shell command.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run `command` via `sh -c` until it exits or `cancel` fires.
///
/// On cancellation the child is sent SIGKILL. If the surrounding task is
/// aborted instead, `kill_on_drop` takes the child down with it.
pub async fn run_shell(job: String, command: String, cancel: CancellationToken) {
    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(%job, error = %e, "failed to spawn command");
            return;
        }
    };

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => info!(%job, "command finished"),
            Ok(status) => warn!(%job, code = ?status.code(), "command exited with failure"),
            Err(e) => warn!(%job, error = %e, "failed to wait for command"),
        },
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(%job, error = %e, "failed to kill command");
            } else {
                info!(%job, "command killed on stop");
            }
        }
    }
}
