use crate::traits::CommandExecutor;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// Runs commands through `sh -c`.
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str, timeout: Duration) -> String {
        trace!(command, "executing");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down the whole pipeline
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "failed to spawn shell");
                return String::new();
            }
        };
        let pgid = child.id();

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            Ok(Ok(output)) => {
                debug!(status = ?output.status, command, "command exited with failure");
                String::new()
            }
            Ok(Err(e)) => {
                debug!(error = %e, command, "command failed");
                String::new()
            }
            Err(_) => {
                debug!(?timeout, command, "command timed out");
                if let Some(pgid) = pgid {
                    kill_group(pgid);
                }
                String::new()
            }
        }
    }
}

/// SIGKILL every process in the group led by `pgid` (sh plus its pipeline).
#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only signals that process group
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        trace!(pgid, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}
