//! Escalating child process shutdown

use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// Default wait after each shutdown step
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// The step that ended the process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownStep {
    /// Nothing to do
    AlreadyExited,
    /// SIGINT: the server's own graceful shutdown
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGKILL (the only step on non-unix targets)
    Kill,
}

/// Stop `child`, escalating SIGINT → SIGTERM → SIGKILL
///
/// Each signal gets `step_timeout` to take effect. The child is reaped
/// before this returns, so its PID is gone afterwards.
pub async fn terminate_child(child: &mut Child, step_timeout: Duration) -> ShutdownStep {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(?status, "Process already exited");
        return ShutdownStep::AlreadyExited;
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::Signal;

            for (signal, step) in [
                (Signal::SIGINT, ShutdownStep::Interrupt),
                (Signal::SIGTERM, ShutdownStep::Terminate),
            ] {
                if let Err(err) = send_signal(pid, signal) {
                    warn!(pid, %signal, error = %err, "Failed to signal process");
                    continue;
                }
                if tokio::time::timeout(step_timeout, child.wait()).await.is_ok() {
                    debug!(pid, %signal, "Process exited");
                    return step;
                }
                warn!(pid, %signal, "Process ignored signal, escalating");
            }
        }
    }

    if let Err(err) = child.kill().await {
        warn!(pid = child.id(), error = %err, "Failed to kill process");
    }
    ShutdownStep::Kill
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| nix::errno::Errno::ESRCH)?;
    nix::sys::signal::kill(Pid::from_raw(raw), signal)
}

/// Whether a process with `pid` still exists
#[cfg(unix)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    use nix::unistd::Pid;

    i32::try_from(pid)
        .ok()
        .is_some_and(|raw| nix::sys::signal::kill(Pid::from_raw(raw), None).is_ok())
}
