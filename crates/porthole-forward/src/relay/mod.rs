//! Relay process lifecycle.
//!
//! A relay is the helper that copies bytes between the parent-namespace
//! listening socket and the child-namespace socket of one port mapping.
//! [`RelayBackend`] is the seam between the driver and interchangeable
//! forwarding implementations; [`SocatRelay`](socat::SocatRelay) is the
//! concrete process-spawning one.

pub mod socat;

use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use porthole_common::error::{PortholeError, Result};
use porthole_common::types::PortSpec;
use tokio::process::Child;

/// One mapping's data path, selected at driver construction time.
///
/// `start` is fail-fast: no retries, errors reported to the caller (the
/// driver decides policy). A relay that dies after a successful start is
/// not monitored here; its exit status stays queryable through the
/// returned handle so a supervisor can be layered on later.
#[async_trait]
pub trait RelayBackend: Send + Sync {
    /// Establishes the data path for `spec` against the child namespace
    /// owned by `child_pid`.
    ///
    /// # Errors
    ///
    /// [`PortholeError::PortInUse`] when the parent-side bind fails,
    /// [`PortholeError::RelayStart`] for any other spawn or startup
    /// failure.
    async fn start(&self, spec: &PortSpec, child_pid: u32) -> Result<RelayHandle>;

    /// Terminates the relay and waits for it to exit. Idempotent:
    /// stopping an already-stopped handle is a no-op.
    ///
    /// # Errors
    ///
    /// [`PortholeError::RelayStop`] if the process cannot be signalled
    /// or reaped.
    async fn stop(&self, handle: &mut RelayHandle, grace: Duration) -> Result<()>;

    /// Whether this backend's tooling is operational on the current host.
    fn is_available(&self) -> bool;
}

/// Handle to the relay of one port mapping (0 or 1 OS processes).
#[derive(Debug)]
pub struct RelayHandle {
    child: Option<Child>,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
}

impl RelayHandle {
    /// Wraps a spawned relay process.
    #[must_use]
    pub fn from_child(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
            exit: None,
        }
    }

    /// Handle for a backend whose data path has no helper process of its
    /// own (e.g. an in-process user-mode network stack).
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            child: None,
            pid: None,
            exit: None,
        }
    }

    /// OS PID of the relay process, if one exists and was not yet reaped.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness probe: the exit status if the relay has
    /// terminated, `None` while it is still running.
    pub fn try_status(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    self.exit = Some(status);
                }
            }
        }
        self.exit
    }

    /// Whether the relay process is still running.
    pub fn is_running(&mut self) -> bool {
        self.child.is_some() && self.try_status().is_none()
    }

    /// SIGTERMs the relay's process group, escalating to SIGKILL after
    /// `grace`. No-op for detached or already-reaped handles.
    pub(crate) async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let Some(pid) = self.pid else {
            return Ok(());
        };

        // The relay runs in its own process group, so forked
        // per-connection children go down with it.
        signal_relay(pid, Signal::SIGTERM);
        let status = match tokio::time::timeout(grace, child.wait()).await {
            Ok(waited) => waited.map_err(|e| PortholeError::RelayStop {
                message: format!("wait failed for pid {pid}: {e}"),
            })?,
            Err(_) => {
                tracing::warn!(pid, "relay ignored SIGTERM, killing");
                signal_relay(pid, Signal::SIGKILL);
                child.wait().await.map_err(|e| PortholeError::RelayStop {
                    message: format!("wait failed for pid {pid}: {e}"),
                })?
            }
        };
        self.exit = Some(status);
        tracing::debug!(pid, %status, "relay stopped");
        Ok(())
    }
}

/// Signals the relay's process group, falling back to the process itself
/// when it is not a group leader. Tolerates processes that already exited.
fn signal_relay(pid: u32, signal: Signal) {
    #[allow(clippy::cast_possible_wrap)]
    let target = Pid::from_raw(pid as i32);
    if killpg(target, signal).is_err() {
        if let Err(errno) = kill(target, signal) {
            tracing::debug!(pid, %signal, %errno, "relay signal not delivered");
        }
    }
}
