//! Relay backend spawning one `socat` process per port mapping.
//!
//! The parent-side address listens on `parent_ip:parent_port` in the
//! driver's own namespace; the child-side address is an `EXEC:` clause
//! that re-enters the child's user+network namespaces through `nsenter`
//! and connects a second `socat` to `127.0.0.1:child_port`. TCP listeners
//! `fork`, so concurrent connections are never serialized.

use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use porthole_common::config::ForwardConfig;
use porthole_common::error::{PortholeError, Result};
use porthole_common::types::{PortSpec, Proto};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{RelayBackend, RelayHandle};

/// Marker socat prints when the parent-side bind loses a race for the
/// address, used to classify early exits.
const BIND_CONFLICT_MARKER: &str = "Address already in use";

/// `socat`-based relay backend.
#[derive(Debug, Clone)]
pub struct SocatRelay {
    config: ForwardConfig,
}

impl SocatRelay {
    /// Creates a backend with the given tool paths and timing.
    #[must_use]
    pub fn new(config: ForwardConfig) -> Self {
        Self { config }
    }

    /// Builds the two socat address arguments for a mapping.
    ///
    /// # Errors
    ///
    /// Returns [`PortholeError::InvalidSpec`] for non-IPv4 parent
    /// addresses; the relay command line is IPv4-only.
    fn socat_args(&self, spec: &PortSpec, child_pid: u32) -> Result<Vec<String>> {
        let IpAddr::V4(parent_ip) = spec.parent_ip else {
            return Err(PortholeError::InvalidSpec {
                message: format!("parent IP must be IPv4: {}", spec.parent_ip),
            });
        };

        let socat = self.config.socat_path.display().to_string();
        let mut child_side = vec![self.config.nsenter_path.display().to_string()];
        child_side.extend(porthole_nsenter::nsenter_args(child_pid));
        child_side.push(socat);
        child_side.push("STDIN".into());
        let listen = match spec.proto {
            Proto::Tcp => {
                child_side.push(format!("TCP4:127.0.0.1:{}", spec.child_port));
                format!(
                    "TCP4-LISTEN:{},bind={parent_ip},reuseaddr,fork",
                    spec.parent_port
                )
            }
            Proto::Udp => {
                child_side.push(format!("UDP4:127.0.0.1:{}", spec.child_port));
                format!("UDP4-LISTEN:{},bind={parent_ip},reuseaddr", spec.parent_port)
            }
        };
        Ok(vec![listen, format!("EXEC:\"{}\"", child_side.join(" "))])
    }
}

#[async_trait]
impl RelayBackend for SocatRelay {
    async fn start(&self, spec: &PortSpec, child_pid: u32) -> Result<RelayHandle> {
        let args = self.socat_args(spec, child_pid)?;
        tracing::debug!(%spec, child_pid, ?args, "spawning relay");

        let mut cmd = Command::new(&self.config.socat_path);
        let _ = cmd
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        porthole_nsenter::set_pdeathsig(&mut cmd);
        own_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| PortholeError::RelayStart {
            message: format!("failed to spawn {}: {e}", self.config.socat_path.display()),
        })?;
        let stderr = child.stderr.take();

        // Watch the relay for an early exit. A bind conflict on the
        // parent endpoint surfaces here; after the window the mapping is
        // reported open and the relay is on its own.
        match tokio::time::timeout(self.config.startup_window, child.wait()).await {
            Ok(waited) => {
                let output = match stderr {
                    Some(mut pipe) => {
                        let mut buf = Vec::new();
                        let _ = pipe.read_to_end(&mut buf).await;
                        String::from_utf8_lossy(&buf).trim().to_string()
                    }
                    None => String::new(),
                };
                let status = waited.map_err(|e| PortholeError::RelayStart {
                    message: format!("wait failed: {e}"),
                })?;
                tracing::debug!(%spec, %status, %output, "relay exited during startup");
                if output.contains(BIND_CONFLICT_MARKER) {
                    return Err(PortholeError::PortInUse {
                        proto: spec.proto,
                        parent_ip: spec.parent_ip,
                        parent_port: spec.parent_port,
                    });
                }
                Err(PortholeError::RelayStart {
                    message: format!("relay exited with {status}: {output}"),
                })
            }
            Err(_) => {
                if let Some(pipe) = stderr {
                    drain_to_log(spec.clone(), pipe);
                }
                tracing::debug!(%spec, pid = ?child.id(), "relay confirmed running");
                Ok(RelayHandle::from_child(child))
            }
        }
    }

    async fn stop(&self, handle: &mut RelayHandle, grace: Duration) -> Result<()> {
        handle.terminate(grace).await
    }

    fn is_available(&self) -> bool {
        which::which(&self.config.socat_path).is_ok()
            && which::which(&self.config.nsenter_path).is_ok()
    }
}

/// Forwards relay stderr lines into the diagnostic log for the lifetime
/// of the relay process.
fn drain_to_log(spec: PortSpec, pipe: tokio::process::ChildStderr) {
    let _task = tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(%spec, %line, "relay");
        }
    });
}

/// Puts the relay into its own process group so stop can take the forked
/// per-connection children down with it.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    unsafe {
        let _ = cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// No-op on platforms without process groups.
#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}
