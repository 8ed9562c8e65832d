//! Namespace entry helper.
//!
//! Runs a command inside the user and network namespaces of another
//! process, preserving the caller's credentials, via `nsenter(1)`. Pure
//! utility: one function call spawns one short-lived child, captures its
//! output, and never leaks it.
//!
//! The argv builders are also used standalone to embed the namespace-join
//! semantics into a larger command line (the relay backend composes its
//! child-side endpoint this way).

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

use porthole_common::constants::NSENTER_BIN;
use porthole_common::error::{PortholeError, Result};

/// Flags passed to `nsenter` to join the target's user and network
/// namespaces while keeping the caller's effective credentials.
#[must_use]
pub fn nsenter_args(pid: u32) -> Vec<String> {
    vec![
        "-U".into(),
        "--preserve-credentials".into(),
        "-n".into(),
        "-t".into(),
        pid.to_string(),
    ]
}

/// Full argv (including the `nsenter` binary itself) that runs `argv`
/// inside the namespaces of `pid`.
#[must_use]
pub fn command_line(pid: u32, argv: &[String]) -> Vec<String> {
    let mut line = vec![NSENTER_BIN.to_string()];
    line.extend(nsenter_args(pid));
    line.extend(argv.iter().cloned());
    line
}

/// Arranges for the child to receive SIGKILL when the spawning thread's
/// process dies, so helpers cannot outlive the driver.
#[cfg(target_os = "linux")]
pub fn set_pdeathsig(cmd: &mut tokio::process::Command) {
    unsafe {
        let _ = cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// No-op on platforms without `prctl`.
#[cfg(not(target_os = "linux"))]
pub fn set_pdeathsig(_cmd: &mut tokio::process::Command) {}

/// Executes `argv` inside the user+network namespaces of process `pid`
/// and returns its combined stdout and stderr.
///
/// # Errors
///
/// Returns [`PortholeError::NamespaceEntry`] if `pid` no longer exists,
/// the namespaces cannot be joined, the command cannot be started, or it
/// exits non-zero. The spawned helper is reaped in every case.
#[cfg(target_os = "linux")]
pub async fn enter_and_run(pid: u32, argv: &[String]) -> Result<Vec<u8>> {
    use std::process::Stdio;

    if argv.is_empty() {
        return Err(PortholeError::NamespaceEntry {
            pid,
            message: "empty command".into(),
        });
    }
    if !std::path::Path::new(&format!("/proc/{pid}")).exists() {
        return Err(PortholeError::NamespaceEntry {
            pid,
            message: "target process does not exist".into(),
        });
    }

    tracing::debug!(pid, cmd = ?argv, "entering namespaces");

    let mut cmd = tokio::process::Command::new(NSENTER_BIN);
    let _ = cmd
        .args(nsenter_args(pid))
        .args(argv)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    set_pdeathsig(&mut cmd);

    let output = cmd
        .output()
        .await
        .map_err(|e| PortholeError::NamespaceEntry {
            pid,
            message: format!("failed to run {NSENTER_BIN}: {e}"),
        })?;

    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);

    if !output.status.success() {
        return Err(PortholeError::NamespaceEntry {
            pid,
            message: format!(
                "{NSENTER_BIN} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&combined).trim()
            ),
        });
    }
    Ok(combined)
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always fails; namespace entry requires the Linux kernel.
#[cfg(not(target_os = "linux"))]
pub async fn enter_and_run(pid: u32, _argv: &[String]) -> Result<Vec<u8>> {
    Err(PortholeError::NamespaceEntry {
        pid,
        message: "namespace entry requires Linux".into(),
    })
}
