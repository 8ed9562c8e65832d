//! Shared harness for integration tests: spawns a throwaway user+network
//! namespace and in-namespace listeners, and probes for the external
//! tools the relay path needs. Tests call [`have_tools`] first and bail
//! out quietly on hosts that cannot run the real relay.

use std::process::Stdio;
use std::time::Duration;

use porthole_common::types::Proto;
use tokio::process::Child;

/// Installs the diagnostic log sink for the test run. Safe to call from
/// every test; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Whether every listed binary is on `PATH`.
pub fn have_tools(tools: &[&str]) -> bool {
    tools.iter().all(|tool| which::which(tool).is_ok())
}

/// A process holding open a fresh user+network namespace.
pub struct ChildNamespace {
    child: Child,
    pid: u32,
}

impl ChildNamespace {
    /// PID whose namespaces the driver forwards into.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Tears the namespace down.
    pub async fn close(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Creates a user+network namespace owned by an unprivileged `unshare`
/// child and brings its loopback interface up. Returns `None` where
/// unprivileged user namespaces are unavailable.
pub async fn spawn_namespace() -> Option<ChildNamespace> {
    let mut cmd = tokio::process::Command::new("unshare");
    let _ = cmd
        .args(["-r", "-n", "sleep", "300"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    porthole_nsenter::set_pdeathsig(&mut cmd);

    let child = cmd.spawn().ok()?;
    let pid = child.id()?;

    // unshare may not have entered its namespaces yet when we first try
    // to join them; retry briefly before giving up on the host.
    let lo_up: Vec<String> = ["ip", "link", "set", "lo", "up"]
        .iter()
        .map(ToString::to_string)
        .collect();
    for _ in 0..20 {
        if porthole_nsenter::enter_and_run(pid, &lo_up).await.is_ok() {
            return Some(ChildNamespace { child, pid });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

/// Starts `nc` listening on `port` inside the namespace of `pid`, with
/// stdout piped so the test can read what the listener received.
pub async fn spawn_listener(pid: u32, proto: Proto, port: u16) -> Option<Child> {
    let mut argv = vec!["nc".to_string()];
    if proto == Proto::Udp {
        argv.push("-u".into());
    }
    argv.push("-l".into());
    argv.push(port.to_string());

    let line = porthole_nsenter::command_line(pid, &argv);
    let mut cmd = tokio::process::Command::new(&line[0]);
    let _ = cmd
        .args(&line[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    porthole_nsenter::set_pdeathsig(&mut cmd);
    cmd.spawn().ok()
}

/// Whether any process on the host has `marker` in its command line.
/// Used to check relay liveness from outside the driver.
pub fn relay_running(marker: &str) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    for entry in entries.flatten() {
        let cmdline = entry.path().join("cmdline");
        if let Ok(bytes) = std::fs::read(&cmdline) {
            if String::from_utf8_lossy(&bytes).replace('\0', " ").contains(marker) {
                return true;
            }
        }
    }
    false
}
