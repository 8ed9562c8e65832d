//! Configuration model for the forwarding driver.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the relay-based forwarding driver.
///
/// The defaults match a stock Linux install with util-linux and socat on
/// `PATH`; embedders with vendored tools override the paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Path or name of the relay binary.
    pub socat_path: PathBuf,
    /// Path or name of the namespace entry binary.
    pub nsenter_path: PathBuf,
    /// Window in which an early relay exit is surfaced to the caller.
    pub startup_window: Duration,
    /// Grace period before a stubborn relay is SIGKILLed.
    pub stop_grace: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            socat_path: PathBuf::from(crate::constants::SOCAT_BIN),
            nsenter_path: PathBuf::from(crate::constants::NSENTER_BIN),
            startup_window: crate::constants::RELAY_STARTUP_WINDOW,
            stop_grace: crate::constants::RELAY_STOP_GRACE,
        }
    }
}
