//! System-wide constants and defaults.

use std::time::Duration;

/// Relay tool spawned once per port mapping.
pub const SOCAT_BIN: &str = "socat";

/// Namespace entry tool used to reach the child-side endpoint.
pub const NSENTER_BIN: &str = "nsenter";

/// How long a freshly spawned relay is watched for an early exit before
/// the mapping is reported open. A bind conflict on the parent endpoint
/// surfaces within this window.
pub const RELAY_STARTUP_WINDOW: Duration = Duration::from_millis(500);

/// Grace period between SIGTERM and SIGKILL when stopping a relay.
pub const RELAY_STOP_GRACE: Duration = Duration::from_secs(2);

/// Application name used in diagnostics.
pub const APP_NAME: &str = "porthole";
