//! Unified error types for the Porthole workspace.
//!
//! Every fallible operation in the port-forwarding core returns one of
//! these variants; nothing here is fatal to the embedding process.

use std::net::IpAddr;

use thiserror::Error;

use crate::types::{PortId, Proto};

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum PortholeError {
    /// A port spec failed local validation (protocol, port range, address
    /// family). Reported before any state is touched.
    #[error("invalid port spec: {message}")]
    InvalidSpec {
        /// Description of the rejected field.
        message: String,
    },

    /// The parent-side endpoint is already taken, either by a registered
    /// mapping or by an OS-level bind conflict reported by the relay.
    #[error("{proto} {parent_ip}:{parent_port} is already in use")]
    PortInUse {
        /// Protocol of the conflicting endpoint.
        proto: Proto,
        /// Parent-namespace address of the conflicting endpoint.
        parent_ip: IpAddr,
        /// Parent-namespace port of the conflicting endpoint.
        parent_port: u16,
    },

    /// The relay process could not be spawned or confirmed running.
    #[error("relay failed to start: {message}")]
    RelayStart {
        /// Spawn error or relay output captured before it exited.
        message: String,
    },

    /// The relay process could not be terminated or reaped cleanly.
    ///
    /// Surfaced to the caller, but the mapping's table entry is removed
    /// regardless (best-effort cleanup).
    #[error("relay teardown failed: {message}")]
    RelayStop {
        /// Signal or wait error description.
        message: String,
    },

    /// The target process's namespaces could not be entered.
    #[error("cannot enter namespaces of pid {pid}: {message}")]
    NamespaceEntry {
        /// PID whose namespaces were targeted.
        pid: u32,
        /// Reason the entry failed (process gone, join refused, exec failed).
        message: String,
    },

    /// No mapping is registered under the given ID.
    #[error("no such port mapping: {id}")]
    NotFound {
        /// The unknown identifier.
        id: PortId,
    },

    /// The child PID was already set for this driver instance.
    #[error("child pid already configured (current: {current})")]
    AlreadyConfigured {
        /// The PID the driver is bound to.
        current: u32,
    },

    /// A port operation was attempted before the child PID was set.
    #[error("child pid is not set")]
    ChildPidNotSet,
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PortholeError>;
