//! Domain primitive types used across the Porthole workspace.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    /// Stream forwarding; each accepted connection gets its own relay path.
    Tcp,
    /// Datagram forwarding.
    Udp,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Proto {
    type Err = crate::error::PortholeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(crate::error::PortholeError::InvalidSpec {
                message: format!("unknown protocol: {other}"),
            }),
        }
    }
}

/// Identifier of a registered port mapping.
///
/// IDs are positive, assigned monotonically by the port table, and never
/// reused within a process lifetime, so a stale ID can never alias a
/// newer mapping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PortId(u64);

impl PortId {
    /// Wraps a raw identifier value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied description of one forwarding rule.
///
/// Field names follow the control-API wire format (`parentIP` etc.), so
/// the struct serializes directly into RPC payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    /// Transport protocol.
    pub proto: Proto,
    /// Address to bind in the parent namespace.
    #[serde(rename = "parentIP")]
    pub parent_ip: IpAddr,
    /// Port to listen on in the parent namespace (1–65535).
    pub parent_port: u16,
    /// Port to connect to on 127.0.0.1 inside the child namespace (1–65535).
    pub child_port: u16,
}

impl PortSpec {
    /// Returns the parent-side endpoint key used for uniqueness checks.
    ///
    /// Two mappings conflict exactly when they agree on this tuple.
    #[must_use]
    pub const fn parent_endpoint(&self) -> (Proto, IpAddr, u16) {
        (self.proto, self.parent_ip, self.parent_port)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}->{}",
            self.proto, self.parent_ip, self.parent_port, self.child_port
        )
    }
}

/// Registered state of a port mapping, as exposed past the driver boundary.
///
/// Plain data only; the process handle backing the relay stays inside the
/// driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortStatus {
    /// Identifier assigned when the mapping became active.
    pub id: PortId,
    /// The spec the mapping was created from.
    #[serde(flatten)]
    pub spec: PortSpec,
}
