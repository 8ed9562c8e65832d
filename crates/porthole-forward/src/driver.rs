//! Parent driver: the surface the control layer talks to.
//!
//! Orchestrates the port table and the relay backend. Each mapping moves
//! through `Requested → Active → Removed` with no automatic retries; a
//! failed or cancelled startup rolls the tentative reservation back, so
//! the table never lists a mapping without a running relay.

use std::sync::OnceLock;

use async_trait::async_trait;
use porthole_common::config::ForwardConfig;
use porthole_common::error::{PortholeError, Result};
use porthole_common::types::{PortId, PortSpec, PortStatus};

use crate::relay::RelayBackend;
use crate::relay::socat::SocatRelay;
use crate::table::PortTable;

/// Driver contract consumed by the control-socket layer.
///
/// All arguments and results are plain data; transport concerns live
/// entirely in the caller. Operations are safe to invoke from any number
/// of concurrent tasks, and dropping an in-flight call cancels it without
/// leaking a table entry or a relay process.
#[async_trait]
pub trait ParentDriver: Send + Sync {
    /// Binds the driver to the isolated child process. Callable once per
    /// driver lifetime.
    ///
    /// # Errors
    ///
    /// [`PortholeError::AlreadyConfigured`] on a second call; relaying
    /// into a stale namespace is never done silently.
    fn set_child_pid(&self, pid: u32) -> Result<()>;

    /// Validates `spec`, reserves an ID, starts a relay, and returns the
    /// activated mapping.
    ///
    /// # Errors
    ///
    /// [`PortholeError::ChildPidNotSet`] before [`Self::set_child_pid`];
    /// [`PortholeError::InvalidSpec`] on validation failure (no state is
    /// touched); [`PortholeError::PortInUse`] when the parent endpoint is
    /// taken, by a registered mapping or at OS level;
    /// [`PortholeError::RelayStart`] when the relay cannot be confirmed
    /// running. Failures leave no table entry behind.
    async fn add_port(&self, spec: PortSpec) -> Result<PortStatus>;

    /// Stops the mapping's relay and frees its table slot.
    ///
    /// # Errors
    ///
    /// [`PortholeError::NotFound`] for unknown or already-removed IDs.
    /// Relay teardown errors are surfaced, but the entry is removed
    /// regardless: a mapping the driver can no longer control must not
    /// stay listed as active.
    async fn remove_port(&self, id: PortId) -> Result<()>;

    /// Snapshot of all Active mappings in ascending ID order.
    fn list_ports(&self) -> Vec<PortStatus>;

    /// Stops every active relay and empties the table.
    ///
    /// # Errors
    ///
    /// Teardown continues past individual failures; the first error is
    /// surfaced after every relay has been attempted.
    async fn shutdown(&self) -> Result<()>;
}

/// Relay-process-based [`ParentDriver`] implementation.
pub struct RelayDriver {
    backend: Box<dyn RelayBackend>,
    table: PortTable,
    child_pid: OnceLock<u32>,
    config: ForwardConfig,
}

impl RelayDriver {
    /// Creates a driver over an arbitrary relay backend.
    #[must_use]
    pub fn new(backend: Box<dyn RelayBackend>, config: ForwardConfig) -> Self {
        if !backend.is_available() {
            tracing::warn!("relay backend tooling not found on this host");
        }
        Self {
            backend,
            table: PortTable::new(),
            child_pid: OnceLock::new(),
            config,
        }
    }

    /// Convenience constructor for the socat backend.
    #[must_use]
    pub fn socat(config: ForwardConfig) -> Self {
        let backend = SocatRelay::new(config.clone());
        Self::new(Box::new(backend), config)
    }

    fn child_pid(&self) -> Result<u32> {
        self.child_pid
            .get()
            .copied()
            .ok_or(PortholeError::ChildPidNotSet)
    }
}

/// Rollback guard for the window between ID reservation and relay commit.
///
/// Dropping it, whether on error return or future cancellation, discards the
/// tentative table entry.
struct Tentative<'a> {
    table: &'a PortTable,
    id: Option<PortId>,
}

impl Tentative<'_> {
    fn defuse(mut self) {
        self.id = None;
    }
}

impl Drop for Tentative<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.table.abort(id);
            tracing::debug!(%id, "rolled back tentative port mapping");
        }
    }
}

/// Local validation: protocol is typed, so only port ranges and the
/// address family can be wrong.
fn validate_spec(spec: &PortSpec) -> Result<()> {
    if spec.parent_port == 0 {
        return Err(PortholeError::InvalidSpec {
            message: "parent port must be in 1-65535".into(),
        });
    }
    if spec.child_port == 0 {
        return Err(PortholeError::InvalidSpec {
            message: "child port must be in 1-65535".into(),
        });
    }
    if !spec.parent_ip.is_ipv4() {
        return Err(PortholeError::InvalidSpec {
            message: format!("parent IP must be IPv4: {}", spec.parent_ip),
        });
    }
    Ok(())
}

#[async_trait]
impl ParentDriver for RelayDriver {
    fn set_child_pid(&self, pid: u32) -> Result<()> {
        match self.child_pid.set(pid) {
            Ok(()) => {
                tracing::info!(pid, "child pid configured");
                Ok(())
            }
            Err(_) => Err(PortholeError::AlreadyConfigured {
                current: self.child_pid.get().copied().unwrap_or(pid),
            }),
        }
    }

    async fn add_port(&self, spec: PortSpec) -> Result<PortStatus> {
        let child_pid = self.child_pid()?;
        validate_spec(&spec)?;

        // Uniqueness check and ID reservation are one atomic step; the
        // slow relay startup happens outside the table lock so disjoint
        // adds never serialize on each other.
        let id = self.table.insert(spec.clone())?;
        let tentative = Tentative {
            table: &self.table,
            id: Some(id),
        };

        let handle = self.backend.start(&spec, child_pid).await?;
        if !self.table.commit(id, handle) {
            return Err(PortholeError::NotFound { id });
        }
        tentative.defuse();
        tracing::info!(%id, %spec, child_pid, "port mapping active");
        Ok(PortStatus { id, spec })
    }

    async fn remove_port(&self, id: PortId) -> Result<()> {
        let mut entry = self
            .table
            .remove(id)
            .ok_or(PortholeError::NotFound { id })?;
        tracing::info!(%id, spec = %entry.status.spec, "removing port mapping");
        if let Some(mut relay) = entry.relay.take() {
            self.backend.stop(&mut relay, self.config.stop_grace).await?;
        }
        Ok(())
    }

    fn list_ports(&self) -> Vec<PortStatus> {
        self.table.list()
    }

    async fn shutdown(&self) -> Result<()> {
        let entries = self.table.drain();
        tracing::info!(count = entries.len(), "driver shutdown, stopping relays");
        let mut first_err = None;
        for mut entry in entries {
            if let Some(mut relay) = entry.relay.take() {
                if let Err(e) = self.backend.stop(&mut relay, self.config.stop_grace).await {
                    tracing::warn!(id = %entry.status.id, error = %e, "relay stop failed");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
