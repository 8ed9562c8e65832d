//! Concurrency-safe registry of port mappings.
//!
//! The table's lock is the sole serialization point for mapping metadata.
//! Every operation holds it only for the metadata critical section; relay
//! startup and teardown always happen outside.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use porthole_common::error::{PortholeError, Result};
use porthole_common::types::{PortId, PortSpec, PortStatus};

use crate::relay::RelayHandle;

/// Lifecycle state of a registered mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingState {
    /// ID reserved, relay startup in flight. Participates in uniqueness
    /// checks but is invisible to readers.
    Requested,
    /// Relay confirmed running.
    Active,
}

/// A registered mapping together with the handle needed to stop it.
#[derive(Debug)]
pub struct PortEntry {
    /// Plain-data view of the mapping.
    pub status: PortStatus,
    /// Lifecycle state.
    pub state: MappingState,
    /// Relay handle, present once the mapping is Active.
    pub relay: Option<RelayHandle>,
}

#[derive(Debug, Default)]
struct TableInner {
    next_id: u64,
    entries: BTreeMap<PortId, PortEntry>,
}

/// Registry mapping auto-assigned IDs to port mappings.
///
/// IDs start at 1 and are never reused within a process lifetime, even
/// after removal, so a stale ID can never alias a newer mapping.
#[derive(Debug, Default)]
pub struct PortTable {
    inner: RwLock<TableInner>,
}

impl PortTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves the next ID for `spec` and stores a Requested entry.
    ///
    /// The uniqueness check on `(proto, parent_ip, parent_port)` and the
    /// reservation are one atomic step under the write lock, so two
    /// concurrent inserts for colliding specs cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`PortholeError::PortInUse`] if any registered entry,
    /// Requested or Active, already claims the parent endpoint.
    pub fn insert(&self, spec: PortSpec) -> Result<PortId> {
        let mut inner = self.write();
        if inner
            .entries
            .values()
            .any(|e| e.status.spec.parent_endpoint() == spec.parent_endpoint())
        {
            return Err(PortholeError::PortInUse {
                proto: spec.proto,
                parent_ip: spec.parent_ip,
                parent_port: spec.parent_port,
            });
        }
        inner.next_id += 1;
        let id = PortId::new(inner.next_id);
        let _ = inner.entries.insert(
            id,
            PortEntry {
                status: PortStatus { id, spec },
                state: MappingState::Requested,
                relay: None,
            },
        );
        Ok(id)
    }

    /// Attaches the relay handle and flips the entry to Active.
    ///
    /// Returns `false` if the entry no longer exists; the handle is then
    /// dropped and its process reaped by kill-on-drop.
    pub fn commit(&self, id: PortId, handle: RelayHandle) -> bool {
        let mut inner = self.write();
        match inner.entries.get_mut(&id) {
            Some(entry) => {
                entry.relay = Some(handle);
                entry.state = MappingState::Active;
                true
            }
            None => false,
        }
    }

    /// Returns the status of an Active mapping.
    #[must_use]
    pub fn get(&self, id: PortId) -> Option<PortStatus> {
        self.read()
            .entries
            .get(&id)
            .filter(|e| e.state == MappingState::Active)
            .map(|e| e.status.clone())
    }

    /// Extracts an Active entry, relay handle included, so the caller can
    /// tear the relay down outside the lock.
    ///
    /// In-flight (Requested) entries are not removable; their fate is
    /// owned by the inserting caller.
    #[must_use]
    pub fn remove(&self, id: PortId) -> Option<PortEntry> {
        let mut inner = self.write();
        if inner
            .entries
            .get(&id)
            .is_some_and(|e| e.state == MappingState::Active)
        {
            inner.entries.remove(&id)
        } else {
            None
        }
    }

    /// Discards a tentative entry after a failed or cancelled startup.
    pub fn abort(&self, id: PortId) {
        let _ = self.write().entries.remove(&id);
    }

    /// Snapshot of all Active mappings in ascending ID order.
    ///
    /// Stable under concurrent modification: a copy, not a live view.
    #[must_use]
    pub fn list(&self) -> Vec<PortStatus> {
        self.read()
            .entries
            .values()
            .filter(|e| e.state == MappingState::Active)
            .map(|e| e.status.clone())
            .collect()
    }

    /// Removes and returns every entry, for driver shutdown.
    #[must_use]
    pub fn drain(&self) -> Vec<PortEntry> {
        let mut inner = self.write();
        std::mem::take(&mut inner.entries).into_values().collect()
    }
}
