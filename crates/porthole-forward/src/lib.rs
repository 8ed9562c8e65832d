//! Port-forwarding core for processes isolated in user+network namespaces.
//!
//! Exposes TCP/UDP services listening inside a child namespace on ports
//! reachable from the parent namespace. One relay process per mapping
//! copies bytes across the namespace boundary; the [`driver`] module is
//! the only surface a control layer talks to.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod driver;
pub mod relay;
pub mod table;

pub use driver::{ParentDriver, RelayDriver};
