//! Top-level facade crate for activities.
//!
//! Re-exports the wire contracts and the host runtime so users can depend on a single crate.

pub mod core {
    pub use activities_core::*;
}

pub mod host {
    pub use activities_host::*;
}

pub use activities_core::{ActivityError, ActivityMode, ActivityRequest, ActivityResult, ActivityResultCode, Result};
pub use activities_host::host::{ActivityHost, HostRef, RequestInput};
pub use activities_host::port::{ActivityPort, PortRef};
pub use activities_host::{ActivityHosts, ActivityPorts};
