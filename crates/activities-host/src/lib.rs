//! Activities host runtime.
//!
//! This crate wires the window seam, message ports, the messenger transport,
//! the three activity hosts, and the client ports into a tokio-based
//! stack. It is consumed by the demo binary (`main.rs`), by embedders, and
//! by integration tests.

pub mod channel;
pub mod config;
pub mod env;
pub mod host;
pub mod hosts;
pub mod messenger;
pub mod port;

mod sync;

pub use hosts::ActivityHosts;
pub use port::ActivityPorts;
