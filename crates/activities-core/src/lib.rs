//! Activities core: runtime-free wire contracts for the activity protocol.
//!
//! This crate defines the command envelope, the request/result value objects,
//! the fragment codec used by redirect mode, and the error surface shared by
//! the host runtime and embedders. It carries no runtime dependencies so the
//! same codecs can back both sides of a connection.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed frames
//! and requests surface as `ActivityError` instead of crashing the embedder.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ActivityError, ErrorCode, Result};
pub use protocol::{
    envelope::{Command, Envelope, SENTINEL},
    fragment,
    request::{parse_request, serialize_request, ActivityRequest},
    result::{ActivityMode, ActivityResult, ActivityResultCode, RedirectResponse, ResultError},
};
