//! Protocol modules.
//!
//! - `envelope`: the `{sentinel, cmd, payload}` frame carried over window
//!   messaging and message ports, plus typed payloads.
//! - `request` / `result`: the values exchanged at connect and at completion.
//! - `fragment`: URL fragment encoding used by the redirect transport.
//!
//! Parsers never panic: malformed input is either dropped (`Option`) or
//! reported as `ActivityError`.

pub mod envelope;
pub mod fragment;
pub mod request;
pub mod result;
