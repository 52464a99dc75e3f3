//! JSON test vector loader shared by the envelope tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct FrameVector {
    pub description: String,
    /// `window` frames need the sentinel, `port` frames do not.
    pub lane: String,
    pub frame: serde_json::Value,
    #[serde(default)]
    pub expect: Option<ExpectFrame>,
}

#[derive(Debug, Deserialize)]
pub struct ExpectFrame {
    pub cmd: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

pub fn load(name: &str) -> FrameVector {
    let s = std::fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}
