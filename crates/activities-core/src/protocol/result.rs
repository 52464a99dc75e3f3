//! Activity result and the redirect-mode response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ActivityError;

/// Transport the activity ran over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityMode {
    Iframe,
    Popup,
    Redirect,
}

impl ActivityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityMode::Iframe => "iframe",
            ActivityMode::Popup => "popup",
            ActivityMode::Redirect => "redirect",
        }
    }
}

/// Terminal outcome of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityResultCode {
    Ok,
    Canceled,
    Failed,
}

impl ActivityResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityResultCode::Ok => "ok",
            ActivityResultCode::Canceled => "canceled",
            ActivityResultCode::Failed => "failed",
        }
    }
}

/// Failure reported by the host, rebuilt on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ResultError {
    pub message: String,
}

/// Result of an activity as seen by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityResult {
    code: ActivityResultCode,
    data: Option<Value>,
    mode: ActivityMode,
    origin: String,
    origin_verified: bool,
    secure_channel: bool,
    error: Option<ResultError>,
}

impl ActivityResult {
    /// `data` is kept only for `Ok`; a `Failed` result turns it into `error()`.
    pub fn new(
        code: ActivityResultCode,
        data: Option<Value>,
        mode: ActivityMode,
        origin: impl Into<String>,
        origin_verified: bool,
        secure_channel: bool,
    ) -> Self {
        let error = match code {
            ActivityResultCode::Failed => Some(ResultError {
                message: reason_text(data.as_ref()),
            }),
            _ => None,
        };
        let data = match code {
            ActivityResultCode::Ok => data,
            _ => None,
        };
        Self {
            code,
            data,
            mode,
            origin: origin.into(),
            origin_verified,
            secure_channel,
            error,
        }
    }

    pub fn code(&self) -> ActivityResultCode {
        self.code
    }
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
    pub fn mode(&self) -> ActivityMode {
        self.mode
    }
    pub fn origin(&self) -> &str {
        &self.origin
    }
    pub fn origin_verified(&self) -> bool {
        self.origin_verified
    }
    pub fn secure_channel(&self) -> bool {
        self.secure_channel
    }
    pub fn ok(&self) -> bool {
        self.code == ActivityResultCode::Ok
    }
    pub fn error(&self) -> Option<&ResultError> {
        self.error.as_ref()
    }

    /// Resolve like a client promise: `Ok` passes, cancel aborts, failure errors.
    pub fn into_outcome(self) -> Result<ActivityResult, ActivityError> {
        match self.code {
            ActivityResultCode::Ok => Ok(self),
            ActivityResultCode::Canceled => Err(ActivityError::Aborted),
            ActivityResultCode::Failed => Err(ActivityError::Failed(
                self.error.map(|e| e.message).unwrap_or_default(),
            )),
        }
    }
}

fn reason_text(data: Option<&Value>) -> String {
    match data {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Response appended to the return URL by a redirect host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub origin: String,
    pub code: ActivityResultCode,
    #[serde(default)]
    pub data: Value,
}
