//! Activity request: what the client hands the host at connect time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ActivityError, Result};

/// Request an activity host is started with.
///
/// `origin` / `origin_verified` are only meaningful when the request was
/// supplied programmatically (trusted). Requests parsed from an untrusted URL
/// fragment never carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRequest {
    #[serde(rename = "requestId", default)]
    pub request_id: String,
    #[serde(rename = "returnUrl", default)]
    pub return_url: String,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(rename = "originVerified", default, skip_serializing_if = "Option::is_none")]
    pub origin_verified: Option<bool>,
}

impl ActivityRequest {
    pub fn new(request_id: impl Into<String>, return_url: impl Into<String>, args: Option<Value>) -> Self {
        Self {
            request_id: request_id.into(),
            return_url: return_url.into(),
            args,
            origin: None,
            origin_verified: None,
        }
    }

    /// Mark the request as trusted with a known origin.
    pub fn with_origin(mut self, origin: impl Into<String>, verified: bool) -> Self {
        self.origin = Some(origin.into());
        self.origin_verified = Some(verified);
        self
    }

    /// `requestId` and `returnUrl` are mandatory.
    pub fn validate(&self) -> Result<()> {
        if self.request_id.is_empty() || self.return_url.is_empty() {
            return Err(ActivityError::InvalidRequest(
                "Request must have requestId and returnUrl".into(),
            ));
        }
        Ok(())
    }

    /// Origin supplied with a trusted request, ignoring empty values.
    pub fn trusted_origin(&self) -> Option<&str> {
        self.origin.as_deref().filter(|o| !o.is_empty())
    }
}

/// Encode a request as JSON. `args` is always present (`null` when absent);
/// `origin` / `originVerified` only when set.
pub fn serialize_request(request: &ActivityRequest) -> Result<String> {
    serde_json::to_string(request)
        .map_err(|e| ActivityError::Internal(format!("request encode failed: {e}")))
}

/// Decode a request string. Empty input yields `Ok(None)`.
///
/// Unless `trusted`, any `origin` / `originVerified` in the string is
/// discarded: an untrusted string cannot vouch for its own origin.
pub fn parse_request(request: &str, trusted: bool) -> Result<Option<ActivityRequest>> {
    if request.is_empty() {
        return Ok(None);
    }
    let mut parsed: ActivityRequest = serde_json::from_str(request)
        .map_err(|e| ActivityError::InvalidRequest(format!("request json: {e}")))?;
    if !trusted {
        parsed.origin = None;
        parsed.origin_verified = None;
    }
    Ok(Some(parsed))
}
