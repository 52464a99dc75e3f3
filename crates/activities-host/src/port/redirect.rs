use async_trait::async_trait;

use activities_core::error::Result;
use activities_core::fragment::{origin_of, query_param, remove_query_param, RESPONSE_PARAM};
use activities_core::{ActivityMode, ActivityResult, RedirectResponse};

use crate::env::Window;
use crate::port::ActivityPort;

/// Look for a redirect result addressed to `request_id` in the window's
/// fragment. A match is consumed: the parameter is stripped from the
/// fragment so a reload does not deliver it twice.
///
/// The origin is verified only against the referrer, and the channel is
/// never secure.
pub fn discover_redirect_result(win: &dyn Window, request_id: &str) -> Result<Option<ActivityResult>> {
    discover_in_fragment(win, &win.location_hash(), request_id)
}

/// Same as `discover_redirect_result`, reading from a fragment captured
/// earlier (typically at page load).
pub(crate) fn discover_in_fragment(
    win: &dyn Window,
    fragment: &str,
    request_id: &str,
) -> Result<Option<ActivityResult>> {
    // `query_param` already undoes the single URI encoding.
    let Some(json) = query_param(fragment, RESPONSE_PARAM).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let response: RedirectResponse = match serde_json::from_str(&json) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "unreadable redirect response ignored");
            return Ok(None);
        }
    };
    if response.request_id != request_id {
        return Ok(None);
    }

    let hash = win.location_hash();
    let clean = remove_query_param(&hash, RESPONSE_PARAM);
    if clean != hash {
        win.replace_state_hash(&clean);
    }

    let referrer_origin = win.referrer().and_then(|r| origin_of(&r).ok());
    let verified = referrer_origin.as_deref() == Some(response.origin.as_str());
    let data = (!response.data.is_null()).then_some(response.data);
    Ok(Some(ActivityResult::new(
        response.code,
        data,
        ActivityMode::Redirect,
        response.origin,
        verified,
        false,
    )))
}

/// Port handed to result handlers for a result that came back by redirect.
#[derive(Debug, Clone)]
pub struct ActivityWindowRedirectPort {
    result: ActivityResult,
}

impl ActivityWindowRedirectPort {
    pub fn new(result: ActivityResult) -> Self {
        Self { result }
    }
}

#[async_trait]
impl ActivityPort for ActivityWindowRedirectPort {
    fn mode(&self) -> ActivityMode {
        ActivityMode::Redirect
    }

    async fn accept_result(&self) -> Result<ActivityResult> {
        self.result.clone().into_outcome()
    }
}
