use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;

use activities_core::error::{ActivityError, Result};
use activities_core::fragment::{
    add_fragment_param, origin_of, query_param, REQUEST_PARAM, RESPONSE_PARAM,
};
use activities_core::{
    parse_request, serialize_request, ActivityMode, ActivityRequest, ActivityResultCode,
    RedirectResponse,
};

use crate::channel::MessagePort;
use crate::config::ActivitiesConfig;
use crate::env::{SizeContainer, WindowRef};
use crate::host::{
    report_local_size, ActivityHost, Debounce, HostFlags, HostRef, MessageCallback, RequestInput,
    ResizeCompleteCallback,
};
use crate::sync::lock;

/// Host for an activity opened by navigation. The request arrives in the
/// `__WA__` fragment parameter and the result leaves by navigating to the
/// return URL. Nothing here is a secure channel.
#[derive(Clone)]
pub struct ActivityWindowRedirectHost {
    inner: Arc<Inner>,
}

struct Inner {
    win: WindowRef,
    flags: HostFlags,
    debounce: Debounce,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    request_id: String,
    return_url: String,
    args: Option<Value>,
    target_origin: String,
    target_origin_verified: bool,
    size_container: Option<Arc<dyn SizeContainer>>,
    on_resize_complete: Option<ResizeCompleteCallback>,
}

impl ActivityWindowRedirectHost {
    pub fn new(win: WindowRef, config: &ActivitiesConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                win,
                flags: HostFlags::default(),
                debounce: Debounce::new(config.resize_debounce()),
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn resolve_request(&self, input: Option<RequestInput>) -> Result<Option<ActivityRequest>> {
        match input {
            Some(RequestInput::Request(request)) => Ok(Some(request)),
            Some(RequestInput::Encoded(s)) if !s.is_empty() => parse_request(&s, true),
            _ => {
                // `query_param` already undoes the single URI encoding.
                let hash = self.inner.win.location_hash();
                match query_param(&hash, REQUEST_PARAM) {
                    Some(json) if !json.is_empty() => parse_request(&json, false),
                    _ => Ok(None),
                }
            }
        }
    }

    fn send_result(&self, code: ActivityResultCode, data: Value) -> Result<()> {
        self.inner.flags.ensure_can_send(code)?;
        let (request_id, return_url) = {
            let st = lock(&self.inner.state);
            (st.request_id.clone(), st.return_url.clone())
        };
        let response = RedirectResponse {
            request_id,
            origin: self.inner.win.origin(),
            code,
            data,
        };
        let json = serde_json::to_string(&response)
            .map_err(|e| ActivityError::Internal(format!("response encode failed: {e}")))?;
        let url = add_fragment_param(&return_url, RESPONSE_PARAM, &json);
        tracing::info!(code = code.as_str(), "activity result sent by redirect");
        if self.inner.win.can_replace_location() {
            self.inner.win.location_replace(&url);
        } else {
            self.inner.win.location_assign(&url);
        }
        Ok(())
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<ActivityWindowRedirectHost> {
    weak.upgrade().map(|inner| ActivityWindowRedirectHost { inner })
}

#[async_trait]
impl ActivityHost for ActivityWindowRedirectHost {
    /// A request passed in by the caller is trusted, including its origin.
    /// One read from the URL is not: its origin is derived from `returnUrl`
    /// and verified only against the referrer.
    async fn connect(&self, request: Option<RequestInput>) -> Result<HostRef> {
        self.inner.flags.reset();
        let request = self
            .resolve_request(request)?
            .ok_or_else(|| ActivityError::InvalidRequest("Request must have requestId and returnUrl".into()))?;
        request.validate()?;

        let (target_origin, verified) = match request.trusted_origin() {
            Some(origin) => (origin.to_string(), request.origin_verified.unwrap_or(false)),
            None => {
                let origin = origin_of(&request.return_url)?;
                let referrer_origin = self
                    .inner
                    .win
                    .referrer()
                    .and_then(|r| origin_of(&r).ok());
                let verified = referrer_origin.as_deref() == Some(origin.as_str());
                (origin, verified)
            }
        };
        tracing::info!(
            mode = "redirect",
            request_id = %request.request_id,
            origin = %target_origin,
            verified,
            "activity host connected"
        );

        {
            let mut st = lock(&self.inner.state);
            st.request_id = request.request_id;
            st.return_url = request.return_url;
            st.args = request.args;
            st.target_origin = target_origin;
            st.target_origin_verified = verified;
        }
        self.inner.flags.set_connected();
        Ok(Arc::new(self.clone()))
    }

    fn disconnect(&self) {
        self.inner.flags.reset();
    }

    fn mode(&self) -> ActivityMode {
        ActivityMode::Redirect
    }

    /// The request with the resolved origin attached, suitable for handing
    /// back to `connect` as a trusted string.
    fn request_string(&self) -> Result<Option<String>> {
        self.inner.flags.ensure_connected()?;
        let request = {
            let st = lock(&self.inner.state);
            ActivityRequest::new(st.request_id.clone(), st.return_url.clone(), st.args.clone())
                .with_origin(st.target_origin.clone(), st.target_origin_verified)
        };
        serialize_request(&request).map(Some)
    }

    fn target_origin(&self) -> Result<String> {
        self.inner.flags.ensure_connected()?;
        Ok(lock(&self.inner.state).target_origin.clone())
    }

    fn is_target_origin_verified(&self) -> Result<bool> {
        self.inner.flags.ensure_connected()?;
        Ok(lock(&self.inner.state).target_origin_verified)
    }

    fn is_secure_channel(&self) -> bool {
        false
    }

    fn accept(&self) -> Result<()> {
        self.inner.flags.accept()
    }

    fn args(&self) -> Result<Option<Value>> {
        self.inner.flags.ensure_connected()?;
        Ok(lock(&self.inner.state).args.clone())
    }

    fn ready(&self) -> Result<()> {
        self.inner.flags.ensure_accepted()
    }

    fn is_messaging_supported(&self) -> bool {
        false
    }

    fn message(&self, _payload: Value) -> Result<()> {
        self.inner.flags.ensure_accepted()
    }

    fn on_message(&self, _callback: MessageCallback) -> Result<()> {
        self.inner.flags.ensure_accepted()
    }

    fn message_channel(&self, _name: Option<&str>) -> Result<MessagePort> {
        self.inner.flags.ensure_accepted()?;
        Err(ActivityError::NotSupported)
    }

    fn result(&self, data: Value) -> Result<()> {
        self.send_result(ActivityResultCode::Ok, data)
    }

    fn cancel(&self) -> Result<()> {
        self.send_result(ActivityResultCode::Canceled, Value::Null)
    }

    fn failed(&self, reason: &str) -> Result<()> {
        self.send_result(ActivityResultCode::Failed, Value::String(reason.to_string()))
    }

    fn set_size_container(&self, container: Arc<dyn SizeContainer>) {
        lock(&self.inner.state).size_container = Some(container);
    }

    fn resized(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.debounce.schedule(move || {
            let Some(host) = upgrade(&weak) else {
                return;
            };
            let (container, callback) = {
                let st = lock(&host.inner.state);
                (st.size_container.clone(), st.on_resize_complete.clone())
            };
            report_local_size(host.inner.win.as_ref(), container, callback);
        });
    }

    fn on_resize_complete(&self, callback: ResizeCompleteCallback) {
        lock(&self.inner.state).on_resize_complete = Some(callback);
    }
}
