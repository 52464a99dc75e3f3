use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde_json::Value;

use activities_core::error::Result;

use crate::env::WindowRef;
use crate::port::redirect::discover_in_fragment;
use crate::port::{
    ActivityIframePort, ActivityWindowPort, ActivityWindowRedirectPort, OpenOptions, PortRef,
};
use crate::sync::runtime;

/// Receives the port of a finished activity.
pub type ResultHandler = Arc<dyn Fn(PortRef) + Send + Sync>;

/// Page-level client: opens activities in every mode and hands results to
/// the handlers registered for their request id.
///
/// Results are buffered per request id, so a handler registered after the
/// result arrived (or after a redirect brought it back) still receives it.
#[derive(Clone)]
pub struct ActivityPorts {
    inner: Arc<Inner>,
}

struct Inner {
    win: WindowRef,
    /// Location fragment at construction; redirect results are read from it.
    fragment: String,
    handlers: DashMap<String, Vec<ResultHandler>>,
    results: DashMap<String, PortRef>,
}

impl ActivityPorts {
    pub const VERSION: &'static str = "1.12";

    pub fn new(win: WindowRef) -> Self {
        let fragment = win.location_hash();
        Self {
            inner: Arc::new(Inner {
                win,
                fragment,
                handlers: DashMap::new(),
                results: DashMap::new(),
            }),
        }
    }

    /// Start an activity in `frame` and wait until it connected.
    pub async fn open_iframe(
        &self,
        frame: WindowRef,
        url: &str,
        args: Option<Value>,
    ) -> Result<ActivityIframePort> {
        let port = ActivityIframePort::new(Arc::clone(&self.inner.win), frame, url, args)?;
        port.connect().await?;
        Ok(port)
    }

    /// Start an activity in a separate window. The result goes to the
    /// `on_result` handlers for `request_id`. Returns the opened window, if
    /// any.
    pub fn open(
        &self,
        request_id: &str,
        url: &str,
        target: &str,
        args: Option<Value>,
        options: Option<OpenOptions>,
    ) -> Result<Option<WindowRef>> {
        let port = ActivityWindowPort::new(
            Arc::clone(&self.inner.win),
            request_id,
            url,
            target,
            args,
            options,
        )?;
        let rt = runtime()?;
        port.open();

        let weak = Arc::downgrade(&self.inner);
        let request_id = request_id.to_string();
        let waiting = port.clone();
        rt.spawn(async move {
            // A redirect never settles here; its result comes back with the
            // next page load.
            let _ = waiting.settled().await;
            if let Some(ports) = upgrade(&weak) {
                ports.consume_result_all(&request_id, Arc::new(waiting));
            }
        });
        Ok(port.target_win())
    }

    /// Register `handler` for `request_id`. An already known result,
    /// including one delivered by redirect, is handed over immediately.
    pub fn on_result(&self, request_id: &str, handler: ResultHandler) {
        self.inner
            .handlers
            .entry(request_id.to_string())
            .or_default()
            .push(Arc::clone(&handler));
        if let Some(port) = self.discover_result(request_id) {
            handler(port);
        }
    }

    fn discover_result(&self, request_id: &str) -> Option<PortRef> {
        if let Some(port) = self.inner.results.get(request_id) {
            return Some(Arc::clone(port.value()));
        }
        if self.inner.fragment.is_empty() {
            return None;
        }
        match discover_in_fragment(self.inner.win.as_ref(), &self.inner.fragment, request_id) {
            Ok(Some(result)) => {
                let port: PortRef = Arc::new(ActivityWindowRedirectPort::new(result));
                self.inner
                    .results
                    .insert(request_id.to_string(), Arc::clone(&port));
                Some(port)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(error = %e, request_id, "redirect result not readable");
                None
            }
        }
    }

    fn consume_result_all(&self, request_id: &str, port: PortRef) {
        let handlers = self
            .inner
            .handlers
            .get(request_id)
            .map(|h| h.value().clone())
            .unwrap_or_default();
        for handler in handlers {
            handler(Arc::clone(&port));
        }
        self.inner.results.insert(request_id.to_string(), port);
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<ActivityPorts> {
    weak.upgrade().map(|inner| ActivityPorts { inner })
}
