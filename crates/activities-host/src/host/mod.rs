//! Activity hosts: the activity-implementation side of a connection.
//!
//! Three transports share one capability surface (`ActivityHost`):
//! - `iframe`: messaging with the embedding parent, secure.
//! - `popup`: messaging with the opener, degrading to redirect on timeout.
//! - `redirect`: request and result travel in URL fragments, not secure.
//!
//! Callers branch on capability queries (`is_messaging_supported`,
//! `is_secure_channel`) and never on the concrete host type.

pub mod iframe;
pub mod popup;
pub mod redirect;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use activities_core::error::{ActivityError, Result};
use activities_core::protocol::envelope::{to_payload, ResultPayload};
use activities_core::{ActivityMode, ActivityRequest, ActivityResultCode};

use crate::channel::MessagePort;
use crate::env::{SizeContainer, Window};
use crate::sync::runtime;

pub use iframe::ActivityIframeHost;
pub use popup::ActivityWindowPopupHost;
pub use redirect::ActivityWindowRedirectHost;

pub type HostRef = Arc<dyn ActivityHost>;

/// Custom message callback.
pub type MessageCallback = crate::messenger::MessageHandler;

/// `(allowed_height, requested_height, overflow)`.
pub type ResizeCompleteCallback = Arc<dyn Fn(u32, u32, bool) + Send + Sync>;

/// Request handed to `connect` by the embedder. Both forms are trusted:
/// `origin`/`originVerified` inside them are taken as-is.
#[derive(Debug, Clone)]
pub enum RequestInput {
    Request(ActivityRequest),
    Encoded(String),
}

impl From<ActivityRequest> for RequestInput {
    fn from(r: ActivityRequest) -> Self {
        Self::Request(r)
    }
}

impl From<String> for RequestInput {
    fn from(s: String) -> Self {
        Self::Encoded(s)
    }
}

#[async_trait]
pub trait ActivityHost: Send + Sync {
    /// Resolves once the client is known. The returned host may be a
    /// different transport than `self` (popup degrading to redirect).
    async fn connect(&self, request: Option<RequestInput>) -> Result<HostRef>;

    /// Release listeners and ports. Idempotent.
    fn disconnect(&self);

    fn mode(&self) -> ActivityMode;

    /// Serialized request, `None` where the transport has none (iframe).
    fn request_string(&self) -> Result<Option<String>>;

    fn target_origin(&self) -> Result<String>;

    fn is_target_origin_verified(&self) -> Result<bool>;

    fn is_secure_channel(&self) -> bool;

    /// Opt into trusting the client. Gates every interaction method.
    fn accept(&self) -> Result<()>;

    fn args(&self) -> Result<Option<Value>>;

    fn ready(&self) -> Result<()>;

    fn is_messaging_supported(&self) -> bool;

    fn message(&self, payload: Value) -> Result<()>;

    fn on_message(&self, callback: MessageCallback) -> Result<()>;

    fn message_channel(&self, name: Option<&str>) -> Result<MessagePort>;

    /// Successful result. Requires `accept`.
    fn result(&self, data: Value) -> Result<()>;

    /// Requires only a connection.
    fn cancel(&self) -> Result<()>;

    /// Requires only a connection.
    fn failed(&self, reason: &str) -> Result<()>;

    fn set_size_container(&self, container: Arc<dyn SizeContainer>);

    /// Schedule a debounced re-measurement of the size container.
    fn resized(&self);

    fn on_resize_complete(&self, callback: ResizeCompleteCallback);
}

/// Connection and acceptance gates shared by all hosts.
#[derive(Debug, Default)]
pub(crate) struct HostFlags {
    connected: AtomicBool,
    accepted: AtomicBool,
}

impl HostFlags {
    pub(crate) fn reset(&self) {
        self.connected.store(false, Ordering::Release);
        self.accepted.store(false, Ordering::Release);
    }

    pub(crate) fn set_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn accept(&self) -> Result<()> {
        self.ensure_connected()?;
        self.accepted.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ActivityError::NotConnected)
        }
    }

    pub(crate) fn ensure_accepted(&self) -> Result<()> {
        if self.accepted.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ActivityError::NotAccepted)
        }
    }

    /// Only a successful result needs acceptance; cancel and failure may be
    /// signalled by a host that never accepted.
    pub(crate) fn ensure_can_send(&self, code: ActivityResultCode) -> Result<()> {
        match code {
            ActivityResultCode::Ok => self.ensure_accepted(),
            _ => self.ensure_connected(),
        }
    }
}

/// Coalesces bursts of `resized()` calls into one delayed measurement.
#[derive(Debug)]
pub(crate) struct Debounce {
    pending: Arc<AtomicBool>,
    delay: Duration,
}

impl Debounce {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            delay,
        }
    }

    pub(crate) fn schedule<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = Arc::clone(&self.pending);
        let delay = self.delay;
        match runtime() {
            Ok(rt) => {
                rt.spawn(async move {
                    tokio::time::sleep(delay).await;
                    pending.store(false, Ordering::Release);
                    f();
                });
            }
            Err(_) => {
                tracing::warn!("no tokio runtime, measuring without debounce");
                pending.store(false, Ordering::Release);
                f();
            }
        }
    }
}

pub(crate) fn result_payload(code: ActivityResultCode, data: Value) -> Result<Value> {
    to_payload(&ResultPayload { code, data })
}

/// Standalone windows cannot be resized by the client; report the viewport
/// height as the allowed height.
pub(crate) fn report_local_size(
    win: &dyn Window,
    container: Option<Arc<dyn SizeContainer>>,
    callback: Option<ResizeCompleteCallback>,
) {
    let (Some(container), Some(callback)) = (container, callback) else {
        return;
    };
    let requested = container.scroll_height();
    let allowed = win.inner_height();
    callback(allowed, requested, allowed < requested);
}
