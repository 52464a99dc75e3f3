use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::watch;

use activities_core::error::{ActivityError, Result};
use activities_core::fragment::origin_of;
use activities_core::protocol::envelope::{to_payload, HeightPayload, ResultPayload};
use activities_core::{ActivityMode, ActivityResult, Command, Envelope};

use crate::channel::MessagePort;
use crate::env::WindowRef;
use crate::messenger::{MessageHandler, MessageTarget, Messenger};
use crate::sync::lock;

/// Called with the height the activity asked for.
pub type ResizeRequestCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Client end of an iframe activity.
#[derive(Clone)]
pub struct ActivityIframePort {
    inner: Arc<Inner>,
}

struct Inner {
    messenger: Messenger,
    args: Option<Value>,
    connected: watch::Sender<bool>,
    ready: watch::Sender<bool>,
    result: watch::Sender<Option<ActivityResult>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    on_resize_request: Option<ResizeRequestCallback>,
    requested_height: Option<u32>,
}

impl ActivityIframePort {
    /// `frame` is the iframe's content window, `url` the activity URL that
    /// fixes the expected origin.
    pub fn new(win: WindowRef, frame: WindowRef, url: &str, args: Option<Value>) -> Result<Self> {
        let target_origin = origin_of(url)?;
        let messenger = Messenger::new(win, MessageTarget::Window(frame), Some(target_origin));
        Ok(Self {
            inner: Arc::new(Inner {
                messenger,
                args,
                connected: watch::channel(false).0,
                ready: watch::channel(false).0,
                result: watch::channel(None).0,
                state: Mutex::new(State::default()),
            }),
        })
    }

    pub fn mode(&self) -> ActivityMode {
        ActivityMode::Iframe
    }

    /// Listen and wait for the host's `connect`; `start` goes out in reply.
    pub async fn connect(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.messenger.connect(Arc::new(move |cmd: Command, payload: Option<Value>| {
            if let Some(port) = upgrade(&weak) {
                port.handle_command(cmd, payload);
            }
        }))?;
        wait_for(self.inner.connected.subscribe(), |c| *c).await
    }

    pub fn disconnect(&self) {
        self.inner.connected.send_replace(false);
        self.inner.messenger.disconnect();
    }

    /// Wait for the activity's result. A canceled result is
    /// `ActivityError::Aborted`, a failed one `ActivityError::Failed`.
    pub async fn accept_result(&self) -> Result<ActivityResult> {
        let mut rx = self.inner.result.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result.into_outcome();
            }
            rx.changed().await.map_err(|_| ActivityError::NotConnected)?;
        }
    }

    pub fn message(&self, payload: Value) -> Result<()> {
        self.inner.messenger.custom_message(payload)
    }

    pub fn on_message(&self, callback: MessageHandler) {
        self.inner.messenger.on_custom_message(callback);
    }

    /// Ask the activity for a named channel.
    pub async fn message_channel(&self, name: Option<&str>) -> Result<MessagePort> {
        self.inner.messenger.ask_channel(name).await
    }

    pub async fn when_ready(&self) -> Result<()> {
        wait_for(self.inner.ready.subscribe(), |r| *r).await
    }

    /// Replays the last request, if any, to a newly installed callback.
    pub fn on_resize_request(&self, callback: ResizeRequestCallback) {
        let last = {
            let mut st = lock(&self.inner.state);
            st.on_resize_request = Some(Arc::clone(&callback));
            st.requested_height
        };
        if let Some(height) = last {
            callback(height);
        }
    }

    /// Report the height granted to the iframe. No-op until connected.
    pub fn resized(&self, height: u32) -> Result<()> {
        if !*self.inner.connected.borrow() {
            return Ok(());
        }
        let payload = to_payload(&HeightPayload { height })?;
        self.inner
            .messenger
            .send_command(Command::Resized, Some(payload), Vec::new())
    }

    fn handle_command(&self, cmd: Command, payload: Option<Value>) {
        match cmd {
            Command::Connect => {
                self.inner.connected.send_replace(true);
                if let Err(e) = self.inner.messenger.send_start_command(self.inner.args.clone()) {
                    tracing::warn!(error = %e, "start not sent");
                }
            }
            Command::Result => {
                if self.inner.result.borrow().is_some() {
                    return;
                }
                let payload = match Envelope::new(Command::Result, payload).payload_as::<ResultPayload>() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed result ignored");
                        return;
                    }
                };
                let origin = self.inner.messenger.target_origin().unwrap_or_default();
                let data = (!payload.data.is_null()).then_some(payload.data);
                let result = ActivityResult::new(payload.code, data, ActivityMode::Iframe, origin, true, true);
                tracing::info!(code = payload.code.as_str(), "activity result received");
                self.inner.result.send_replace(Some(result));
                if let Err(e) = self.inner.messenger.send_empty(Command::Close) {
                    tracing::debug!(error = %e, "close not sent");
                }
                self.disconnect();
            }
            Command::Ready => {
                self.inner.ready.send_replace(true);
            }
            Command::Resize => {
                let Some(height) = payload
                    .and_then(|p| serde_json::from_value::<HeightPayload>(p).ok())
                    .map(|p| p.height)
                else {
                    return;
                };
                let callback = {
                    let mut st = lock(&self.inner.state);
                    st.requested_height = Some(height);
                    st.on_resize_request.clone()
                };
                if let Some(callback) = callback {
                    callback(height);
                }
            }
            _ => {}
        }
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<ActivityIframePort> {
    weak.upgrade().map(|inner| ActivityIframePort { inner })
}

async fn wait_for<T>(mut rx: watch::Receiver<T>, done: impl Fn(&T) -> bool) -> Result<()> {
    rx.wait_for(|v| done(v))
        .await
        .map(|_| ())
        .map_err(|_| ActivityError::NotConnected)
}
