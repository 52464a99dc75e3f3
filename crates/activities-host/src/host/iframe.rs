use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use activities_core::error::{ActivityError, Result};
use activities_core::protocol::envelope::{to_payload, HeightPayload};
use activities_core::{ActivityMode, ActivityResultCode, Command};

use crate::channel::MessagePort;
use crate::config::ActivitiesConfig;
use crate::env::{ListenerId, SizeContainer, WindowEvent, WindowRef};
use crate::host::{
    result_payload, ActivityHost, Debounce, HostFlags, HostRef, MessageCallback, RequestInput,
    ResizeCompleteCallback,
};
use crate::messenger::{MessageTarget, Messenger};
use crate::sync::{lock, runtime};

/// Host for an activity running in an iframe, talking to its parent.
///
/// `disconnected -> connected (start received) -> accepted -> ready`. A sent
/// result does not disconnect: teardown waits for the client's `close` so the
/// result frame cannot race the listener removal.
#[derive(Clone)]
pub struct ActivityIframeHost {
    inner: Arc<Inner>,
}

struct Inner {
    win: WindowRef,
    messenger: Messenger,
    accepts_channel: bool,
    flags: HostFlags,
    debounce: Debounce,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    args: Option<Value>,
    connected_tx: Option<oneshot::Sender<()>>,
    size_container: Option<Arc<dyn SizeContainer>>,
    on_resize_complete: Option<ResizeCompleteCallback>,
    last_measured_width: u32,
    last_requested_height: u32,
    resize_listener: Option<(ListenerId, JoinHandle<()>)>,
}

impl ActivityIframeHost {
    pub fn new(win: WindowRef, config: &ActivitiesConfig) -> Self {
        let parent_of = Arc::clone(&win);
        let messenger = Messenger::new(
            Arc::clone(&win),
            MessageTarget::Lazy(Arc::new(move || parent_of.parent())),
            None,
        );
        Self {
            inner: Arc::new(Inner {
                win,
                messenger,
                accepts_channel: config.accepts_channel,
                flags: HostFlags::default(),
                debounce: Debounce::new(config.resize_debounce()),
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn handle_command(&self, cmd: Command, payload: Option<Value>) {
        match cmd {
            Command::Start => {
                let tx = {
                    let mut st = lock(&self.inner.state);
                    st.args = payload;
                    st.connected_tx.take()
                };
                self.inner.flags.set_connected();
                tracing::info!(mode = "iframe", "activity host connected");
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
            }
            Command::Close => self.disconnect(),
            Command::Resized => {
                let Some(allowed) = payload
                    .and_then(|p| serde_json::from_value::<HeightPayload>(p).ok())
                    .map(|p| p.height)
                else {
                    tracing::debug!("resized without height ignored");
                    return;
                };
                let (callback, requested) = {
                    let st = lock(&self.inner.state);
                    (st.on_resize_complete.clone(), st.last_requested_height)
                };
                if let Some(callback) = callback {
                    callback(allowed, requested, allowed < requested);
                }
            }
            _ => {}
        }
    }

    /// Send `resize` when the container's height changed since the last request.
    fn measure(&self) {
        let height = {
            let mut st = lock(&self.inner.state);
            let Some(container) = st.size_container.clone() else {
                return;
            };
            let requested = container.scroll_height();
            if requested == st.last_requested_height {
                return;
            }
            st.last_requested_height = requested;
            requested
        };
        let sent = to_payload(&HeightPayload { height })
            .and_then(|p| self.inner.messenger.send_command(Command::Resize, Some(p), Vec::new()));
        if let Err(e) = sent {
            tracing::debug!(error = %e, height, "resize request not sent");
        }
    }

    fn on_window_resize(&self) {
        let width = self.inner.win.inner_width();
        let changed = {
            let mut st = lock(&self.inner.state);
            let changed = st.last_measured_width != width;
            st.last_measured_width = width;
            changed
        };
        if changed {
            self.resized();
        }
    }

    fn watch_resize(&self, rt: &Handle) {
        let listener = self.inner.win.listen();
        let weak = Arc::downgrade(&self.inner);
        let mut events = listener.events;
        let task = rt.spawn(async move {
            while let Some(event) = events.recv().await {
                if !matches!(event, WindowEvent::Resize) {
                    continue;
                }
                let Some(host) = upgrade(&weak) else {
                    break;
                };
                host.on_window_resize();
            }
        });
        let previous = lock(&self.inner.state)
            .resize_listener
            .replace((listener.id, task));
        if let Some((id, task)) = previous {
            self.inner.win.unlisten(id);
            task.abort();
        }
    }

    fn send_result(&self, code: ActivityResultCode, data: Value) -> Result<()> {
        self.inner.flags.ensure_can_send(code)?;
        let payload = result_payload(code, data)?;
        self.inner
            .messenger
            .send_command(Command::Result, Some(payload), Vec::new())?;
        tracing::info!(code = code.as_str(), "activity result sent");
        Ok(())
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<ActivityIframeHost> {
    weak.upgrade().map(|inner| ActivityIframeHost { inner })
}

#[async_trait]
impl ActivityHost for ActivityIframeHost {
    async fn connect(&self, _request: Option<RequestInput>) -> Result<HostRef> {
        self.inner.flags.reset();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.state).connected_tx = Some(tx);

        let weak = Arc::downgrade(&self.inner);
        self.inner.messenger.connect(Arc::new(move |cmd: Command, payload: Option<Value>| {
            if let Some(host) = upgrade(&weak) {
                host.handle_command(cmd, payload);
            }
        }))?;
        if let Err(e) = self
            .inner
            .messenger
            .send_connect_command(self.inner.accepts_channel)
        {
            self.inner.messenger.disconnect();
            return Err(e);
        }

        rx.await.map_err(|_| ActivityError::NotConnected)?;
        Ok(Arc::new(self.clone()))
    }

    fn disconnect(&self) {
        self.inner.flags.reset();
        self.inner.messenger.disconnect();
        let listener = {
            let mut st = lock(&self.inner.state);
            st.connected_tx = None;
            st.resize_listener.take()
        };
        if let Some((id, task)) = listener {
            self.inner.win.unlisten(id);
            task.abort();
        }
    }

    fn mode(&self) -> ActivityMode {
        ActivityMode::Iframe
    }

    fn request_string(&self) -> Result<Option<String>> {
        self.inner.flags.ensure_connected()?;
        Ok(None)
    }

    fn target_origin(&self) -> Result<String> {
        self.inner.flags.ensure_connected()?;
        self.inner.messenger.target_origin()
    }

    fn is_target_origin_verified(&self) -> Result<bool> {
        self.inner.flags.ensure_connected()?;
        Ok(true)
    }

    fn is_secure_channel(&self) -> bool {
        true
    }

    fn accept(&self) -> Result<()> {
        self.inner.flags.accept()
    }

    fn args(&self) -> Result<Option<Value>> {
        self.inner.flags.ensure_connected()?;
        Ok(lock(&self.inner.state).args.clone())
    }

    /// Tell the client the activity is interactive and start size tracking.
    fn ready(&self) -> Result<()> {
        self.inner.flags.ensure_accepted()?;
        let rt = runtime()?;
        self.inner.messenger.send_empty(Command::Ready)?;
        self.measure();
        self.watch_resize(&rt);
        Ok(())
    }

    fn is_messaging_supported(&self) -> bool {
        true
    }

    fn message(&self, payload: Value) -> Result<()> {
        self.inner.flags.ensure_accepted()?;
        self.inner.messenger.custom_message(payload)
    }

    fn on_message(&self, callback: MessageCallback) -> Result<()> {
        self.inner.flags.ensure_accepted()?;
        self.inner.messenger.on_custom_message(callback);
        Ok(())
    }

    fn message_channel(&self, name: Option<&str>) -> Result<MessagePort> {
        self.inner.flags.ensure_accepted()?;
        self.inner.messenger.start_channel(name)
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
            if let Some(host) = upgrade(&weak) {
                host.measure();
            }
        });
    }

    fn on_resize_complete(&self, callback: ResizeCompleteCallback) {
        lock(&self.inner.state).on_resize_complete = Some(callback);
    }
}
