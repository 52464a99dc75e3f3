use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use activities_core::error::{ActivityError, Result};
use activities_core::{ActivityMode, ActivityResultCode, Command};

use crate::channel::MessagePort;
use crate::config::ActivitiesConfig;
use crate::env::{ListenerId, SizeContainer, WindowEvent, WindowRef};
use crate::host::{
    report_local_size, result_payload, ActivityHost, ActivityWindowRedirectHost, Debounce,
    HostFlags, HostRef, MessageCallback, RequestInput, ResizeCompleteCallback,
};
use crate::messenger::{MessageTarget, Messenger};
use crate::sync::{lock, runtime};

/// Host for an activity opened as a popup, talking to its opener.
///
/// The request is always read the redirect way first. If the opener does not
/// answer `connect` within the configured timeout, `connect` resolves with
/// the inner redirect host instead. Messaging is never offered so that both
/// outcomes expose the same usable surface.
#[derive(Clone)]
pub struct ActivityWindowPopupHost {
    inner: Arc<Inner>,
}

struct Inner {
    win: WindowRef,
    messenger: Messenger,
    redirect: ActivityWindowRedirectHost,
    accepts_channel: bool,
    connect_timeout: Duration,
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
    unload_listener: Option<(ListenerId, JoinHandle<()>)>,
}

impl ActivityWindowPopupHost {
    pub fn new(win: WindowRef, config: &ActivitiesConfig) -> Result<Self> {
        let opener = win
            .opener()
            .filter(|o| o.id() != win.id())
            .ok_or(ActivityError::NoOpener)?;
        let messenger = Messenger::new(Arc::clone(&win), MessageTarget::Window(opener), None);
        let redirect = ActivityWindowRedirectHost::new(Arc::clone(&win), config);
        Ok(Self {
            inner: Arc::new(Inner {
                win,
                messenger,
                redirect,
                accepts_channel: config.accepts_channel,
                connect_timeout: config.popup_connect_timeout(),
                flags: HostFlags::default(),
                debounce: Debounce::new(config.resize_debounce()),
                state: Mutex::new(State::default()),
            }),
        })
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
                match tx {
                    Some(tx) => {
                        tracing::info!(mode = "popup", "activity host connected");
                        let _ = tx.send(());
                    }
                    // The caller already holds the redirect host; this
                    // messenger stays connected until disconnect.
                    None => tracing::debug!("start arrived after redirect fallback"),
                }
                if let Err(e) = self.watch_unload() {
                    tracing::warn!(error = %e, "unload watcher not installed");
                }
            }
            Command::Close => self.disconnect(),
            _ => {}
        }
    }

    /// Send `check` if the popup unloads before the client acknowledged.
    fn watch_unload(&self) -> Result<()> {
        if lock(&self.inner.state).unload_listener.is_some() {
            return Ok(());
        }
        let rt = runtime()?;
        let listener = self.inner.win.listen();
        let weak = Arc::downgrade(&self.inner);
        let mut events = listener.events;
        let task = rt.spawn(async move {
            while let Some(event) = events.recv().await {
                if !matches!(event, WindowEvent::Unload) {
                    continue;
                }
                let Some(host) = upgrade(&weak) else {
                    break;
                };
                if let Err(e) = host.inner.messenger.send_empty(Command::Check) {
                    tracing::debug!(error = %e, "check not sent");
                }
            }
        });
        let previous = lock(&self.inner.state)
            .unload_listener
            .replace((listener.id, task));
        if let Some((id, task)) = previous {
            self.inner.win.unlisten(id);
            task.abort();
        }
        Ok(())
    }

    fn send_result(&self, code: ActivityResultCode, data: Value) -> Result<()> {
        self.inner.flags.ensure_can_send(code)?;
        let payload = result_payload(code, data)?;
        self.inner
            .messenger
            .send_command(Command::Result, Some(payload), Vec::new())?;
        tracing::info!(code = code.as_str(), "activity result sent");
        if let Err(e) = self.watch_unload() {
            tracing::warn!(error = %e, "unload watcher not installed");
        }
        Ok(())
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<ActivityWindowPopupHost> {
    weak.upgrade().map(|inner| ActivityWindowPopupHost { inner })
}

#[async_trait]
impl ActivityHost for ActivityWindowPopupHost {
    async fn connect(&self, request: Option<RequestInput>) -> Result<HostRef> {
        self.inner.flags.reset();
        self.inner.redirect.connect(request).await?;

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

        match tokio::time::timeout(self.inner.connect_timeout, rx).await {
            Ok(Ok(())) => Ok(Arc::new(self.clone())),
            Ok(Err(_)) => Err(ActivityError::NotConnected),
            Err(_) => {
                lock(&self.inner.state).connected_tx = None;
                tracing::warn!(
                    timeout_ms = self.inner.connect_timeout.as_millis() as u64,
                    "popup handshake timed out, falling back to redirect"
                );
                Ok(Arc::new(self.inner.redirect.clone()))
            }
        }
    }

    /// Also tries to close the popup window. Failure is ignored.
    fn disconnect(&self) {
        self.inner.flags.reset();
        self.inner.messenger.disconnect();
        let listener = {
            let mut st = lock(&self.inner.state);
            st.connected_tx = None;
            st.unload_listener.take()
        };
        if let Some((id, task)) = listener {
            self.inner.win.unlisten(id);
            task.abort();
        }
        if let Err(e) = self.inner.win.close() {
            tracing::debug!(error = %e, "popup window close failed");
        }
    }

    fn mode(&self) -> ActivityMode {
        ActivityMode::Popup
    }

    fn request_string(&self) -> Result<Option<String>> {
        self.inner.flags.ensure_connected()?;
        self.inner.redirect.request_string()
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

    fn ready(&self) -> Result<()> {
        self.inner.flags.ensure_accepted()?;
        self.inner.messenger.send_empty(Command::Ready)
    }

    fn is_messaging_supported(&self) -> bool {
        false
    }

    // Accepted but ignored, for parity with redirect mode.
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
