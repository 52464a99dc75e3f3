use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use activities_core::error::{ActivityError, Result};
use activities_core::fragment::{add_fragment_param, origin_of, remove_fragment, REQUEST_PARAM};
use activities_core::protocol::envelope::ResultPayload;
use activities_core::{
    serialize_request, ActivityMode, ActivityRequest, ActivityResult, ActivityResultCode, Command,
    Envelope,
};

use crate::env::{Window, WindowRef};
use crate::messenger::{MessageTarget, Messenger};
use crate::port::ActivityPort;
use crate::sync::{lock, runtime};

const TOP: &str = "_top";

/// How often an open popup is polled for having been closed.
const HEARTBEAT: Duration = Duration::from_millis(500);
/// Grace period for a result still in flight when the popup closes.
const CLOSED_GRACE: Duration = Duration::from_millis(3000);
/// Delay before acting on the activity's `check`.
const CHECK_DELAY: Duration = Duration::from_millis(200);

/// Options for `ActivityWindowPort`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Where a redirect result is delivered. Defaults to the opener's
    /// location without its fragment.
    pub return_url: Option<String>,
    /// Do not put the request in the URL fragment.
    pub skip_request_in_url: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

type Outcome = std::result::Result<ActivityResult, String>;

/// Client end of an activity opened in a separate window.
///
/// A `_top` target runs the activity as a redirect and the result comes back
/// through `ActivityPorts::on_result` on the next page load. Any other target
/// asks for a popup; when the environment refuses, opening falls back to
/// `_top`. A popup the user closes before a result arrives resolves as
/// canceled.
#[derive(Clone)]
pub struct ActivityWindowPort {
    inner: Arc<Inner>,
}

struct Inner {
    win: WindowRef,
    request_id: String,
    url: String,
    target: String,
    args: Option<Value>,
    options: OpenOptions,
    outcome: watch::Sender<Option<Outcome>>,
    state: Mutex<State>,
}

struct State {
    target_win: Option<WindowRef>,
    messenger: Option<Messenger>,
    heartbeat: Option<JoinHandle<()>>,
    /// Cleared once an outcome is published or the port is disconnected.
    awaiting: bool,
}

impl ActivityWindowPort {
    /// `target` must be `_blank`, `_top` or a name target.
    pub fn new(
        win: WindowRef,
        request_id: &str,
        url: &str,
        target: &str,
        args: Option<Value>,
        options: Option<OpenOptions>,
    ) -> Result<Self> {
        let valid = target == "_blank" || target == TOP || !(target.is_empty() || target.starts_with('_'));
        if !valid {
            return Err(ActivityError::InvalidRequest(
                "The only allowed targets are \"_blank\", \"_top\" and name targets".into(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                win,
                request_id: request_id.to_string(),
                url: url.to_string(),
                target: target.to_string(),
                args,
                options: options.unwrap_or_default(),
                outcome: watch::channel(None).0,
                state: Mutex::new(State {
                    target_win: None,
                    messenger: None,
                    heartbeat: None,
                    awaiting: true,
                }),
            }),
        })
    }

    pub fn mode(&self) -> ActivityMode {
        if self.inner.target == TOP {
            ActivityMode::Redirect
        } else {
            ActivityMode::Popup
        }
    }

    /// Open the activity window. Failures are reported through
    /// `accept_result`.
    pub fn open(&self) {
        let url = match self.request_url() {
            Ok(url) => url,
            Err(e) => return self.disconnect_with_error(e.to_string()),
        };
        let features = build_features(self.inner.win.as_ref(), &self.inner.options);

        let mut target = self.inner.target.as_str();
        let mut opened = self.inner.win.open(&url, target, &features);
        if opened.is_none() && target != TOP {
            tracing::debug!(open_target = target, "window open refused, retrying as redirect");
            target = TOP;
            opened = self.inner.win.open(&url, TOP, "");
        }
        let Some(target_win) = opened else {
            return self.disconnect_with_error("failed to open window".into());
        };
        lock(&self.inner.state).target_win = Some(target_win);
        if target != TOP {
            self.setup_popup();
        }
    }

    pub fn target_win(&self) -> Option<WindowRef> {
        lock(&self.inner.state).target_win.clone()
    }

    /// Stop polling and messaging, and try to close the popup.
    pub fn disconnect(&self) {
        let (heartbeat, messenger, target_win) = {
            let mut st = lock(&self.inner.state);
            st.awaiting = false;
            (st.heartbeat.take(), st.messenger.take(), st.target_win.take())
        };
        if let Some(task) = heartbeat {
            task.abort();
        }
        if let Some(messenger) = messenger {
            messenger.disconnect();
        }
        if let Some(target_win) = target_win {
            if let Err(e) = target_win.close() {
                tracing::debug!(error = %e, "activity window close failed");
            }
        }
    }

    /// Wait for the activity's result. Never resolves for a redirect: that
    /// result arrives on the next page load instead.
    pub async fn accept_result(&self) -> Result<ActivityResult> {
        match self.settled().await {
            Ok(result) => result.into_outcome(),
            Err(reason) => Err(ActivityError::Internal(reason)),
        }
    }

    pub(crate) async fn settled(&self) -> Outcome {
        let mut rx = self.inner.outcome.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err("activity port dropped".into());
            }
        }
    }

    fn request_url(&self) -> Result<String> {
        let options = &self.inner.options;
        if options.skip_request_in_url {
            return Ok(self.inner.url.clone());
        }
        let return_url = match &options.return_url {
            Some(url) => url.clone(),
            None => remove_fragment(&self.inner.win.location_href()).to_string(),
        };
        let request = serialize_request(&ActivityRequest::new(
            self.inner.request_id.clone(),
            return_url,
            self.inner.args.clone(),
        ))?;
        Ok(add_fragment_param(&self.inner.url, REQUEST_PARAM, &request))
    }

    /// Poll for the popup closing and listen for its commands. The popup's
    /// origin is learned from its first frame; the request already went out
    /// in the URL.
    fn setup_popup(&self) {
        let Some(target_win) = self.target_win() else {
            return;
        };
        let rt = match runtime() {
            Ok(rt) => rt,
            Err(e) => return self.disconnect_with_error(e.to_string()),
        };

        let messenger = Messenger::new(
            Arc::clone(&self.inner.win),
            MessageTarget::Window(target_win),
            None,
        );
        lock(&self.inner.state).messenger = Some(messenger.clone());
        let weak = Arc::downgrade(&self.inner);
        if let Err(e) = messenger.connect(Arc::new(move |cmd: Command, payload: Option<Value>| {
            if let Some(port) = upgrade(&weak) {
                port.handle_command(cmd, payload);
            }
        })) {
            return self.disconnect_with_error(e.to_string());
        }

        let weak = Arc::downgrade(&self.inner);
        let heartbeat = rt.spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(port) = upgrade(&weak) else {
                    break;
                };
                port.check(true);
            }
        });
        lock(&self.inner.state).heartbeat = Some(heartbeat);
        tracing::info!(request_id = %self.inner.request_id, "activity popup opened");
    }

    /// If the popup is gone, resolve as canceled, optionally after a grace
    /// period for a result still in flight.
    fn check(&self, delay_cancel: bool) {
        let heartbeat = {
            let mut st = lock(&self.inner.state);
            if st.target_win.as_ref().is_some_and(|w| !w.is_closed()) {
                return;
            }
            st.heartbeat.take()
        };
        if let Some(task) = heartbeat {
            task.abort();
        }
        let delay = if delay_cancel { CLOSED_GRACE } else { Duration::ZERO };
        let weak = Arc::downgrade(&self.inner);
        match runtime() {
            Ok(rt) => {
                rt.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(port) = upgrade(&weak) {
                        port.settle(ActivityResultCode::Canceled, None);
                    }
                });
            }
            Err(e) => self.disconnect_with_error(e.to_string()),
        }
    }

    fn disconnect_with_error(&self, reason: String) {
        let awaiting = std::mem::take(&mut lock(&self.inner.state).awaiting);
        if awaiting {
            tracing::warn!(request_id = %self.inner.request_id, %reason, "activity window failed");
            self.inner.outcome.send_replace(Some(Err(reason)));
        }
        self.disconnect();
    }

    /// Publish the first outcome, tell the popup to close, and tear down.
    fn settle(&self, code: ActivityResultCode, data: Option<Value>) {
        let (awaiting, messenger) = {
            let mut st = lock(&self.inner.state);
            (std::mem::take(&mut st.awaiting), st.messenger.clone())
        };
        if awaiting {
            let connected = messenger.as_ref().is_some_and(Messenger::is_connected);
            let origin = match &messenger {
                Some(m) if connected => m.target_origin().unwrap_or_default(),
                _ => origin_of(&self.inner.url).unwrap_or_default(),
            };
            let result = ActivityResult::new(code, data, ActivityMode::Popup, origin, connected, connected);
            tracing::info!(code = code.as_str(), connected, "activity result received");
            self.inner.outcome.send_replace(Some(Ok(result)));
        }
        if let Some(messenger) = messenger {
            if let Err(e) = messenger.send_empty(Command::Close) {
                tracing::debug!(error = %e, "close not sent");
            }
        }
        self.disconnect();
    }

    fn handle_command(&self, cmd: Command, payload: Option<Value>) {
        match cmd {
            Command::Connect => {
                let messenger = lock(&self.inner.state).messenger.clone();
                if let Some(messenger) = messenger {
                    if let Err(e) = messenger.send_start_command(self.inner.args.clone()) {
                        tracing::warn!(error = %e, "start not sent");
                    }
                }
            }
            Command::Result => {
                let payload = match Envelope::new(Command::Result, payload).payload_as::<ResultPayload>() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed result ignored");
                        return;
                    }
                };
                let data = (!payload.data.is_null()).then_some(payload.data);
                self.settle(payload.code, data);
            }
            Command::Check => {
                let weak = Arc::downgrade(&self.inner);
                match runtime() {
                    Ok(rt) => {
                        rt.spawn(async move {
                            tokio::time::sleep(CHECK_DELAY).await;
                            if let Some(port) = upgrade(&weak) {
                                port.check(false);
                            }
                        });
                    }
                    Err(e) => tracing::debug!(error = %e, "check not scheduled"),
                }
            }
            _ => {}
        }
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<ActivityWindowPort> {
    weak.upgrade().map(|inner| ActivityWindowPort { inner })
}

#[async_trait]
impl ActivityPort for ActivityWindowPort {
    fn mode(&self) -> ActivityMode {
        ActivityWindowPort::mode(self)
    }

    async fn accept_result(&self) -> Result<ActivityResult> {
        ActivityWindowPort::accept_result(self).await
    }
}

/// `window.open` features: centered, at most 600x600 unless the options ask
/// otherwise, and never smaller than half the available screen.
pub(crate) fn build_features(win: &dyn Window, options: &OpenOptions) -> String {
    let screen = win.screen();
    let avail_width = f64::from(if screen.avail_width > 0 { screen.avail_width } else { screen.width });
    let avail_height = f64::from(if screen.avail_height > 0 { screen.avail_height } else { screen.height });

    // Browser chrome can only be measured from the top window; cap it at 100px.
    let is_top = win.top_id() == win.id();
    let controls = |outer: u32, inner: u32| {
        if is_top && outer > inner {
            f64::from((outer - inner).min(100))
        } else {
            0.0
        }
    };
    let controls_width = controls(win.outer_width(), win.inner_width());
    let controls_height = controls(win.outer_height(), win.inner_height());

    let max_width = (avail_width - controls_width).max(avail_width * 0.5);
    let max_height = (avail_height - controls_height).max(avail_height * 0.5);
    let mut w = 600f64.min(max_width * 0.9).floor();
    let mut h = 600f64.min(max_height * 0.9).floor();
    if let Some(width) = options.width.filter(|w| *w > 0) {
        w = f64::from(width).min(max_width).floor();
    }
    if let Some(height) = options.height.filter(|h| *h > 0) {
        h = f64::from(height).min(max_height).floor();
    }
    let x = ((f64::from(screen.width) - w) / 2.0).floor();
    let y = ((f64::from(screen.height) - h) / 2.0).floor();
    format!("height={h},width={w},resizable=yes,scrollbars=yes,left={x},top={y}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{MemoryWindow, Screen};

    #[test]
    fn features_are_centered_and_capped() {
        let win = MemoryWindow::top_level("https://client.example");
        assert_eq!(
            build_features(win.as_ref(), &OpenOptions::default()),
            "height=600,width=600,resizable=yes,scrollbars=yes,left=660,top=240"
        );
    }

    #[test]
    fn requested_size_is_clamped_to_available_space() {
        let win = MemoryWindow::top_level("https://client.example");
        win.set_outer_size(1124, 868);
        win.set_screen(Screen {
            width: 1280,
            height: 800,
            avail_width: 0,
            avail_height: 760,
        });
        let options = OpenOptions {
            width: Some(800),
            height: Some(2000),
            ..OpenOptions::default()
        };
        // Chrome of 100x100 leaves 1180x660.
        assert_eq!(
            build_features(win.as_ref(), &options),
            "height=660,width=800,resizable=yes,scrollbars=yes,left=240,top=70"
        );
    }
}
