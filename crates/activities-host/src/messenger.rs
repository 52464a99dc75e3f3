//! Messenger: command transport between an activity host and its client.
//!
//! Starts on window messaging (`postMessage` with an explicit target origin)
//! and can be upgraded to a dedicated `MessageChannel` port during the
//! `connect`/`start` handshake. Named supplemental channels are negotiated
//! with `cnget`/`cnset`.
//!
//! Origin pinning: the first `start` frame, or the first frame whose source
//! is the configured target window, fixes the target origin. From then on
//! frames from any other origin are dropped without touching state.

use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use activities_core::error::{ActivityError, Result};
use activities_core::protocol::envelope::{to_payload, ChannelPayload, ConnectPayload};
use activities_core::{Command, Envelope};

use crate::channel::{MessageChannel, MessagePort, PortMessage};
use crate::env::{ListenerId, MessageEvent, WindowEvent, WindowRef};
use crate::sync::{lock, runtime};

/// Receives every protocol command not consumed by the messenger itself.
pub type CommandHandler = Arc<dyn Fn(Command, Option<Value>) + Send + Sync>;

/// Receives custom (`msg`) payloads.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Where outbound window messages go.
#[derive(Clone)]
pub enum MessageTarget {
    Window(WindowRef),
    /// Resolved on first use, e.g. an iframe whose content window appears later.
    Lazy(Arc<dyn Fn() -> Option<WindowRef> + Send + Sync>),
}

#[derive(Clone)]
pub struct Messenger {
    inner: Arc<Inner>,
}

struct Inner {
    win: WindowRef,
    target_spec: MessageTarget,
    state: Mutex<State>,
    channels: DashMap<String, ChannelHolder>,
}

#[derive(Default)]
struct State {
    /// Unknown (`None`) until pinned by the first verified frame.
    target_origin: Option<String>,
    target: Option<WindowRef>,
    accepts_channel: bool,
    port: Option<MessagePort>,
    port_task: Option<JoinHandle<()>>,
    on_command: Option<CommandHandler>,
    on_custom_message: Option<MessageHandler>,
    listener: Option<ListenerId>,
    listen_task: Option<JoinHandle<()>>,
}

struct ChannelHolder {
    port1: Option<MessagePort>,
    /// Present until transferred to the peer.
    port2: Option<MessagePort>,
    resolved: watch::Sender<Option<MessagePort>>,
}

impl ChannelHolder {
    fn new() -> Self {
        let (resolved, _) = watch::channel(None);
        Self {
            port1: None,
            port2: None,
            resolved,
        }
    }
}

impl Messenger {
    pub fn new(win: WindowRef, target: MessageTarget, target_origin: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                win,
                target_spec: target,
                state: Mutex::new(State {
                    target_origin,
                    ..State::default()
                }),
                channels: DashMap::new(),
            }),
        }
    }

    /// Start listening for window messages. Connecting twice is a
    /// programming error.
    pub fn connect(&self, on_command: CommandHandler) -> Result<()> {
        let rt = runtime()?;
        let mut st = lock(&self.inner.state);
        if st.on_command.is_some() {
            return Err(ActivityError::AlreadyConnected);
        }
        st.on_command = Some(on_command);

        let listener = self.inner.win.listen();
        st.listener = Some(listener.id);
        let weak = Arc::downgrade(&self.inner);
        let mut events = listener.events;
        st.listen_task = Some(rt.spawn(async move {
            while let Some(event) = events.recv().await {
                let WindowEvent::Message(event) = event else {
                    continue;
                };
                let Some(messenger) = upgrade(&weak) else {
                    break;
                };
                messenger.handle_event(event);
            }
        }));
        Ok(())
    }

    /// Stop listening and close every port. Repeated calls are no-ops.
    pub fn disconnect(&self) {
        let (port, listener, tasks) = {
            let mut st = lock(&self.inner.state);
            if st.on_command.take().is_none() {
                return;
            }
            (
                st.port.take(),
                st.listener.take(),
                [st.port_task.take(), st.listen_task.take()],
            )
        };
        if let Some(port) = port {
            port.close();
        }
        if let Some(id) = listener {
            self.inner.win.unlisten(id);
        }
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        for entry in self.inner.channels.iter() {
            if let Some(p) = &entry.port1 {
                p.close();
            }
            if let Some(p) = &entry.port2 {
                p.close();
            }
        }
        self.inner.channels.clear();
        tracing::debug!("messenger disconnected");
    }

    /// Whether the target origin is known.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state).target_origin.is_some()
    }

    /// Messaging target. Only available once connected.
    pub fn target(&self) -> Result<WindowRef> {
        self.optional_target().ok_or(ActivityError::NotConnected)
    }

    fn optional_target(&self) -> Option<WindowRef> {
        let mut st = lock(&self.inner.state);
        if st.on_command.is_some() && st.target.is_none() {
            st.target = match &self.inner.target_spec {
                MessageTarget::Window(w) => Some(Arc::clone(w)),
                MessageTarget::Lazy(resolve) => resolve(),
            };
        }
        st.target.clone()
    }

    /// Verified peer origin. Only available once connected.
    pub fn target_origin(&self) -> Result<String> {
        lock(&self.inner.state)
            .target_origin
            .clone()
            .ok_or(ActivityError::NotConnected)
    }

    /// Host -> client: listening. The client replies with `start`.
    pub fn send_connect_command(&self, accepts_channel: bool) -> Result<()> {
        let payload = to_payload(&ConnectPayload { accepts_channel })?;
        self.send_command(Command::Connect, Some(payload), Vec::new())
    }

    /// Client -> host, in reply to `connect`. Opens a dedicated port when the
    /// host accepts one.
    pub fn send_start_command(&self, args: Option<Value>) -> Result<()> {
        let accepts_channel = lock(&self.inner.state).accepts_channel;
        if !accepts_channel {
            return self.send_command(Command::Start, args, Vec::new());
        }
        let rt = runtime()?;
        let (port1, port2) = MessageChannel::new();
        self.send_command(Command::Start, args, vec![port2])?;
        // Switch only after "start" went out on window messaging, otherwise
        // it would never reach the host.
        self.switch_to_channel(port1, &rt);
        Ok(())
    }

    /// Send a command over the dedicated port when present, else by window
    /// messaging. Only `connect` may go out with a `*` target origin.
    pub fn send_command(
        &self,
        cmd: Command,
        payload: Option<Value>,
        transfer: Vec<MessagePort>,
    ) -> Result<()> {
        let data = Envelope::new(cmd, payload).to_value();
        let (port, known_origin) = {
            let st = lock(&self.inner.state);
            (st.port.clone(), st.target_origin.clone())
        };
        if let Some(port) = port {
            port.post_message(data, transfer);
            return Ok(());
        }
        let target = self.target()?;
        let target_origin = match (cmd, known_origin) {
            (_, Some(origin)) => origin,
            (Command::Connect, None) => "*".to_string(),
            (_, None) => return Err(ActivityError::NotConnected),
        };
        tracing::trace!(%cmd, %target_origin, "post command");
        target.post_message(self.inner.win.as_ref(), data, &target_origin, transfer);
        Ok(())
    }

    pub fn custom_message(&self, payload: Value) -> Result<()> {
        self.send_command(Command::Msg, Some(payload), Vec::new())
    }

    pub fn on_custom_message(&self, callback: MessageHandler) {
        lock(&self.inner.state).on_custom_message = Some(callback);
    }

    /// Create (or return) the named channel and hand its far end to the peer.
    /// The far end is transferred once; later calls only return the port.
    pub fn start_channel(&self, name: Option<&str>) -> Result<MessagePort> {
        let name = name.unwrap_or("").to_string();
        let (port1, unsent) = {
            let mut holder = self
                .inner
                .channels
                .entry(name.clone())
                .or_insert_with(ChannelHolder::new);
            if holder.port1.is_none() {
                let (port1, port2) = MessageChannel::new();
                holder.port1 = Some(port1.clone());
                holder.port2 = Some(port2);
                holder.resolved.send_replace(Some(port1));
            }
            (holder.port1.clone(), holder.port2.take())
        };

        if let Some(port2) = unsent {
            let payload = to_payload(&ChannelPayload { name: name.clone() })?;
            if let Err(e) = self.send_command(Command::Cnset, Some(payload), vec![port2.clone()]) {
                // Not sent: keep it for the next attempt.
                if let Some(mut holder) = self.inner.channels.get_mut(&name) {
                    holder.port2 = Some(port2);
                }
                return Err(e);
            }
        }
        port1.ok_or_else(|| ActivityError::Internal("channel without port".into()))
    }

    /// Ask the peer to open the named channel and wait for its port.
    pub async fn ask_channel(&self, name: Option<&str>) -> Result<MessagePort> {
        let name = name.unwrap_or("").to_string();
        let (known, mut resolved) = {
            let holder = self
                .inner
                .channels
                .entry(name.clone())
                .or_insert_with(ChannelHolder::new);
            (holder.port1.is_some(), holder.resolved.subscribe())
        };
        if !known {
            let payload = to_payload(&ChannelPayload { name })?;
            self.send_command(Command::Cnget, Some(payload), Vec::new())?;
        }
        loop {
            if let Some(port) = resolved.borrow_and_update().clone() {
                return Ok(port);
            }
            resolved
                .changed()
                .await
                .map_err(|_| ActivityError::NotConnected)?;
        }
    }

    fn receive_channel(&self, name: String, port: MessagePort) {
        let mut holder = self
            .inner
            .channels
            .entry(name)
            .or_insert_with(ChannelHolder::new);
        holder.port1 = Some(port.clone());
        holder.resolved.send_replace(Some(port));
    }

    fn switch_to_channel(&self, port: MessagePort, rt: &Handle) {
        let Some(mut rx) = port.take_receiver() else {
            tracing::warn!(port = port.id(), "port already consumed, staying on window messaging");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let task = rt.spawn(async move {
            while let Some(msg) = rx.recv().await {
                let Some(messenger) = upgrade(&weak) else {
                    break;
                };
                messenger.handle_port_message(msg);
            }
        });

        // The window listener stays installed so a refreshed peer can
        // reconnect with a fresh "connect"/"start".
        let (old_port, old_task) = {
            let mut st = lock(&self.inner.state);
            (st.port.replace(port), st.port_task.replace(task))
        };
        close_port(old_port, old_task);
    }

    fn handle_port_message(&self, msg: PortMessage) {
        let Some(env) = Envelope::from_port_value(&msg.data) else {
            return;
        };
        self.handle_command(env, msg.ports);
    }

    fn handle_event(&self, event: MessageEvent) {
        let Some(env) = Envelope::from_value(&event.data) else {
            return;
        };
        let cmd = env.command();
        let reconnect = matches!(cmd, Some(Command::Connect) | Some(Command::Start));
        {
            let mut st = lock(&self.inner.state);
            if st.port.is_some() && !reconnect {
                tracing::trace!(cmd = %env.cmd, "window frame ignored, port has taken over");
                return;
            }
            if st.target_origin.is_none() && cmd == Some(Command::Start) {
                st.target_origin = Some(event.origin.clone());
            }
        }
        if !self.is_connected() {
            if let Some(source) = event.source {
                if self.optional_target().is_some_and(|t| t.id() == source) {
                    lock(&self.inner.state).target_origin = Some(event.origin.clone());
                }
            }
        }
        // The source may differ from the target through friendly-iframe
        // intermediaries, so only the origin is authoritative.
        if lock(&self.inner.state).target_origin.as_deref() != Some(event.origin.as_str()) {
            tracing::debug!(origin = %event.origin, cmd = %env.cmd, "frame from unverified origin dropped");
            return;
        }
        self.handle_command(env, event.ports);
    }

    fn handle_command(&self, env: Envelope, ports: Vec<MessagePort>) {
        let Some(cmd) = env.command() else {
            tracing::debug!(cmd = %env.cmd, "unknown command ignored");
            return;
        };
        match cmd {
            Command::Connect => {
                let accepts_channel = env
                    .payload_as::<ConnectPayload>()
                    .map(|p| p.accepts_channel)
                    .unwrap_or(false);
                let (old_port, old_task) = {
                    let mut st = lock(&self.inner.state);
                    st.accepts_channel = accepts_channel;
                    // A reconnect closes the current port; "start" reopens it.
                    (st.port.take(), st.port_task.take())
                };
                close_port(old_port, old_task);
                self.dispatch(cmd, env.payload);
            }
            Command::Start => {
                if let Some(port) = ports.into_iter().next() {
                    match runtime() {
                        Ok(rt) => self.switch_to_channel(port, &rt),
                        Err(e) => tracing::warn!(error = %e, "port not adopted"),
                    }
                }
                self.dispatch(cmd, env.payload);
            }
            Command::Msg => {
                let callback = lock(&self.inner.state).on_custom_message.clone();
                if let (Some(callback), Some(payload)) = (callback, env.payload) {
                    callback(payload);
                }
            }
            Command::Cnget => match env.payload_as::<ChannelPayload>() {
                Ok(p) => {
                    if let Err(e) = self.start_channel(Some(&p.name)) {
                        tracing::debug!(error = %e, name = %p.name, "cnget not served");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "malformed cnget"),
            },
            Command::Cnset => {
                let name = match env.payload_as::<ChannelPayload>() {
                    Ok(p) => p.name,
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed cnset");
                        return;
                    }
                };
                match ports.into_iter().next() {
                    Some(port) => self.receive_channel(name, port),
                    None => tracing::debug!(%name, "cnset without port"),
                }
            }
            _ => self.dispatch(cmd, env.payload),
        }
    }

    fn dispatch(&self, cmd: Command, payload: Option<Value>) {
        let handler = lock(&self.inner.state).on_command.clone();
        if let Some(handler) = handler {
            handler(cmd, payload);
        }
    }

    /// Convenience for hosts sending an empty-object payload.
    pub(crate) fn send_empty(&self, cmd: Command) -> Result<()> {
        self.send_command(cmd, Some(json!({})), Vec::new())
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<Messenger> {
    weak.upgrade().map(|inner| Messenger { inner })
}

fn close_port(port: Option<MessagePort>, task: Option<JoinHandle<()>>) {
    if let Some(port) = port {
        port.close();
    }
    if let Some(task) = task {
        task.abort();
    }
}
