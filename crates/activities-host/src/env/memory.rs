//! In-memory window tree.
//!
//! Mirrors the bits of browser behavior the protocol depends on: frame
//! hierarchy, opener links, origin-filtered `postMessage`, and the
//! `resize`/`unload` events. Everything is delivered through unbounded tokio
//! channels, so per-listener ordering is FIFO like a browser task queue.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use activities_core::fragment::{fragment_of, origin_of, remove_fragment};
use activities_core::Result;

use crate::channel::MessagePort;
use crate::env::{
    Listener, ListenerId, MessageEvent, Screen, SizeContainer, Window, WindowEvent, WindowId,
    WindowRef,
};
use crate::sync::lock;

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Recorded top-level navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Replace(String),
    Assign(String),
}

/// How `open` behaves, standing in for popup blockers and embedded web views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenPolicy {
    #[default]
    Allow,
    /// Only `_top` navigations succeed.
    TopOnly,
    Block,
}

/// A successful `open` call.
#[derive(Clone)]
pub struct OpenedWindow {
    pub url: String,
    pub target: String,
    pub features: String,
    pub window: Arc<MemoryWindow>,
}

pub struct MemoryWindow {
    me: Weak<MemoryWindow>,
    id: WindowId,
    origin: String,
    parent: Option<Arc<MemoryWindow>>,
    top_id: WindowId,
    opener: Option<Arc<MemoryWindow>>,
    state: Mutex<WindowState>,
}

struct WindowState {
    listeners: Vec<(ListenerId, mpsc::UnboundedSender<WindowEvent>)>,
    /// `location.href` without the fragment.
    href: String,
    hash: String,
    referrer: Option<String>,
    width: u32,
    height: u32,
    outer: Option<(u32, u32)>,
    screen: Screen,
    closed: bool,
    replace_supported: bool,
    open_policy: OpenPolicy,
    navigations: Vec<Navigation>,
    opened: Vec<OpenedWindow>,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            href: String::new(),
            hash: String::new(),
            referrer: None,
            width: 1024,
            height: 768,
            outer: None,
            screen: Screen {
                width: 1920,
                height: 1080,
                avail_width: 1920,
                avail_height: 1040,
            },
            closed: false,
            replace_supported: true,
            open_policy: OpenPolicy::Allow,
            navigations: Vec::new(),
            opened: Vec::new(),
        }
    }
}

impl MemoryWindow {
    fn build(origin: &str, parent: Option<Arc<MemoryWindow>>, opener: Option<Arc<MemoryWindow>>) -> Arc<Self> {
        let id = WindowId(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed));
        let top_id = parent.as_ref().map(|p| p.top_id).unwrap_or(id);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id,
            origin: origin.to_string(),
            parent,
            top_id,
            opener,
            state: Mutex::new(WindowState {
                href: format!("{origin}/"),
                ..WindowState::default()
            }),
        })
    }

    /// A top-level browsing context with no opener.
    pub fn top_level(origin: &str) -> Arc<Self> {
        Self::build(origin, None, None)
    }

    /// An iframe embedded in `parent`.
    pub fn child_of(parent: &Arc<MemoryWindow>, origin: &str) -> Arc<Self> {
        Self::build(origin, Some(Arc::clone(parent)), None)
    }

    /// A top-level popup opened by `opener`.
    pub fn popup_of(opener: &Arc<MemoryWindow>, origin: &str) -> Arc<Self> {
        Self::build(origin, None, Some(Arc::clone(opener)))
    }

    /// An iframe that also reports an opener.
    pub fn child_with_opener(
        parent: &Arc<MemoryWindow>,
        opener: &Arc<MemoryWindow>,
        origin: &str,
    ) -> Arc<Self> {
        Self::build(origin, Some(Arc::clone(parent)), Some(Arc::clone(opener)))
    }

    /// Set `location.href`; its fragment becomes the location hash.
    pub fn set_href(&self, url: &str) {
        let mut st = lock(&self.state);
        st.href = remove_fragment(url).to_string();
        st.hash = fragment_of(url).to_string();
    }

    pub fn set_location_hash(&self, hash: &str) {
        lock(&self.state).hash = hash.to_string();
    }

    pub fn set_referrer(&self, referrer: Option<&str>) {
        lock(&self.state).referrer = referrer.map(str::to_string);
    }

    pub fn set_replace_supported(&self, supported: bool) {
        lock(&self.state).replace_supported = supported;
    }

    pub fn set_open_policy(&self, policy: OpenPolicy) {
        lock(&self.state).open_policy = policy;
    }

    pub fn set_screen(&self, screen: Screen) {
        lock(&self.state).screen = screen;
    }

    /// Outer window size; defaults to the viewport size.
    pub fn set_outer_size(&self, width: u32, height: u32) {
        lock(&self.state).outer = Some((width, height));
    }

    /// Windows handed out by `open`, oldest first.
    pub fn opened(&self) -> Vec<OpenedWindow> {
        lock(&self.state).opened.clone()
    }

    /// Change the viewport and fire `resize`.
    pub fn resize_to(&self, width: u32, height: u32) {
        {
            let mut st = lock(&self.state);
            st.width = width;
            st.height = height;
        }
        self.dispatch(WindowEvent::Resize);
    }

    pub fn fire_unload(&self) {
        self.dispatch(WindowEvent::Unload);
    }

    pub fn navigations(&self) -> Vec<Navigation> {
        lock(&self.state).navigations.clone()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    /// Mark the window closed without going through `close()`, as when the
    /// user dismisses a popup.
    pub fn mark_closed(&self) {
        lock(&self.state).closed = true;
    }

    /// Deliver an event to every live listener.
    pub fn dispatch(&self, event: WindowEvent) {
        let mut st = lock(&self.state);
        st.listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

impl Window for MemoryWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn origin(&self) -> String {
        self.origin.clone()
    }

    fn parent(&self) -> Option<WindowRef> {
        self.parent.clone().map(|p| p as WindowRef)
    }

    fn top_id(&self) -> WindowId {
        self.top_id
    }

    fn opener(&self) -> Option<WindowRef> {
        self.opener.clone().map(|o| o as WindowRef)
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn post_message(
        &self,
        source: &dyn Window,
        data: Value,
        target_origin: &str,
        transfer: Vec<MessagePort>,
    ) {
        if self.is_closed() {
            return;
        }
        if target_origin != "*" && target_origin != self.origin {
            tracing::debug!(
                target = %self.origin,
                requested = %target_origin,
                "postMessage target origin mismatch, dropped"
            );
            return;
        }
        self.dispatch(WindowEvent::Message(MessageEvent {
            origin: source.origin(),
            source: Some(source.id()),
            data,
            ports: transfer,
        }));
    }

    fn listen(&self) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        lock(&self.state).listeners.push((id, tx));
        Listener { id, events: rx }
    }

    fn unlisten(&self, id: ListenerId) {
        lock(&self.state).listeners.retain(|(lid, _)| *lid != id);
    }

    fn inner_width(&self) -> u32 {
        lock(&self.state).width
    }

    fn inner_height(&self) -> u32 {
        lock(&self.state).height
    }

    fn outer_width(&self) -> u32 {
        let st = lock(&self.state);
        st.outer.map_or(st.width, |(w, _)| w)
    }

    fn outer_height(&self) -> u32 {
        let st = lock(&self.state);
        st.outer.map_or(st.height, |(_, h)| h)
    }

    fn screen(&self) -> Screen {
        lock(&self.state).screen
    }

    fn location_href(&self) -> String {
        let st = lock(&self.state);
        format!("{}{}", st.href, st.hash)
    }

    fn location_hash(&self) -> String {
        lock(&self.state).hash.clone()
    }

    fn referrer(&self) -> Option<String> {
        lock(&self.state).referrer.clone().filter(|r| !r.is_empty())
    }

    fn can_replace_location(&self) -> bool {
        lock(&self.state).replace_supported
    }

    fn location_replace(&self, url: &str) {
        lock(&self.state).navigations.push(Navigation::Replace(url.to_string()));
    }

    fn location_assign(&self, url: &str) {
        lock(&self.state).navigations.push(Navigation::Assign(url.to_string()));
    }

    fn replace_state_hash(&self, hash: &str) {
        lock(&self.state).hash = hash.to_string();
    }

    fn close(&self) -> Result<()> {
        lock(&self.state).closed = true;
        Ok(())
    }

    /// `_top` navigates this window in place and returns it. Any other
    /// target opens a popup whose opener is this window.
    fn open(&self, url: &str, target: &str, features: &str) -> Option<WindowRef> {
        let me = self.me.upgrade()?;
        let policy = lock(&self.state).open_policy;
        let window = match (policy, target) {
            (OpenPolicy::Block, _) => return None,
            (_, "_top") => {
                lock(&self.state).navigations.push(Navigation::Assign(url.to_string()));
                me
            }
            (OpenPolicy::TopOnly, _) => return None,
            (OpenPolicy::Allow, _) => {
                let origin = origin_of(url).unwrap_or_else(|_| "null".to_string());
                let popup = MemoryWindow::popup_of(&me, &origin);
                popup.set_href(url);
                popup
            }
        };
        lock(&self.state).opened.push(OpenedWindow {
            url: url.to_string(),
            target: target.to_string(),
            features: features.to_string(),
            window: Arc::clone(&window),
        });
        Some(window as WindowRef)
    }
}

/// Size container with a settable `scrollHeight`.
#[derive(Debug, Default)]
pub struct MemorySizeContainer {
    height: AtomicU32,
}

impl MemorySizeContainer {
    pub fn new(height: u32) -> Arc<Self> {
        Arc::new(Self {
            height: AtomicU32::new(height),
        })
    }

    pub fn set_height(&self, height: u32) {
        self.height.store(height, Ordering::Relaxed);
    }
}

impl SizeContainer for MemorySizeContainer {
    fn scroll_height(&self) -> u32 {
        self.height.load(Ordering::Relaxed)
    }
}
