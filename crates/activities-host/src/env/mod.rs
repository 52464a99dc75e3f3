//! Window environment seam.
//!
//! Hosts and the messenger never talk to a browser directly; they go through
//! the `Window` trait. `memory::MemoryWindow` is the in-process implementation
//! used by the demo binary and the test suite. An embedder bridging real
//! browser windows (or another IPC transport) implements the same trait.

pub mod memory;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use activities_core::Result;

use crate::channel::MessagePort;

pub use memory::{MemorySizeContainer, MemoryWindow, Navigation, OpenPolicy, OpenedWindow};

pub type WindowRef = Arc<dyn Window>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A delivered `postMessage`.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Origin of the sending window, filled in by the environment.
    pub origin: String,
    pub source: Option<WindowId>,
    pub data: Value,
    pub ports: Vec<MessagePort>,
}

#[derive(Debug, Clone)]
pub enum WindowEvent {
    Message(MessageEvent),
    Resize,
    Unload,
}

/// `window.screen` metrics, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
    /// Zero when the environment does not report it.
    pub avail_width: u32,
    pub avail_height: u32,
}

/// Event subscription handed out by `Window::listen`.
#[derive(Debug)]
pub struct Listener {
    pub id: ListenerId,
    pub events: mpsc::UnboundedReceiver<WindowEvent>,
}

pub trait Window: Send + Sync {
    fn id(&self) -> WindowId;

    /// Serialized origin of the document in this window.
    fn origin(&self) -> String;

    /// Embedding window, `None` for a top-level window.
    fn parent(&self) -> Option<WindowRef>;

    /// Id of the top-level window of this window's frame tree.
    fn top_id(&self) -> WindowId;

    fn opener(&self) -> Option<WindowRef>;

    fn is_closed(&self) -> bool;

    /// Deliver `data` to this window on behalf of `source`. Messages whose
    /// `target_origin` is neither `*` nor this window's origin are dropped.
    fn post_message(
        &self,
        source: &dyn Window,
        data: Value,
        target_origin: &str,
        transfer: Vec<MessagePort>,
    );

    fn listen(&self) -> Listener;

    fn unlisten(&self, id: ListenerId);

    fn inner_width(&self) -> u32;

    fn inner_height(&self) -> u32;

    fn outer_width(&self) -> u32 {
        self.inner_width()
    }

    fn outer_height(&self) -> u32 {
        self.inner_height()
    }

    fn screen(&self) -> Screen;

    /// `location.href`, fragment included.
    fn location_href(&self) -> String;

    /// `location.hash`, including the leading `#` when present.
    fn location_hash(&self) -> String;

    /// `document.referrer`, `None` when empty.
    fn referrer(&self) -> Option<String>;

    /// Whether `location.replace` is available.
    fn can_replace_location(&self) -> bool {
        true
    }

    fn location_replace(&self, url: &str);

    fn location_assign(&self, url: &str);

    /// `history.replaceState` with a new fragment.
    fn replace_state_hash(&self, hash: &str);

    /// Best-effort `window.close()`.
    fn close(&self) -> Result<()>;

    /// `window.open(url, target, features)`. `None` when the environment
    /// refuses to open the window.
    fn open(&self, url: &str, target: &str, features: &str) -> Option<WindowRef>;
}

/// Element whose `scrollHeight` drives resize requests.
pub trait SizeContainer: Send + Sync {
    fn scroll_height(&self) -> u32;
}
