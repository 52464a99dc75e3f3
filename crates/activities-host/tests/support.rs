#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use activities_core::{Command, Envelope};
use activities_host::env::{Listener, MessageEvent, WindowEvent};
use activities_host::messenger::CommandHandler;

pub const CLIENT_ORIGIN: &str = "https://client.example";
pub const ACTIVITY_ORIGIN: &str = "https://activity.example";
pub const ACTIVITY_URL: &str = "https://activity.example/pay";

/// Let spawned listener tasks drain their queues.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Message events seen so far by a raw window listener.
pub fn messages(listener: &mut Listener) -> Vec<MessageEvent> {
    let mut out = Vec::new();
    while let Ok(event) = listener.events.try_recv() {
        if let WindowEvent::Message(m) = event {
            out.push(m);
        }
    }
    out
}

pub fn envelope(event: &MessageEvent) -> Envelope {
    Envelope::from_value(&event.data).unwrap()
}

pub fn commands(events: &[MessageEvent]) -> Vec<String> {
    events.iter().map(|e| envelope(e).cmd).collect()
}

pub fn frame(cmd: Command, payload: Option<Value>) -> Value {
    Envelope::new(cmd, payload).to_value()
}

pub type Recorded = mpsc::UnboundedReceiver<(Command, Option<Value>)>;

/// Command handler that forwards everything to a queue.
pub fn recorder() -> (CommandHandler, Recorded) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: CommandHandler = Arc::new(move |cmd: Command, payload: Option<Value>| {
        let _ = tx.send((cmd, payload));
    });
    (handler, rx)
}

pub fn drain(rx: &mut Recorded) -> Vec<(Command, Option<Value>)> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}
