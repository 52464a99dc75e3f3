#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod support;

use std::sync::{Arc, Mutex};

use serde_json::json;

use activities_core::{ActivityError, Command, SENTINEL};
use activities_host::channel::MessageChannel;
use activities_host::env::{MemoryWindow, Window, WindowRef};
use activities_host::messenger::{MessageTarget, Messenger};

use support::*;

struct Pair {
    client: Arc<MemoryWindow>,
    frame: Arc<MemoryWindow>,
    /// Activity-side messenger in `frame`, talking to `client`.
    host: Messenger,
}

fn pair() -> Pair {
    let client = MemoryWindow::top_level(CLIENT_ORIGIN);
    let frame = MemoryWindow::child_of(&client, ACTIVITY_ORIGIN);
    let host = Messenger::new(
        frame.clone() as WindowRef,
        MessageTarget::Window(client.clone() as WindowRef),
        None,
    );
    Pair { client, frame, host }
}

#[tokio::test]
async fn first_start_pins_origin_and_later_foreign_frames_are_dropped() {
    let Pair { client, frame, host } = pair();
    let (handler, mut rx) = recorder();
    host.connect(handler).unwrap();
    assert!(!host.is_connected());

    frame.post_message(client.as_ref(), frame_value(Command::Start, json!({"a": 1})), "*", vec![]);
    settle().await;
    assert_eq!(host.target_origin().unwrap(), CLIENT_ORIGIN);
    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, Command::Start);

    let evil = MemoryWindow::top_level("https://evil.example");
    let (p1, p2) = MessageChannel::new();
    frame.post_message(evil.as_ref(), frame_value(Command::Start, json!({"b": 2})), "*", vec![p2]);
    frame.post_message(evil.as_ref(), frame_value(Command::Cnset, json!({"name": "x"})), "*", vec![]);
    frame.post_message(evil.as_ref(), frame_value(Command::Ready, json!({})), "*", vec![]);
    settle().await;

    assert!(drain(&mut rx).is_empty());
    assert_eq!(host.target_origin().unwrap(), CLIENT_ORIGIN);
    // The foreign port was never adopted: outbound traffic stays on the window.
    let mut evil_rx = p1.take_receiver().unwrap();
    let mut client_listener = client.listen();
    host.custom_message(json!({"hello": 1})).unwrap();
    assert!(evil_rx.try_recv().is_err());
    assert_eq!(commands(&messages(&mut client_listener)), vec!["msg"]);
}

#[tokio::test]
async fn unpinned_messenger_ignores_non_target_sources() {
    let Pair { frame, host, .. } = pair();
    let (handler, mut rx) = recorder();
    host.connect(handler).unwrap();

    let stranger = MemoryWindow::top_level("https://stranger.example");
    frame.post_message(stranger.as_ref(), frame_value(Command::Ready, json!({})), "*", vec![]);
    settle().await;

    assert!(drain(&mut rx).is_empty());
    assert!(!host.is_connected());
    assert!(matches!(host.target_origin(), Err(ActivityError::NotConnected)));
}

#[tokio::test]
async fn frame_from_target_window_pins_origin() {
    let Pair { client, frame, host } = pair();
    let (handler, mut rx) = recorder();
    host.connect(handler).unwrap();

    frame.post_message(client.as_ref(), frame_value(Command::Close, json!({})), "*", vec![]);
    settle().await;

    assert_eq!(host.target_origin().unwrap(), CLIENT_ORIGIN);
    assert_eq!(drain(&mut rx)[0].0, Command::Close);
}

#[tokio::test]
async fn double_connect_is_rejected_and_disconnect_is_idempotent() {
    let Pair { frame, host, .. } = pair();
    let (handler, _rx) = recorder();
    host.connect(handler.clone()).unwrap();
    assert!(matches!(host.connect(handler), Err(ActivityError::AlreadyConnected)));
    assert_eq!(frame.listener_count(), 1);

    host.disconnect();
    host.disconnect();
    assert_eq!(frame.listener_count(), 0);
}

#[tokio::test]
async fn only_connect_may_be_sent_before_origin_is_known() {
    let Pair { client, host, .. } = pair();
    let (handler, _rx) = recorder();
    host.connect(handler).unwrap();
    let mut listener = client.listen();

    assert!(matches!(
        host.send_command(Command::Ready, Some(json!({})), vec![]),
        Err(ActivityError::NotConnected)
    ));
    host.send_connect_command(true).unwrap();

    let sent = messages(&mut listener);
    assert_eq!(commands(&sent), vec!["connect"]);
    assert_eq!(envelope(&sent[0]).payload, Some(json!({"acceptsChannel": true})));
    assert_eq!(sent[0].origin, ACTIVITY_ORIGIN);
}

#[tokio::test]
async fn start_channel_twice_returns_same_port_with_one_cnset() {
    let Pair { client, frame, host } = pair();
    let (handler, _rx) = recorder();
    host.connect(handler).unwrap();
    let mut listener = client.listen();

    // Not connected yet: nothing goes out and the far end is kept.
    assert!(host.start_channel(Some("x")).is_err());

    frame.post_message(client.as_ref(), frame_value(Command::Start, json!({})), "*", vec![]);
    settle().await;

    let a = host.start_channel(Some("x")).unwrap();
    let b = host.start_channel(Some("x")).unwrap();
    assert!(a.same_port(&b));

    let sent = messages(&mut listener);
    assert_eq!(commands(&sent), vec!["cnset"]);
    assert_eq!(envelope(&sent[0]).payload, Some(json!({"name": "x"})));
    assert_eq!(sent[0].ports.len(), 1);

    // The transferred end is entangled with the returned port.
    let mut far = sent[0].ports[0].take_receiver().unwrap();
    a.post_message(json!("ping"), vec![]);
    assert_eq!(far.try_recv().unwrap().data, json!("ping"));
}

/// The client answers `connect {acceptsChannel: true}` with `start` plus a
/// port, and traffic moves to that port.
#[tokio::test]
async fn start_upgrades_to_port_when_channel_accepted() {
    let client = MemoryWindow::top_level(CLIENT_ORIGIN);
    let frame = MemoryWindow::child_of(&client, ACTIVITY_ORIGIN);
    let responder = Messenger::new(
        client.clone() as WindowRef,
        MessageTarget::Window(frame.clone() as WindowRef),
        Some(ACTIVITY_ORIGIN.to_string()),
    );
    let (handler, mut rx) = recorder();
    responder.connect(handler).unwrap();
    let mut frame_listener = frame.listen();

    client.post_message(
        frame.as_ref(),
        frame_value(Command::Connect, json!({"acceptsChannel": true})),
        "*",
        vec![],
    );
    settle().await;
    assert_eq!(drain(&mut rx)[0].0, Command::Connect);

    responder.send_start_command(Some(json!({"foo": "bar"}))).unwrap();
    let sent = messages(&mut frame_listener);
    assert_eq!(commands(&sent), vec!["start"]);
    assert_eq!(envelope(&sent[0]).payload, Some(json!({"foo": "bar"})));
    assert_eq!(sent[0].ports.len(), 1);
    let port = sent[0].ports[0].clone();
    let mut port_rx = port.take_receiver().unwrap();

    responder
        .send_command(Command::Msg, Some(json!({"hello": 1})), vec![])
        .unwrap();
    let on_port = port_rx.try_recv().unwrap();
    assert_eq!(
        on_port.data,
        json!({"sentinel": SENTINEL, "cmd": "msg", "payload": {"hello": 1}})
    );
    assert!(messages(&mut frame_listener).is_empty());

    // Window frames other than connect/start are ignored after the upgrade.
    let got = Arc::new(Mutex::new(Vec::new()));
    let sink = got.clone();
    responder.on_custom_message(Arc::new(move |p: serde_json::Value| sink.lock().unwrap().push(p)));
    client.post_message(frame.as_ref(), frame_value(Command::Msg, json!({"via": "window"})), "*", vec![]);
    port.post_message(json!({"cmd": "msg", "payload": {"via": "port"}}), vec![]);
    settle().await;
    assert_eq!(*got.lock().unwrap(), vec![json!({"via": "port"})]);
}

#[tokio::test]
async fn reconnect_closes_current_port() {
    let client = MemoryWindow::top_level(CLIENT_ORIGIN);
    let frame = MemoryWindow::child_of(&client, ACTIVITY_ORIGIN);
    let responder = Messenger::new(
        client.clone() as WindowRef,
        MessageTarget::Window(frame.clone() as WindowRef),
        Some(ACTIVITY_ORIGIN.to_string()),
    );
    let (handler, _rx) = recorder();
    responder.connect(handler).unwrap();
    let mut frame_listener = frame.listen();

    let connect = frame_value(Command::Connect, json!({"acceptsChannel": true}));
    client.post_message(frame.as_ref(), connect.clone(), "*", vec![]);
    settle().await;
    responder.send_start_command(None).unwrap();
    let first = messages(&mut frame_listener)[0].ports[0].clone();
    assert!(first.is_open());

    // A refreshed activity says "connect" again over the window.
    client.post_message(frame.as_ref(), connect, "*", vec![]);
    settle().await;
    assert!(!first.is_open());
}

#[tokio::test]
async fn ask_channel_resolves_with_the_peer_port() {
    let client = MemoryWindow::top_level(CLIENT_ORIGIN);
    let frame = MemoryWindow::child_of(&client, ACTIVITY_ORIGIN);
    let client_side = Messenger::new(
        client.clone() as WindowRef,
        MessageTarget::Window(frame.clone() as WindowRef),
        Some(ACTIVITY_ORIGIN.to_string()),
    );
    let host_side = Messenger::new(
        frame.clone() as WindowRef,
        MessageTarget::Window(client.clone() as WindowRef),
        None,
    );
    let (client_handler, mut client_rx) = recorder();
    let (host_handler, _host_rx) = recorder();
    client_side.connect(client_handler).unwrap();
    host_side.connect(host_handler).unwrap();

    host_side.send_connect_command(false).unwrap();
    settle().await;
    assert_eq!(drain(&mut client_rx)[0].0, Command::Connect);
    client_side.send_start_command(None).unwrap();
    settle().await;
    assert!(host_side.is_connected());

    let asked = client_side.ask_channel(Some("pay")).await.unwrap();
    let offered = host_side.start_channel(Some("pay")).unwrap();

    let mut asked_rx = asked.take_receiver().unwrap();
    offered.post_message(json!({"step": 1}), vec![]);
    assert_eq!(asked_rx.recv().await.unwrap().data, json!({"step": 1}));
}

#[tokio::test]
async fn lazy_target_resolves_on_first_use() {
    let client = MemoryWindow::top_level(CLIENT_ORIGIN);
    let frame = MemoryWindow::child_of(&client, ACTIVITY_ORIGIN);
    let parent_of = frame.clone();
    let host = Messenger::new(
        frame.clone() as WindowRef,
        MessageTarget::Lazy(Arc::new(move || parent_of.parent())),
        None,
    );
    assert!(host.target().is_err());

    let (handler, _rx) = recorder();
    host.connect(handler).unwrap();
    assert_eq!(host.target().unwrap().id(), client.id());
}

fn frame_value(cmd: Command, payload: serde_json::Value) -> serde_json::Value {
    frame(cmd, Some(payload))
}

#[test]
fn channel_upgrade_outside_runtime_fails_without_sending() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let client = MemoryWindow::top_level(CLIENT_ORIGIN);
    let frame = MemoryWindow::child_of(&client, ACTIVITY_ORIGIN);
    let responder = Messenger::new(
        client.clone() as WindowRef,
        MessageTarget::Window(frame.clone() as WindowRef),
        Some(ACTIVITY_ORIGIN.to_string()),
    );
    let mut frame_listener = frame.listen();
    rt.block_on(async {
        let (handler, _rx) = recorder();
        responder.connect(handler).unwrap();
        client.post_message(
            frame.as_ref(),
            frame_value(Command::Connect, json!({"acceptsChannel": true})),
            "*",
            vec![],
        );
        settle().await;
    });
    // Drop the raw copy of the inbound "connect".
    messages(&mut frame_listener);

    assert!(matches!(
        responder.send_start_command(None),
        Err(ActivityError::Internal(_))
    ));
    assert!(messages(&mut frame_listener).is_empty());
}
