#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use activities_core::{ActivityError, ActivityMode, ActivityResultCode};
use activities_host::config::ActivitiesConfig;
use activities_host::env::{Listener, MemorySizeContainer, MemoryWindow, Window, WindowRef};
use activities_host::host::{ActivityHost, ActivityIframeHost, HostRef};
use activities_host::port::ActivityIframePort;

use support::*;

struct Session {
    client: Arc<MemoryWindow>,
    frame: Arc<MemoryWindow>,
    port: ActivityIframePort,
    host: HostRef,
    /// Raw view of every window message the client receives.
    client_listener: Listener,
}

async fn session(config: ActivitiesConfig) -> Session {
    let client = MemoryWindow::top_level(CLIENT_ORIGIN);
    let frame = MemoryWindow::child_of(&client, ACTIVITY_ORIGIN);
    let client_listener = client.listen();
    let port = ActivityIframePort::new(
        client.clone() as WindowRef,
        frame.clone() as WindowRef,
        ACTIVITY_URL,
        Some(json!({"amount": 42})),
    )
    .unwrap();

    let client_port = port.clone();
    let connecting = tokio::spawn(async move { client_port.connect().await });
    settle().await;

    let host = ActivityIframeHost::new(frame.clone() as WindowRef, &config)
        .connect(None)
        .await
        .unwrap();
    connecting.await.unwrap().unwrap();
    Session {
        client,
        frame,
        port,
        host,
        client_listener,
    }
}

#[tokio::test]
async fn handshake_exposes_args_and_verified_origin() {
    let s = session(ActivitiesConfig::default()).await;
    assert_eq!(s.host.mode(), ActivityMode::Iframe);
    assert_eq!(s.host.args().unwrap(), Some(json!({"amount": 42})));
    assert_eq!(s.host.target_origin().unwrap(), s.client.origin());
    assert!(s.host.is_target_origin_verified().unwrap());
    assert!(s.host.is_secure_channel());
    assert!(s.host.is_messaging_supported());
    assert_eq!(s.host.request_string().unwrap(), None);
}

#[tokio::test]
async fn interaction_requires_accept() {
    let s = session(ActivitiesConfig::default()).await;
    assert!(matches!(s.host.ready(), Err(ActivityError::NotAccepted)));
    assert!(matches!(s.host.message(json!(1)), Err(ActivityError::NotAccepted)));
    assert!(matches!(s.host.message_channel(None), Err(ActivityError::NotAccepted)));
}

#[tokio::test]
async fn result_before_accept_fails_and_after_accept_sends_once() {
    let mut s = session(ActivitiesConfig::default()).await;
    messages(&mut s.client_listener);

    assert!(matches!(s.host.result(json!({"x": 1})), Err(ActivityError::NotAccepted)));
    assert!(messages(&mut s.client_listener).is_empty());

    s.host.accept().unwrap();
    s.host.result(json!({"x": 1})).unwrap();
    let sent = messages(&mut s.client_listener);
    assert_eq!(commands(&sent), vec!["result"]);
    assert_eq!(
        envelope(&sent[0]).payload,
        Some(json!({"code": "ok", "data": {"x": 1}}))
    );

    let result = s.port.accept_result().await.unwrap();
    assert_eq!(result.code(), ActivityResultCode::Ok);
    assert_eq!(result.data(), Some(&json!({"x": 1})));
    assert_eq!(result.origin(), ACTIVITY_ORIGIN);
    assert!(result.origin_verified());
    assert!(result.secure_channel());
}

#[tokio::test]
async fn close_from_client_disconnects_host() {
    let s = session(ActivitiesConfig::default()).await;
    s.host.accept().unwrap();
    s.host.set_size_container(MemorySizeContainer::new(100));
    s.host.ready().unwrap();
    s.host.result(json!(true)).unwrap();

    s.port.accept_result().await.unwrap();
    settle().await;

    assert!(matches!(s.host.args(), Err(ActivityError::NotConnected)));
    assert_eq!(s.frame.listener_count(), 0);
}

#[tokio::test]
async fn cancel_and_failure_need_no_accept() {
    let s = session(ActivitiesConfig::default()).await;
    s.host.cancel().unwrap();
    assert!(matches!(s.port.accept_result().await, Err(ActivityError::Aborted)));

    let s = session(ActivitiesConfig::default()).await;
    s.host.failed("card declined").unwrap();
    match s.port.accept_result().await {
        Err(ActivityError::Failed(reason)) => assert_eq!(reason, "card declined"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn ready_reaches_client_with_initial_size() {
    let s = session(ActivitiesConfig::default()).await;
    let requested = Arc::new(Mutex::new(Vec::new()));
    let sink = requested.clone();
    s.port
        .on_resize_request(Arc::new(move |h: u32| sink.lock().unwrap().push(h)));

    s.host.accept().unwrap();
    s.host.set_size_container(MemorySizeContainer::new(320));
    s.host.ready().unwrap();

    s.port.when_ready().await.unwrap();
    settle().await;
    assert_eq!(*requested.lock().unwrap(), vec![320]);
}

#[tokio::test(start_paused = true)]
async fn resized_is_debounced_and_skips_unchanged_height() {
    let mut s = session(ActivitiesConfig::default()).await;
    let container = MemorySizeContainer::new(200);
    s.host.accept().unwrap();
    s.host.set_size_container(container.clone());
    s.host.ready().unwrap();
    messages(&mut s.client_listener);

    s.host.resized();
    s.host.resized();
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    assert!(messages(&mut s.client_listener).is_empty());

    container.set_height(450);
    s.host.resized();
    s.host.resized();
    settle().await;
    // Still inside the debounce window.
    assert!(messages(&mut s.client_listener).is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    let sent = messages(&mut s.client_listener);
    assert_eq!(commands(&sent), vec!["resize"]);
    assert_eq!(envelope(&sent[0]).payload, Some(json!({"height": 450})));
}

#[tokio::test(start_paused = true)]
async fn viewport_width_change_triggers_measurement() {
    let mut s = session(ActivitiesConfig::default()).await;
    let container = MemorySizeContainer::new(200);
    s.host.accept().unwrap();
    s.host.set_size_container(container.clone());
    s.host.ready().unwrap();
    messages(&mut s.client_listener);

    container.set_height(260);
    s.frame.resize_to(640, 768);
    settle().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(commands(&messages(&mut s.client_listener)), vec!["resize"]);

    // Height-only viewport change with the same width is not a trigger.
    container.set_height(300);
    s.frame.resize_to(640, 500);
    settle().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    assert!(messages(&mut s.client_listener).is_empty());
}

#[tokio::test]
async fn resized_reply_reports_allowed_height() {
    let s = session(ActivitiesConfig::default()).await;
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    s.host.on_resize_complete(Arc::new(move |allowed: u32, requested: u32, overflow: bool| {
        sink.lock().unwrap().push((allowed, requested, overflow));
    }));
    s.host.accept().unwrap();
    s.host.set_size_container(MemorySizeContainer::new(300));
    s.host.ready().unwrap();
    settle().await;

    s.port.resized(250).unwrap();
    settle().await;
    s.port.resized(300).unwrap();
    settle().await;
    assert_eq!(
        *reports.lock().unwrap(),
        vec![(250, 300, true), (300, 300, false)]
    );
}

#[tokio::test]
async fn messaging_over_upgraded_channel() {
    let config = ActivitiesConfig {
        accepts_channel: true,
        ..ActivitiesConfig::default()
    };
    let mut s = session(config).await;
    s.host.accept().unwrap();
    messages(&mut s.client_listener);

    let got = Arc::new(Mutex::new(Vec::new()));
    let sink = got.clone();
    s.port
        .on_message(Arc::new(move |p: serde_json::Value| sink.lock().unwrap().push(p)));
    s.host.message(json!({"step": "auth"})).unwrap();
    settle().await;
    assert_eq!(*got.lock().unwrap(), vec![json!({"step": "auth"})]);
    // Nothing travelled over window messaging.
    assert!(messages(&mut s.client_listener).is_empty());

    let offered = s.host.message_channel(Some("card")).unwrap();
    let asked = s.port.message_channel(Some("card")).await.unwrap();
    let mut rx = offered.take_receiver().unwrap();
    asked.post_message(json!("pan"), vec![]);
    assert_eq!(rx.recv().await.unwrap().data, json!("pan"));
}

#[tokio::test]
async fn failed_connect_releases_listener_and_allows_retry() {
    // A top-level window has no parent to send "connect" to.
    let orphan = MemoryWindow::top_level(ACTIVITY_ORIGIN);
    let host = ActivityIframeHost::new(orphan.clone() as WindowRef, &ActivitiesConfig::default());

    assert!(matches!(host.connect(None).await, Err(ActivityError::NotConnected)));
    assert_eq!(orphan.listener_count(), 0);
    // Retrying fails the same way instead of reporting a stale connection.
    assert!(matches!(host.connect(None).await, Err(ActivityError::NotConnected)));
    assert_eq!(orphan.listener_count(), 0);
}

#[test]
fn ready_outside_runtime_fails_without_sending() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut s = rt.block_on(session(ActivitiesConfig::default()));
    rt.block_on(settle());
    messages(&mut s.client_listener);

    s.host.accept().unwrap();
    assert!(matches!(s.host.ready(), Err(ActivityError::Internal(_))));
    assert!(messages(&mut s.client_listener).is_empty());
}
