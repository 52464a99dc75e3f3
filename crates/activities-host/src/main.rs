//! Activities demo
//!
//! Runs an iframe activity and then a popup activity end to end over
//! in-memory windows: handshake, accept, ready, result, close.
//!
//! Config is read from `ACTIVITIES_CONFIG` when set, else defaults apply.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::oneshot;
use tracing_subscriber::{fmt, EnvFilter};

use activities_core::{ActivityError, Result};
use activities_host::config::{self, ActivitiesConfig};
use activities_host::env::{MemorySizeContainer, MemoryWindow, WindowRef};
use activities_host::port::{ActivityIframePort, PortRef};
use activities_host::{ActivityHosts, ActivityPorts};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cfg = match std::env::var("ACTIVITIES_CONFIG") {
        Ok(path) => config::load_from_file(&path)?,
        Err(_) => ActivitiesConfig::default(),
    };
    tracing::info!(version = ActivityHosts::VERSION, accepts_channel = cfg.accepts_channel, "activities demo starting");
    let cfg = Arc::new(cfg);

    iframe_demo(Arc::clone(&cfg)).await?;
    popup_demo(cfg).await
}

async fn iframe_demo(cfg: Arc<ActivitiesConfig>) -> Result<()> {
    let client = MemoryWindow::top_level("https://client.example");
    let frame = MemoryWindow::child_of(&client, "https://activity.example");

    let port = ActivityIframePort::new(
        client as WindowRef,
        frame.clone() as WindowRef,
        "https://activity.example/pay",
        Some(json!({ "amount": 42 })),
    )?;
    port.on_resize_request(Arc::new(|height| tracing::info!(height, "client: resize requested")));

    // The client listens before the activity document loads.
    let client_port = port.clone();
    let client_task = tokio::spawn(async move { client_port.connect().await });
    tokio::task::yield_now().await;

    let hosts = ActivityHosts::new(frame as WindowRef, cfg);
    let host = hosts.connect_host(None).await?;
    client_task
        .await
        .map_err(|e| ActivityError::Internal(format!("client task failed: {e}")))??;
    tracing::info!(
        mode = host.mode().as_str(),
        origin = %host.target_origin()?,
        args = ?host.args()?,
        "host: connected"
    );

    host.accept()?;
    host.set_size_container(MemorySizeContainer::new(480));
    host.ready()?;
    port.when_ready().await?;
    host.result(json!({ "paid": true }))?;

    let result = port.accept_result().await?;
    tracing::info!(
        code = result.code().as_str(),
        data = ?result.data(),
        origin = result.origin(),
        "client: result received"
    );
    Ok(())
}

async fn popup_demo(cfg: Arc<ActivitiesConfig>) -> Result<()> {
    let client = MemoryWindow::top_level("https://client.example");
    client.set_href("https://client.example/checkout");
    let ports = ActivityPorts::new(client as WindowRef);

    let (tx, rx) = oneshot::channel::<PortRef>();
    let tx = Mutex::new(Some(tx));
    ports.on_result(
        "order-1",
        Arc::new(move |port: PortRef| {
            if let Some(tx) = tx.lock().ok().and_then(|mut t| t.take()) {
                let _ = tx.send(port);
            }
        }),
    );

    let popup = ports
        .open("order-1", "https://activity.example/pay", "_blank", Some(json!({ "amount": 7 })), None)?
        .ok_or_else(|| ActivityError::Internal("popup not opened".into()))?;
    let host = ActivityHosts::new(popup, cfg).connect_host(None).await?;
    tracing::info!(mode = host.mode().as_str(), args = ?host.args()?, "popup host: connected");
    host.accept()?;
    host.result(json!({ "paid": true }))?;

    let port = rx
        .await
        .map_err(|_| ActivityError::Internal("result handler dropped".into()))?;
    let result = port.accept_result().await?;
    tracing::info!(
        code = result.code().as_str(),
        data = ?result.data(),
        secure = result.secure_channel(),
        "client: popup result received"
    );
    Ok(())
}
