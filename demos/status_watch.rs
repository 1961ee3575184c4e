//! Status Watch Demo
//!
//! Drives a full session lifecycle against the in-process platform and prints
//! every canonical status broadcast plus the composed statistics record.
//!
//! ```bash
//! cargo run --example status_watch
//! ```

use std::sync::Arc;
use std::time::Duration;

use libtunnelctl::{
    ConnectRequest, InitOptions, MemoryPlatform, MemoryStore, NativeStatus, SessionController,
    SharedStore,
};
use serde_json::json;
use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let platform = Arc::new(MemoryPlatform::new());
    let store = Arc::new(MemoryStore::new());
    let session = SessionController::new(platform.clone(), store.clone());

    let status = session
        .initialize(InitOptions {
            provider_bundle_identifier: "com.example.tunnel".to_string(),
            localized_description: "Demo VPN".to_string(),
            group_identifier: "group.example".to_string(),
        })
        .await
        .expect("initialize failed");
    info!("Initialized, current status: {}", status);

    let mut subscription = session.subscribe();
    let watcher = tokio::spawn(async move {
        while let Some(status) = subscription.recv().await {
            println!("status -> {}", status);
        }
    });

    session
        .connect(ConnectRequest {
            config: "remote demo.example.org 1194".to_string(),
            username: None,
            password: None,
        })
        .await
        .expect("connect failed");

    // Simulate the OS finishing the handshake and the privileged process
    // publishing statistics
    sleep(Duration::from_millis(200)).await;
    platform.set_status(NativeStatus::CONNECTED);
    store
        .set(
            "group.example",
            "vpn_statistics",
            json!({
                "connected_on": "2026-08-30 12:00:00",
                "byte_in": 1024u64,
                "byte_out": 512u64,
                "packets_in": 10u64,
                "packets_out": 8u64,
            }),
        )
        .await;
    platform.signal_stats("group.example");
    sleep(Duration::from_millis(200)).await;

    if let Some(update) = session.connection_update().await {
        println!("connection update -> {}", update);
    }

    session.disconnect().await;
    sleep(Duration::from_millis(200)).await;

    session.dispose().await;
    let _ = watcher.await;
}
