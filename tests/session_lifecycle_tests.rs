//! Session Lifecycle Integration Tests
//!
//! Exercises the full controller stack (profile manager, stats synchronizer,
//! observer registry) against the in-process platform and store. No OS tunnel
//! facility is required.

use std::sync::Arc;
use std::time::Duration;

use libtunnelctl::store::CONNECTION_UPDATE_KEY;
use libtunnelctl::{
    ConnectRequest, InitOptions, MemoryPlatform, MemoryStore, NativeStatus, SessionController,
    SharedStore, StatusSubscription, TunnelError, TunnelPlatform, VpnStatus,
};
use serde_json::json;

const GROUP: &str = "group.app";

fn init_options() -> InitOptions {
    InitOptions {
        provider_bundle_identifier: "com.app.tunnel".to_string(),
        localized_description: "My VPN".to_string(),
        group_identifier: GROUP.to_string(),
    }
}

fn connect_request() -> ConnectRequest {
    ConnectRequest {
        config: "remote 1.2.3.4".to_string(),
        username: None,
        password: None,
    }
}

fn controller() -> (SessionController, Arc<MemoryPlatform>, Arc<MemoryStore>) {
    let platform = Arc::new(MemoryPlatform::new());
    let store = Arc::new(MemoryStore::new());
    let session = SessionController::new(platform.clone(), store.clone());
    (session, platform, store)
}

async fn next_status(sub: &mut StatusSubscription) -> VpnStatus {
    tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out waiting for status broadcast")
        .expect("status stream closed")
}

// =============================================================================
// Initialize
// =============================================================================

#[tokio::test]
async fn test_initialize_returns_current_status() {
    let (session, _platform, _store) = controller();
    let status = session.initialize(init_options()).await.unwrap();
    assert_eq!(status, VpnStatus::Disconnected);
}

#[tokio::test]
async fn test_initialize_rejects_each_missing_field_without_io() {
    let (session, platform, _store) = controller();

    let mut opts = init_options();
    opts.provider_bundle_identifier = String::new();
    let err = session.initialize(opts).await.unwrap_err();
    assert!(matches!(
        err,
        TunnelError::MissingParameter("provider_bundle_identifier")
    ));

    let mut opts = init_options();
    opts.localized_description = "  ".to_string();
    let err = session.initialize(opts).await.unwrap_err();
    assert!(matches!(
        err,
        TunnelError::MissingParameter("localized_description")
    ));

    let mut opts = init_options();
    opts.group_identifier = String::new();
    let err = session.initialize(opts).await.unwrap_err();
    assert!(matches!(
        err,
        TunnelError::MissingParameter("group_identifier")
    ));

    // Validation failures must not touch the profile store
    assert_eq!(platform.store_calls(), 0);
}

// =============================================================================
// Connect
// =============================================================================

#[tokio::test]
async fn test_connect_before_initialize_fails() {
    let (session, _platform, _store) = controller();
    let err = session.connect(connect_request()).await.unwrap_err();
    assert!(matches!(err, TunnelError::NotInitialized));
}

#[tokio::test]
async fn test_connect_with_empty_config_fails() {
    let (session, _platform, _store) = controller();
    session.initialize(init_options()).await.unwrap();

    let mut request = connect_request();
    request.config = String::new();
    let err = session.connect(request).await.unwrap_err();
    assert!(matches!(err, TunnelError::MissingParameter("config")));
}

#[tokio::test]
async fn test_connect_persists_profile_and_starts_tunnel() {
    let (session, platform, _store) = controller();
    session.initialize(init_options()).await.unwrap();
    session.connect(connect_request()).await.unwrap();

    let profile = platform.load_profile().await.unwrap();
    assert!(profile.enabled);
    assert_eq!(
        profile.provider_configuration.get("vpn_config"),
        Some(&"remote 1.2.3.4".to_string())
    );
    assert_eq!(
        profile.provider_configuration.get("groupIdentifier"),
        Some(&GROUP.to_string())
    );
    assert_eq!(session.current_status().await, VpnStatus::Connecting);
}

#[tokio::test]
async fn test_denied_start_surfaces_as_permission_error() {
    let (session, platform, _store) = controller();
    session.initialize(init_options()).await.unwrap();
    platform.set_deny_start(true);

    let err = session.connect(connect_request()).await.unwrap_err();
    assert!(matches!(err, TunnelError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_connect_rejected_while_previous_connect_pending() {
    let (session, platform, _store) = controller();
    session.initialize(init_options()).await.unwrap();
    platform.set_start_delay(Duration::from_millis(200));

    let session = Arc::new(session);
    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(connect_request()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = session.connect(connect_request()).await.unwrap_err();
    assert!(matches!(err, TunnelError::InvalidState(_)));

    first.await.unwrap().unwrap();
}

// =============================================================================
// Disconnect
// =============================================================================

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (session, _platform, _store) = controller();

    // Never connected, never even initialized
    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.current_status().await, VpnStatus::Disconnected);
}

#[tokio::test]
async fn test_disconnect_clears_stale_connection_update() {
    let (session, _platform, store) = controller();
    session.initialize(init_options()).await.unwrap();

    store
        .set(GROUP, CONNECTION_UPDATE_KEY, json!("old-session-record"))
        .await;
    session.disconnect().await;

    assert_eq!(store.get(GROUP, CONNECTION_UPDATE_KEY).await, None);
}

// =============================================================================
// Status observation
// =============================================================================

#[tokio::test]
async fn test_subscriber_sees_replay_then_ordered_changes() {
    let (session, platform, _store) = controller();
    session.initialize(init_options()).await.unwrap();

    let mut sub = session.subscribe();
    // Replay of the status that preceded subscription
    assert_eq!(next_status(&mut sub).await, VpnStatus::Disconnected);

    session.connect(connect_request()).await.unwrap();
    assert_eq!(next_status(&mut sub).await, VpnStatus::Connecting);

    platform.set_status(NativeStatus::CONNECTED);
    assert_eq!(next_status(&mut sub).await, VpnStatus::Connected);
}

#[tokio::test]
async fn test_all_subscribers_receive_each_change_once() {
    let (session, platform, _store) = controller();
    session.initialize(init_options()).await.unwrap();

    let mut a = session.subscribe();
    let mut b = session.subscribe();
    assert_eq!(next_status(&mut a).await, VpnStatus::Disconnected);
    assert_eq!(next_status(&mut b).await, VpnStatus::Disconnected);

    platform.set_status(NativeStatus::REASSERTING);
    assert_eq!(next_status(&mut a).await, VpnStatus::Reasserting);
    assert_eq!(next_status(&mut b).await, VpnStatus::Reasserting);
}

#[tokio::test]
async fn test_force_status_check_broadcasts_current_state() {
    let (session, platform, _store) = controller();
    session.initialize(init_options()).await.unwrap();

    let mut sub = session.subscribe();
    assert_eq!(next_status(&mut sub).await, VpnStatus::Disconnected);

    // Move the OS state without a notification; only the forced check can
    // observe it
    platform.set_status_silent(NativeStatus::CONNECTED);
    let checked = session.force_status_check().await;
    assert_eq!(checked, VpnStatus::Connected);
    assert_eq!(next_status(&mut sub).await, VpnStatus::Connected);
}

#[tokio::test]
async fn test_dispose_stops_broadcasts() {
    let (session, platform, _store) = controller();
    session.initialize(init_options()).await.unwrap();

    let mut sub = session.subscribe();
    assert_eq!(next_status(&mut sub).await, VpnStatus::Disconnected);

    session.dispose().await;
    platform.set_status(NativeStatus::CONNECTED);

    // The registry dropped its senders, so the stream terminates
    let ended = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out waiting for stream end");
    assert_eq!(ended, None);
    assert_eq!(session.current_status().await, VpnStatus::Disconnected);
}

#[tokio::test]
async fn test_dispose_without_initialize_is_safe() {
    let (session, _platform, _store) = controller();
    session.dispose().await;
    session.dispose().await;
}

// =============================================================================
// Statistics polling
// =============================================================================

#[tokio::test]
async fn test_poll_without_initialize_returns_absent() {
    let (session, _platform, _store) = controller();
    assert_eq!(session.connection_update().await, None);
}

#[tokio::test]
async fn test_poll_composes_record_from_shared_store() {
    let (session, _platform, store) = controller();
    session.initialize(init_options()).await.unwrap();

    store
        .set(
            GROUP,
            "vpn_statistics",
            json!({
                "connected_on": "2024-01-01 00:00:00",
                "byte_in": 100u64,
                "byte_out": 50u64,
                "packets_in": 2u64,
                "packets_out": 1u64,
            }),
        )
        .await;

    assert_eq!(
        session.connection_update().await.as_deref(),
        Some("2024-01-01 00:00:00_2_1_100_50_0.00_0.00")
    );
}

#[tokio::test]
async fn test_stats_signal_refreshes_composed_record() {
    let (session, platform, store) = controller();
    session.initialize(init_options()).await.unwrap();

    store
        .set(
            GROUP,
            "vpn_statistics",
            json!({
                "connected_on": "2024-01-01 00:00:00",
                "byte_in": "300",
                "byte_out": "200",
                "packets_in": "6",
                "packets_out": "5",
            }),
        )
        .await;
    platform.signal_stats(GROUP);

    // The watcher runs asynchronously; poll the store until it lands
    let mut composed = None;
    for _ in 0..50 {
        composed = store.get(GROUP, CONNECTION_UPDATE_KEY).await;
        if composed.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        composed.and_then(|v| v.as_str().map(str::to_string)).as_deref(),
        Some("2024-01-01 00:00:00_6_5_300_200_0.00_0.00")
    );
}

#[tokio::test]
async fn test_stats_signal_for_other_group_is_ignored() {
    let (session, platform, store) = controller();
    session.initialize(init_options()).await.unwrap();

    store
        .set("group.other", "vpn_statistics", json!({"byte_in": 1u64}))
        .await;
    platform.signal_stats("group.other");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.get(GROUP, CONNECTION_UPDATE_KEY).await, None);
    assert_eq!(store.get("group.other", CONNECTION_UPDATE_KEY).await, None);
}
