//! OS tunnel platform seam
//!
//! [`TunnelPlatform`] captures the narrow contract the session controller
//! needs from the OS tunnel facility: profile persistence, tunnel start/stop,
//! a live status query, and the two push signals (status changed, stats
//! ready). Status notifications are delivered process-wide rather than scoped
//! to one connection instance, so a status event raised against a reloaded
//! profile is never missed.
//!
//! [`MemoryPlatform`] is a complete in-process implementation used by tests
//! and demos, with injectable save/start failures.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{TunnelError, TunnelResult};
use crate::profile::TunnelProfile;
use crate::status::NativeStatus;

/// Credential options passed to the tunnel start request
#[derive(Debug, Clone)]
pub struct TunnelCredentials {
    pub username: String,
    pub password: String,
}

/// The OS-facing contract for profile persistence and tunnel control
#[async_trait]
pub trait TunnelPlatform: Send + Sync {
    /// Query the profile store for all persisted tunnel profiles
    async fn load_profiles(&self) -> TunnelResult<Vec<TunnelProfile>>;

    /// Persist a profile to the store
    async fn save_profile(&self, profile: &TunnelProfile) -> TunnelResult<()>;

    /// Reload the persisted profile from the store
    async fn load_profile(&self) -> TunnelResult<TunnelProfile>;

    /// Start the tunnel, optionally with credential options
    async fn start_tunnel(&self, credentials: Option<TunnelCredentials>) -> TunnelResult<()>;

    /// Stop the tunnel; a no-op when already stopped
    async fn stop_tunnel(&self);

    /// Live connection status, derived fresh on every call
    fn connection_status(&self) -> NativeStatus;

    /// Subscribe to connection-status-changed notifications
    fn status_events(&self) -> broadcast::Receiver<NativeStatus>;

    /// Subscribe to cross-process stats-ready signals; the payload is the
    /// group identifier the privileged process updated
    fn stats_events(&self) -> broadcast::Receiver<String>;
}

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// In-process tunnel platform with a single persisted profile slot
pub struct MemoryPlatform {
    profiles: Mutex<Vec<TunnelProfile>>,
    status: Mutex<NativeStatus>,
    status_tx: broadcast::Sender<NativeStatus>,
    stats_tx: broadcast::Sender<String>,
    fail_save: AtomicBool,
    deny_start: AtomicBool,
    start_delay: Mutex<Option<Duration>>,
    store_calls: AtomicUsize,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stats_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            profiles: Mutex::new(Vec::new()),
            status: Mutex::new(NativeStatus::DISCONNECTED),
            status_tx,
            stats_tx,
            fail_save: AtomicBool::new(false),
            deny_start: AtomicBool::new(false),
            start_delay: Mutex::new(None),
            store_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate an OS status change and the matching notification
    pub fn set_status(&self, native: NativeStatus) {
        *self.status.lock().unwrap() = native;
        let _ = self.status_tx.send(native);
    }

    /// Move the OS state without raising a notification, as happens when a
    /// status event is dropped by the OS
    pub fn set_status_silent(&self, native: NativeStatus) {
        *self.status.lock().unwrap() = native;
    }

    /// Simulate the privileged process signalling fresh statistics
    pub fn signal_stats(&self, group: &str) {
        let _ = self.stats_tx.send(group.to_string());
    }

    /// Make subsequent profile saves fail
    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent tunnel starts fail as a user-consent denial
    pub fn set_deny_start(&self, deny: bool) {
        self.deny_start.store(deny, Ordering::SeqCst);
    }

    /// Delay tunnel starts to simulate a slow OS completion
    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = Some(delay);
    }

    /// Number of profile store operations performed
    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelPlatform for MemoryPlatform {
    async fn load_profiles(&self) -> TunnelResult<Vec<TunnelProfile>> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.profiles.lock().unwrap().clone())
    }

    async fn save_profile(&self, profile: &TunnelProfile) -> TunnelResult<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(TunnelError::Persistence(
                "profile store rejected the save".to_string(),
            ));
        }
        *self.profiles.lock().unwrap() = vec![profile.clone()];
        debug!("Persisted tunnel profile {}", profile.uuid);
        Ok(())
    }

    async fn load_profile(&self) -> TunnelResult<TunnelProfile> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .first()
            .cloned()
            .unwrap_or_default())
    }

    async fn start_tunnel(&self, credentials: Option<TunnelCredentials>) -> TunnelResult<()> {
        if self.deny_start.load(Ordering::SeqCst) {
            return Err(TunnelError::PermissionDenied(
                "user declined tunnel profile installation".to_string(),
            ));
        }
        let delay = *self.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        debug!(
            "Starting tunnel (credentials: {})",
            credentials.is_some()
        );
        self.set_status(NativeStatus::CONNECTING);
        Ok(())
    }

    async fn stop_tunnel(&self) {
        debug!("Stopping tunnel");
        self.set_status(NativeStatus::DISCONNECTED);
    }

    fn connection_status(&self) -> NativeStatus {
        *self.status.lock().unwrap()
    }

    fn status_events(&self) -> broadcast::Receiver<NativeStatus> {
        self.status_tx.subscribe()
    }

    fn stats_events(&self) -> broadcast::Receiver<String> {
        self.stats_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state() {
        let platform = MemoryPlatform::new();
        assert_eq!(platform.connection_status(), NativeStatus::DISCONNECTED);
        assert!(platform.load_profiles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_events_delivered_to_subscribers() {
        let platform = MemoryPlatform::new();
        let mut rx = platform.status_events();

        platform.set_status(NativeStatus::CONNECTING);
        platform.set_status(NativeStatus::CONNECTED);

        assert_eq!(rx.recv().await.unwrap(), NativeStatus::CONNECTING);
        assert_eq!(rx.recv().await.unwrap(), NativeStatus::CONNECTED);
    }

    #[tokio::test]
    async fn test_denied_start_is_permission_error() {
        let platform = MemoryPlatform::new();
        platform.set_deny_start(true);
        let err = platform.start_tunnel(None).await.unwrap_err();
        assert!(matches!(err, TunnelError::PermissionDenied(_)));
    }
}
