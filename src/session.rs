//! VPN session lifecycle controller
//!
//! Orchestrates one long-lived tunnel session: persists configuration through
//! the [`ProfileManager`], drives connect/disconnect against the
//! [`TunnelPlatform`], and fans canonical status changes out to the
//! [`ObserverRegistry`]. The controller is an explicitly constructed object
//! with no global state; inject it wherever the control surface lives.
//!
//! Concurrency model: the caller-facing operations and the OS notification
//! watchers both touch the session state, so everything mutable sits behind
//! one `RwLock`. Configuration-mutating operations additionally hold an
//! in-flight guard: a `connect` issued while a prior connect or disconnect is
//! still pending is rejected, because a stale completion must never overwrite
//! a newer profile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{TunnelError, TunnelResult};
use crate::observer::{ObserverRegistry, StatusSubscription};
use crate::platform::{TunnelCredentials, TunnelPlatform};
use crate::profile::{ProfileManager, ProviderSettings, TunnelProfile};
use crate::stats::StatsSynchronizer;
use crate::status::VpnStatus;
use crate::store::{SharedStore, CONNECTION_UPDATE_KEY};

/// Parameters for [`SessionController::initialize`]
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub provider_bundle_identifier: String,
    pub localized_description: String,
    pub group_identifier: String,
}

/// Parameters for [`SessionController::connect`]
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Opaque tunnel configuration payload, passed through uninterpreted
    pub config: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Default)]
struct SessionInner {
    options: Option<InitOptions>,
    profile: Option<TunnelProfile>,
    busy: bool,
    watchers: Vec<JoinHandle<()>>,
}

pub struct SessionController {
    platform: Arc<dyn TunnelPlatform>,
    store: Arc<dyn SharedStore>,
    profiles: ProfileManager,
    stats: Arc<StatsSynchronizer>,
    observers: Arc<ObserverRegistry>,
    /// Gate for broadcasts from notifications already queued when dispose ran
    active: Arc<AtomicBool>,
    inner: Arc<RwLock<SessionInner>>,
}

impl SessionController {
    pub fn new(platform: Arc<dyn TunnelPlatform>, store: Arc<dyn SharedStore>) -> Self {
        Self {
            profiles: ProfileManager::new(platform.clone()),
            stats: Arc::new(StatsSynchronizer::new(store.clone())),
            platform,
            store,
            observers: Arc::new(ObserverRegistry::new()),
            active: Arc::new(AtomicBool::new(false)),
            inner: Arc::new(RwLock::new(SessionInner::default())),
        }
    }

    /// Validate the session parameters, load (or create) the persisted
    /// profile, and register for OS notifications.
    ///
    /// Each required parameter fails with its own error so callers can tell
    /// which field was missing; validation happens before any store I/O.
    /// Returns the current canonical status.
    pub async fn initialize(&self, options: InitOptions) -> TunnelResult<VpnStatus> {
        if options.provider_bundle_identifier.trim().is_empty() {
            return Err(TunnelError::MissingParameter("provider_bundle_identifier"));
        }
        if options.localized_description.trim().is_empty() {
            return Err(TunnelError::MissingParameter("localized_description"));
        }
        if options.group_identifier.trim().is_empty() {
            return Err(TunnelError::MissingParameter("group_identifier"));
        }

        let profile = self.profiles.load_or_create().await?;

        let mut inner = self.inner.write().await;
        for handle in inner.watchers.drain(..) {
            handle.abort();
        }
        self.active.store(true, Ordering::SeqCst);
        inner.watchers = self.spawn_watchers(options.group_identifier.clone());
        inner.options = Some(options.clone());
        inner.profile = Some(profile);
        drop(inner);

        let current = VpnStatus::from_native(self.platform.connection_status());
        if current != VpnStatus::Invalid {
            self.observers.broadcast(current);
        }
        info!(
            "Session initialized for {} (group {}), status {}",
            options.provider_bundle_identifier, options.group_identifier, current
        );
        Ok(current)
    }

    /// Persist the connection parameters and start the tunnel.
    ///
    /// Credential options are attached only when both username and password
    /// are present. A start rejection surfaces as `PermissionDenied` carrying
    /// the OS message; persistence failures keep their own error class.
    pub async fn connect(&self, request: ConnectRequest) -> TunnelResult<()> {
        let options = {
            let mut inner = self.inner.write().await;
            let options = inner.options.clone().ok_or(TunnelError::NotInitialized)?;
            if request.config.trim().is_empty() {
                return Err(TunnelError::MissingParameter("config"));
            }
            if inner.busy {
                return Err(TunnelError::InvalidState(
                    "a connect or disconnect is still pending".to_string(),
                ));
            }
            inner.busy = true;
            options
        };

        let result = self.do_connect(&options, request).await;

        let mut inner = self.inner.write().await;
        inner.busy = false;
        match result {
            Ok(profile) => {
                inner.profile = Some(profile);
                Ok(())
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                Err(e)
            }
        }
    }

    async fn do_connect(
        &self,
        options: &InitOptions,
        request: ConnectRequest,
    ) -> TunnelResult<TunnelProfile> {
        let settings = ProviderSettings {
            provider_bundle_identifier: options.provider_bundle_identifier.clone(),
            localized_description: options.localized_description.clone(),
            group_identifier: options.group_identifier.clone(),
            config: request.config,
            username: request.username.clone(),
            password: request.password.clone(),
        };

        let confirmed = self.profiles.apply(&settings).await?;

        let credentials = match (request.username, request.password) {
            (Some(username), Some(password)) => Some(TunnelCredentials { username, password }),
            _ => None,
        };

        self.platform
            .start_tunnel(credentials)
            .await
            .map_err(|e| match e {
                TunnelError::PermissionDenied(_) => e,
                other => TunnelError::PermissionDenied(other.to_string()),
            })?;

        info!("Tunnel start issued for group {}", options.group_identifier);
        Ok(confirmed)
    }

    /// Stop the tunnel. Idempotent: safe before any connect and safe to call
    /// repeatedly. Also clears the composed statistics record so a following
    /// poll cannot return data from the previous session.
    pub async fn disconnect(&self) {
        let guard_taken = {
            let mut inner = self.inner.write().await;
            let take = !inner.busy;
            if take {
                inner.busy = true;
            }
            take
        };

        self.platform.stop_tunnel().await;

        let group = {
            let inner = self.inner.read().await;
            inner.options.as_ref().map(|o| o.group_identifier.clone())
        };
        if let Some(group) = group {
            self.store.remove(&group, CONNECTION_UPDATE_KEY).await;
            debug!("Cleared stale connection update for group {}", group);
        }

        if guard_taken {
            self.inner.write().await.busy = false;
        }
        info!("Tunnel stop issued");
    }

    /// Canonical status derived fresh from the OS on every call. Falls back
    /// to `Disconnected` while no profile has been loaded.
    pub async fn current_status(&self) -> VpnStatus {
        if self.inner.read().await.profile.is_none() {
            return VpnStatus::Disconnected;
        }
        VpnStatus::from_native(self.platform.connection_status())
    }

    /// Re-derive the status and broadcast it to every observer
    pub async fn force_status_check(&self) -> VpnStatus {
        let status = self.current_status().await;
        if self.active.load(Ordering::SeqCst) {
            self.observers.broadcast(status);
        }
        status
    }

    /// Synchronize statistics and return the composed connection-update
    /// record, or `None` when the session was never initialized
    pub async fn connection_update(&self) -> Option<String> {
        let group = {
            let inner = self.inner.read().await;
            inner.options.as_ref().map(|o| o.group_identifier.clone())?
        };
        self.stats.refresh(&group).await;
        self.store
            .get(&group, CONNECTION_UPDATE_KEY)
            .await
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Register a status observer; the last known status is replayed into the
    /// subscription immediately
    pub fn subscribe(&self) -> StatusSubscription {
        self.observers.subscribe()
    }

    /// Unregister the OS observers and reset the session. Safe when never
    /// initialized and while a notification is in flight: once disposed, a
    /// queued notification can no longer broadcast.
    pub async fn dispose(&self) {
        self.active.store(false, Ordering::SeqCst);

        let mut inner = self.inner.write().await;
        for handle in inner.watchers.drain(..) {
            handle.abort();
        }
        inner.options = None;
        inner.profile = None;
        inner.busy = false;
        drop(inner);

        self.observers.clear();
        info!("Session disposed");
    }

    fn spawn_watchers(&self, group: String) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // Status watcher: encode each notification once and deliver the same
        // canonical value to every sink, so no observer can see a status the
        // OS has already moved past re-derived differently.
        let mut status_rx = self.platform.status_events();
        let observers = self.observers.clone();
        let active = self.active.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match status_rx.recv().await {
                    Ok(native) => {
                        if !active.load(Ordering::SeqCst) {
                            break;
                        }
                        let status = VpnStatus::from_native(native);
                        debug!("Tunnel status changed: {}", status);
                        observers.broadcast(status);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Status watcher lagged, skipped {} notifications", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Stats watcher: the privileged process signals with the group it
        // updated; refresh is idempotent so redundant signals are harmless.
        let mut stats_rx = self.platform.stats_events();
        let stats = self.stats.clone();
        let active = self.active.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match stats_rx.recv().await {
                    Ok(signaled) => {
                        if !active.load(Ordering::SeqCst) {
                            break;
                        }
                        if signaled == group {
                            stats.refresh(&group).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        handles
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        // Watcher tasks hold only Arcs; aborting here is best effort since
        // the lock cannot be awaited in drop. dispose() is the clean path.
        if let Ok(inner) = self.inner.try_write() {
            for handle in inner.watchers.iter() {
                handle.abort();
            }
        }
        debug!("SessionController dropped");
    }
}
