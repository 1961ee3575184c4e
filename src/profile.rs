//! Tunnel provider profile management
//!
//! Owns the persisted tunnel profile: loads an existing one (or creates a
//! fresh one), writes the connection parameters as the opaque provider
//! payload, and confirms durability by reloading after every save. This
//! module is the sole writer of the persisted profile.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::TunnelResult;
use crate::platform::TunnelPlatform;

/// Provider payload keys consumed by the privileged tunnel process. All four
/// must be present in every saved profile; absent credentials are encoded as
/// empty strings, never as missing keys.
pub const PAYLOAD_CONFIG_KEY: &str = "vpn_config";
pub const PAYLOAD_GROUP_KEY: &str = "groupIdentifier";
pub const PAYLOAD_USERNAME_KEY: &str = "username";
pub const PAYLOAD_PASSWORD_KEY: &str = "password";

/// Persisted tunnel provider profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelProfile {
    pub uuid: String,
    pub localized_description: String,
    /// May be empty; the opaque payload carries the real endpoint
    pub server_address: String,
    pub provider_bundle_identifier: String,
    /// Opaque key-value payload, interpreted only by the privileged process
    pub provider_configuration: HashMap<String, String>,
    pub disconnect_on_sleep: bool,
    pub enabled: bool,
}

impl Default for TunnelProfile {
    fn default() -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            localized_description: String::new(),
            server_address: String::new(),
            provider_bundle_identifier: String::new(),
            provider_configuration: HashMap::new(),
            disconnect_on_sleep: false,
            enabled: false,
        }
    }
}

/// Connection parameters applied to the persisted profile
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider_bundle_identifier: String,
    pub localized_description: String,
    pub group_identifier: String,
    pub config: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub struct ProfileManager {
    platform: Arc<dyn TunnelPlatform>,
}

impl ProfileManager {
    pub fn new(platform: Arc<dyn TunnelPlatform>) -> Self {
        Self { platform }
    }

    /// Load the first persisted profile, or construct a fresh one when the
    /// store holds none. Read-only beyond the store query itself.
    pub async fn load_or_create(&self) -> TunnelResult<TunnelProfile> {
        let profiles = self.platform.load_profiles().await?;
        match profiles.into_iter().next() {
            Some(profile) => {
                info!("Loaded existing tunnel profile {}", profile.uuid);
                Ok(profile)
            }
            None => {
                let profile = TunnelProfile::default();
                info!("No persisted profile found, created {}", profile.uuid);
                Ok(profile)
            }
        }
    }

    /// Write connection parameters into the persisted profile.
    ///
    /// Reloads the profile from the store first so a concurrently modified
    /// persisted copy is never raced against a stale in-memory one, then
    /// saves and reloads again to confirm the write landed. Any step's
    /// failure short-circuits; there is no automatic retry.
    pub async fn apply(&self, settings: &ProviderSettings) -> TunnelResult<TunnelProfile> {
        let mut profile = self.platform.load_profile().await?;

        profile.provider_bundle_identifier = settings.provider_bundle_identifier.clone();
        profile.localized_description = settings.localized_description.clone();
        profile.server_address = String::new();
        profile.provider_configuration = HashMap::from([
            (PAYLOAD_CONFIG_KEY.to_string(), settings.config.clone()),
            (
                PAYLOAD_GROUP_KEY.to_string(),
                settings.group_identifier.clone(),
            ),
            (
                PAYLOAD_USERNAME_KEY.to_string(),
                settings.username.clone().unwrap_or_default(),
            ),
            (
                PAYLOAD_PASSWORD_KEY.to_string(),
                settings.password.clone().unwrap_or_default(),
            ),
        ]);
        profile.disconnect_on_sleep = false;
        profile.enabled = true;

        self.platform.save_profile(&profile).await?;

        // Durability confirmation: the caller gets the reloaded profile, not
        // the in-memory copy that was just handed to the store.
        let confirmed = self.platform.load_profile().await?;
        debug!("Confirmed persisted profile {}", confirmed.uuid);
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use crate::platform::MemoryPlatform;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            provider_bundle_identifier: "com.app.tunnel".to_string(),
            localized_description: "My VPN".to_string(),
            group_identifier: "group.app".to_string(),
            config: "remote 1.2.3.4".to_string(),
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
        }
    }

    #[tokio::test]
    async fn test_load_or_create_returns_fresh_profile_when_store_empty() {
        let platform = Arc::new(MemoryPlatform::new());
        let manager = ProfileManager::new(platform.clone());

        let profile = manager.load_or_create().await.unwrap();
        assert!(!profile.enabled);
        assert!(profile.provider_bundle_identifier.is_empty());
        // load_or_create must not persist anything
        assert!(platform.load_profiles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_round_trips_through_the_store() {
        let platform = Arc::new(MemoryPlatform::new());
        let manager = ProfileManager::new(platform.clone());

        let confirmed = manager.apply(&settings()).await.unwrap();
        assert!(confirmed.enabled);
        assert_eq!(confirmed.provider_bundle_identifier, "com.app.tunnel");
        assert_eq!(confirmed.localized_description, "My VPN");

        // The reloaded profile equals what was just written
        let reloaded = platform.load_profile().await.unwrap();
        assert_eq!(
            reloaded.provider_configuration,
            confirmed.provider_configuration
        );
        assert_eq!(
            reloaded.provider_configuration.get(PAYLOAD_CONFIG_KEY),
            Some(&"remote 1.2.3.4".to_string())
        );
    }

    #[tokio::test]
    async fn test_absent_credentials_become_empty_values() {
        let platform = Arc::new(MemoryPlatform::new());
        let manager = ProfileManager::new(platform);

        let mut s = settings();
        s.username = None;
        s.password = None;
        let profile = manager.apply(&s).await.unwrap();

        // Keys must exist even without credentials
        assert_eq!(
            profile.provider_configuration.get(PAYLOAD_USERNAME_KEY),
            Some(&String::new())
        );
        assert_eq!(
            profile.provider_configuration.get(PAYLOAD_PASSWORD_KEY),
            Some(&String::new())
        );
    }

    #[tokio::test]
    async fn test_apply_surfaces_save_failure() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.set_fail_save(true);
        let manager = ProfileManager::new(platform);

        let err = manager.apply(&settings()).await.unwrap_err();
        assert!(matches!(err, TunnelError::Persistence(_)));
    }
}
