//! tunnelctl - VPN Session Control Library
//!
//! Async library bridging an application to an OS-managed tunnel provider:
//! - Persisted tunnel profile management (load, apply, reload-confirm)
//! - Connect/disconnect lifecycle over one long-lived session
//! - Canonical connection-status observation and broadcast
//! - Cross-process traffic-statistics synchronization
//!
//! The OS facility is reached through the [`platform::TunnelPlatform`] trait;
//! [`platform::MemoryPlatform`] provides a complete in-process implementation
//! for tests and demos.

pub mod error;
pub mod status;
pub mod store;
pub mod stats;
pub mod profile;
pub mod platform;
pub mod observer;
pub mod session;

// Re-export commonly used types
pub use error::{TunnelError, TunnelResult};
pub use status::{NativeStatus, VpnStatus};
pub use store::{FileStore, MemoryStore, SharedStore};
pub use stats::StatsSynchronizer;
pub use profile::{ProfileManager, ProviderSettings, TunnelProfile};
pub use platform::{MemoryPlatform, TunnelCredentials, TunnelPlatform};
pub use observer::{ObserverRegistry, RegistrationId, StatusSubscription};
pub use session::{ConnectRequest, InitOptions, SessionController};
