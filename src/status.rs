//! Connection status codec
//!
//! Maps the OS's raw connection-status values to the canonical six-value
//! vocabulary used across the whole crate. Pure mapping, no state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw connection-status value as delivered by the OS tunnel facility.
///
/// Values outside the known range are legal inputs; the codec maps them
/// to [`VpnStatus::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeStatus(pub i32);

impl NativeStatus {
    pub const INVALID: NativeStatus = NativeStatus(0);
    pub const DISCONNECTED: NativeStatus = NativeStatus(1);
    pub const CONNECTING: NativeStatus = NativeStatus(2);
    pub const CONNECTED: NativeStatus = NativeStatus(3);
    pub const REASSERTING: NativeStatus = NativeStatus(4);
    pub const DISCONNECTING: NativeStatus = NativeStatus(5);
}

/// Canonical connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnStatus {
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reasserting,
}

impl VpnStatus {
    /// Encode a raw OS status value. Total: every input has a defined
    /// output, and unmapped values default to `Disconnected` rather than
    /// erroring.
    pub fn from_native(native: NativeStatus) -> Self {
        match native {
            NativeStatus::INVALID => VpnStatus::Invalid,
            NativeStatus::DISCONNECTED => VpnStatus::Disconnected,
            NativeStatus::CONNECTING => VpnStatus::Connecting,
            NativeStatus::CONNECTED => VpnStatus::Connected,
            NativeStatus::REASSERTING => VpnStatus::Reasserting,
            NativeStatus::DISCONNECTING => VpnStatus::Disconnecting,
            _ => VpnStatus::Disconnected,
        }
    }

    /// Canonical lowercase string form
    pub fn as_str(&self) -> &'static str {
        match self {
            VpnStatus::Invalid => "invalid",
            VpnStatus::Disconnected => "disconnected",
            VpnStatus::Connecting => "connecting",
            VpnStatus::Connected => "connected",
            VpnStatus::Disconnecting => "disconnecting",
            VpnStatus::Reasserting => "reasserting",
        }
    }
}

impl fmt::Display for VpnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VpnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid" => Ok(VpnStatus::Invalid),
            "disconnected" => Ok(VpnStatus::Disconnected),
            "connecting" => Ok(VpnStatus::Connecting),
            "connected" => Ok(VpnStatus::Connected),
            "disconnecting" => Ok(VpnStatus::Disconnecting),
            "reasserting" => Ok(VpnStatus::Reasserting),
            other => Err(format!("Unknown VPN status: {}", other)),
        }
    }
}
