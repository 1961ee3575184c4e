//! Error types for tunnelctl

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum TunnelError {
    /// A required control-surface parameter was empty or absent
    MissingParameter(&'static str),
    /// connect was called before a successful initialize
    NotInitialized,
    /// Profile load/save/reload failed in the OS profile store
    Persistence(String),
    /// Tunnel start rejected (typically user consent / profile installation)
    PermissionDenied(String),
    /// Operation rejected in the current lifecycle state
    InvalidState(String),
    /// Any other OS failure, carrying the original message
    Unknown(String),
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::MissingParameter(field) => {
                write!(f, "Parameter '{}' is empty or missing", field)
            }
            TunnelError::NotInitialized => write!(f, "Session has not been initialized"),
            TunnelError::Persistence(msg) => write!(f, "Profile persistence error: {}", msg),
            TunnelError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            TunnelError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            TunnelError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for TunnelError {}

impl From<io::Error> for TunnelError {
    fn from(error: io::Error) -> Self {
        TunnelError::Persistence(error.to_string())
    }
}

impl From<serde_json::Error> for TunnelError {
    fn from(error: serde_json::Error) -> Self {
        TunnelError::Unknown(error.to_string())
    }
}

pub type TunnelResult<T> = Result<T, TunnelError>;
