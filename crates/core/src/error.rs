//! Abyss Error Types
//!
//! This module defines a layered error hierarchy:
//! - `DomainError`: Room, presence, provider and config failures
//! - `InfraError`: IO, serialization and transport failures
//! - `AbyssError`: Top-level error that wraps both categories

use std::fmt;

/// Domain-level errors representing presence and signal failures
#[derive(Debug)]
pub enum DomainError {
    /// A presence record arrived without its ordering timestamp
    MalformedPresence { participant: String, reason: String },
    /// Room had no spare seat when our own join event fired
    CapacityOverflow { room: u32, others: usize },
    /// Gaze provider could not deliver a frame or eye patches
    ProviderUnavailable { reason: String },
    /// Another gaze provider session is already active
    ProviderBusy,
    /// A channel subscription never reached the subscribed state
    ConnectionFailed { channel: String, reason: String },
    /// Calibration flow was driven out of order
    Calibration { reason: String },
    /// Configuration file not found at the specified path
    ConfigNotFound { path: String },
    /// Configuration validation failed
    ConfigInvalid { field: String, reason: String },
    /// Configuration parsing failed
    ConfigParse { source: String },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPresence {
                participant,
                reason,
            } => write!(f, "Malformed presence for '{}': {}", participant, reason),
            Self::CapacityOverflow { room, others } => {
                write!(f, "Room {} is full ({} other participants)", room, others)
            }
            Self::ProviderUnavailable { reason } => {
                write!(f, "Gaze provider unavailable: {}", reason)
            }
            Self::ProviderBusy => write!(f, "Gaze provider session already active"),
            Self::ConnectionFailed { channel, reason } => {
                write!(f, "Connection to '{}' failed: {}", channel, reason)
            }
            Self::Calibration { reason } => write!(f, "Calibration error: {}", reason),
            Self::ConfigNotFound { path } => write!(f, "Config not found: {}", path),
            Self::ConfigInvalid { field, reason } => {
                write!(f, "Config invalid [{}]: {}", field, reason)
            }
            Self::ConfigParse { source } => write!(f, "Config parse error: {}", source),
        }
    }
}

impl std::error::Error for DomainError {}

/// Infrastructure-level errors representing external system failures
#[derive(Debug)]
pub enum InfraError {
    /// IO operation failed
    Io(std::io::Error),
    /// JSON serialization/deserialization failed
    Json(serde_json::Error),
    /// YAML serialization/deserialization failed
    Yaml(serde_yml::Error),
    /// Realtime backend rejected or dropped an operation
    Transport { channel: String, reason: String },
}

impl fmt::Display for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Json(err) => write!(f, "JSON error: {}", err),
            Self::Yaml(err) => write!(f, "YAML error: {}", err),
            Self::Transport { channel, reason } => {
                write!(f, "Transport error [{}]: {}", channel, reason)
            }
        }
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Yaml(e) => Some(e),
            Self::Transport { .. } => None,
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<serde_yml::Error> for InfraError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Yaml(err)
    }
}

/// Top-level error type for Abyss
///
/// Wraps both domain and infrastructure errors so callers can still match
/// on a specific category.
#[derive(Debug)]
pub enum AbyssError {
    /// Business logic error
    Domain(DomainError),
    /// Infrastructure/external system error
    Infra(InfraError),
    /// Generic error for edge cases
    Other(String),
}

impl fmt::Display for AbyssError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{}", e),
            Self::Infra(e) => write!(f, "{}", e),
            Self::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for AbyssError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Domain(e) => Some(e),
            Self::Infra(e) => Some(e),
            Self::Other(_) => None,
        }
    }
}

impl From<DomainError> for AbyssError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<InfraError> for AbyssError {
    fn from(err: InfraError) -> Self {
        Self::Infra(err)
    }
}

impl From<std::io::Error> for AbyssError {
    fn from(err: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(err))
    }
}

impl From<serde_json::Error> for AbyssError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infra(InfraError::Json(err))
    }
}

impl From<serde_yml::Error> for AbyssError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Infra(InfraError::Yaml(err))
    }
}

impl AbyssError {
    pub fn malformed_presence(participant: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::MalformedPresence {
            participant: participant.into(),
            reason: reason.into(),
        })
    }

    pub fn provider_unavailable(reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ProviderUnavailable {
            reason: reason.into(),
        })
    }

    pub fn connection_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConnectionFailed {
            channel: channel.into(),
            reason: reason.into(),
        })
    }

    pub fn calibration(reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::Calibration {
            reason: reason.into(),
        })
    }

    pub fn transport(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Infra(InfraError::Transport {
            channel: channel.into(),
            reason: reason.into(),
        })
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigNotFound { path: path.into() })
    }

    pub fn config_parse_error(source: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigParse {
            source: source.into(),
        })
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Whether this error means the local client never got a usable connection.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Domain(DomainError::ConnectionFailed { .. })
                | Self::Infra(InfraError::Transport { .. })
        )
    }
}
