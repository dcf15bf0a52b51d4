//! Abyss Configuration
//!
//! Configuration structures with serde defaults. Every tunable of the room
//! router, blink detector and broadcast throttles lives here.

use crate::error::AbyssError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

/// Participants per room, self included
pub const DEFAULT_MAX_PARTICIPANTS: usize = 10;
/// Channel subscribed once to learn that the transport is ready
pub const DEFAULT_DISCOVERY_CHANNEL: &str = "room_discovery";
/// Room channels are named `{prefix}{n}`, starting at 1
pub const DEFAULT_ROOM_PREFIX: &str = "room_";
/// Brightness samples kept for the rolling baseline
pub const DEFAULT_WINDOW_SIZE: usize = 30;
/// Brightness above `baseline * multiplier` counts as a blink
pub const DEFAULT_THRESHOLD_MULTIPLIER: f64 = 1.2;
/// Minimum hold time between accepted blink state changes
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
/// Every n-th pixel of an eye patch is sampled
pub const DEFAULT_SAMPLE_STRIDE: usize = 4;
/// Gaze/blink broadcast window
pub const DEFAULT_GAZE_THROTTLE_MS: u64 = 100;
/// Cursor broadcast window
pub const DEFAULT_CURSOR_THROTTLE_MS: u64 = 200;
/// Broadcast event carrying gaze samples
pub const DEFAULT_EYE_TRACKING_EVENT: &str = "eye_tracking";
/// Broadcast event carrying cursor samples
pub const DEFAULT_CURSOR_EVENT: &str = "cursor";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_abyss_dir() -> PathBuf {
    home_dir().join(".abyss")
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Room discovery and capacity
    #[serde(default)]
    pub room: RoomConfig,
    /// Brightness blink detection
    #[serde(default)]
    pub blink: BlinkConfig,
    /// Ephemeral broadcast throttling
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// Calibration sequence
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

// ============================================================================
// Room Config
// ============================================================================

/// Room sharding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomConfig {
    /// Maximum participants per room, self included
    #[serde(default = "RoomConfig::default_max_participants")]
    pub max_participants: usize,
    /// Discovery channel name
    #[serde(default = "RoomConfig::default_discovery_channel")]
    pub discovery_channel: String,
    /// Room channel prefix
    #[serde(default = "RoomConfig::default_room_prefix")]
    pub room_prefix: String,
    /// Give up waiting for a subscription after this long (None waits forever)
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

impl RoomConfig {
    fn default_max_participants() -> usize {
        DEFAULT_MAX_PARTICIPANTS
    }
    fn default_discovery_channel() -> String {
        DEFAULT_DISCOVERY_CHANNEL.to_string()
    }
    fn default_room_prefix() -> String {
        DEFAULT_ROOM_PREFIX.to_string()
    }

    /// Channel name of room `n`.
    pub fn room_channel(&self, n: u32) -> String {
        format!("{}{}", self.room_prefix, n)
    }

    /// How many other members may already be present when we join.
    pub fn max_others(&self) -> usize {
        self.max_participants.saturating_sub(1)
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            discovery_channel: DEFAULT_DISCOVERY_CHANNEL.to_string(),
            room_prefix: DEFAULT_ROOM_PREFIX.to_string(),
            connect_timeout_ms: None,
        }
    }
}

// ============================================================================
// Blink Config
// ============================================================================

/// Blink detector tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlinkConfig {
    #[serde(default = "BlinkConfig::default_window_size")]
    pub window_size: usize,
    #[serde(default = "BlinkConfig::default_threshold_multiplier")]
    pub threshold_multiplier: f64,
    #[serde(default = "BlinkConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    /// Pixel stride used when averaging an eye patch
    #[serde(default = "BlinkConfig::default_sample_stride")]
    pub sample_stride: usize,
}

impl BlinkConfig {
    fn default_window_size() -> usize {
        DEFAULT_WINDOW_SIZE
    }
    fn default_threshold_multiplier() -> f64 {
        DEFAULT_THRESHOLD_MULTIPLIER
    }
    fn default_debounce_ms() -> u64 {
        DEFAULT_DEBOUNCE_MS
    }
    fn default_sample_stride() -> usize {
        DEFAULT_SAMPLE_STRIDE
    }
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            threshold_multiplier: DEFAULT_THRESHOLD_MULTIPLIER,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            sample_stride: DEFAULT_SAMPLE_STRIDE,
        }
    }
}

// ============================================================================
// Broadcast Config
// ============================================================================

/// Ephemeral broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    #[serde(default = "BroadcastConfig::default_gaze_throttle_ms")]
    pub gaze_throttle_ms: u64,
    #[serde(default = "BroadcastConfig::default_cursor_throttle_ms")]
    pub cursor_throttle_ms: u64,
    #[serde(default = "BroadcastConfig::default_eye_tracking_event")]
    pub eye_tracking_event: String,
    #[serde(default = "BroadcastConfig::default_cursor_event")]
    pub cursor_event: String,
}

impl BroadcastConfig {
    fn default_gaze_throttle_ms() -> u64 {
        DEFAULT_GAZE_THROTTLE_MS
    }
    fn default_cursor_throttle_ms() -> u64 {
        DEFAULT_CURSOR_THROTTLE_MS
    }
    fn default_eye_tracking_event() -> String {
        DEFAULT_EYE_TRACKING_EVENT.to_string()
    }
    fn default_cursor_event() -> String {
        DEFAULT_CURSOR_EVENT.to_string()
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            gaze_throttle_ms: DEFAULT_GAZE_THROTTLE_MS,
            cursor_throttle_ms: DEFAULT_CURSOR_THROTTLE_MS,
            eye_tracking_event: DEFAULT_EYE_TRACKING_EVENT.to_string(),
            cursor_event: DEFAULT_CURSOR_EVENT.to_string(),
        }
    }
}

// ============================================================================
// Calibration Config
// ============================================================================

/// A calibration target in normalized screen coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CalibrationPoint {
    pub x: f64,
    pub y: f64,
}

/// Calibration sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationConfig {
    #[serde(default = "CalibrationConfig::default_points")]
    pub points: Vec<CalibrationPoint>,
}

impl CalibrationConfig {
    fn default_points() -> Vec<CalibrationPoint> {
        [(0.1, 0.1), (0.9, 0.1), (0.5, 0.5), (0.1, 0.9), (0.9, 0.9)]
            .into_iter()
            .map(|(x, y)| CalibrationPoint { x, y })
            .collect()
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            points: Self::default_points(),
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&str>) -> Result<Config, AbyssError> {
        let config_path = Self::resolve_config_path(path)?;
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| AbyssError::config_parse_error(format!("Failed to read: {}", e)))?;
        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| AbyssError::config_parse_error(format!("Failed to parse: {}", e)))?;
        ConfigValidator::validate(&config)?;
        tracing::debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Load from an explicit path, or fall back to defaults when no file exists
    pub fn load_or_default(path: Option<&str>) -> Result<Config, AbyssError> {
        match Self::load(path) {
            Err(AbyssError::Domain(crate::error::DomainError::ConfigNotFound { .. }))
                if path.is_none() =>
            {
                tracing::debug!("No config file found, using defaults");
                Ok(Config::default())
            }
            other => other,
        }
    }

    fn resolve_config_path(path: Option<&str>) -> Result<PathBuf, AbyssError> {
        if let Some(p) = path {
            let p = PathBuf::from(p);
            if !p.exists() {
                return Err(AbyssError::config_not_found(p.display().to_string()));
            }
            return Ok(p);
        }

        let default_paths = [
            default_abyss_dir().join("config.yaml"),
            PathBuf::from("./abyss.yaml"),
        ];

        default_paths
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                AbyssError::config_not_found(
                    "Config not found. Run `abyss config-sample` or create ~/.abyss/config.yaml",
                )
            })
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), AbyssError> {
        if config.room.max_participants < 2 {
            return Err(AbyssError::config_invalid(
                "room.max_participants",
                "A room must hold at least two participants",
            ));
        }
        if config.room.discovery_channel.trim().is_empty() {
            return Err(AbyssError::config_invalid(
                "room.discovery_channel",
                "Channel name cannot be empty",
            ));
        }
        if config.room.room_prefix.trim().is_empty() {
            return Err(AbyssError::config_invalid(
                "room.room_prefix",
                "Room prefix cannot be empty",
            ));
        }
        if config.room.room_prefix == config.room.discovery_channel {
            return Err(AbyssError::config_invalid(
                "room.room_prefix",
                "Room prefix must differ from the discovery channel",
            ));
        }

        if config.blink.window_size == 0 {
            return Err(AbyssError::config_invalid(
                "blink.window_size",
                "Window must hold at least one sample",
            ));
        }
        if !(config.blink.threshold_multiplier > 1.0) {
            return Err(AbyssError::config_invalid(
                "blink.threshold_multiplier",
                format!(
                    "Multiplier must be greater than 1.0, got {}",
                    config.blink.threshold_multiplier
                ),
            ));
        }
        if config.blink.sample_stride == 0 {
            return Err(AbyssError::config_invalid(
                "blink.sample_stride",
                "Stride must be at least 1",
            ));
        }

        if config.broadcast.gaze_throttle_ms == 0 {
            return Err(AbyssError::config_invalid(
                "broadcast.gaze_throttle_ms",
                "Throttle window cannot be zero",
            ));
        }
        if config.broadcast.cursor_throttle_ms == 0 {
            return Err(AbyssError::config_invalid(
                "broadcast.cursor_throttle_ms",
                "Throttle window cannot be zero",
            ));
        }
        if config.broadcast.eye_tracking_event.trim().is_empty()
            || config.broadcast.cursor_event.trim().is_empty()
        {
            return Err(AbyssError::config_invalid(
                "broadcast",
                "Event names cannot be empty",
            ));
        }

        if config.calibration.points.is_empty() {
            return Err(AbyssError::config_invalid(
                "calibration.points",
                "At least one calibration point is required",
            ));
        }
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if let Some(point) = config
            .calibration
            .points
            .iter()
            .find(|p| !in_range(p.x) || !in_range(p.y))
        {
            return Err(AbyssError::config_invalid(
                "calibration.points",
                format!("Point ({}, {}) is outside [0, 1]", point.x, point.y),
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration (convenience wrapper)
    pub fn load(path: &Option<String>) -> Result<Self, AbyssError> {
        ConfigLoader::load(path.as_deref())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), AbyssError> {
        let content = serde_yml::to_string(self)
            .map_err(|e| AbyssError::config_parse_error(format!("Serialization failed: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            room: RoomConfig {
                connect_timeout_ms: Some(10_000),
                ..RoomConfig::default()
            },
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.room.max_participants, 10);
        assert_eq!(config.room.max_others(), 9);
        assert_eq!(config.room.room_channel(3), "room_3");
        assert_eq!(config.blink.window_size, 30);
        assert_eq!(config.blink.debounce_ms, 100);
        assert_eq!(config.calibration.points.len(), 5);
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "room:\n  max_participants: 4\nbroadcast:\n  gaze_throttle_ms: 30\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.room.max_participants, 4);
        assert_eq!(config.room.discovery_channel, "room_discovery");
        assert_eq!(config.broadcast.gaze_throttle_ms, 30);
        assert_eq!(config.broadcast.cursor_throttle_ms, 200);
        assert_eq!(config.blink, BlinkConfig::default());
    }

    #[test]
    fn validator_rejects_bad_multiplier() {
        let mut config = Config::default();
        config.blink.threshold_multiplier = 1.0;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("blink.threshold_multiplier"));
    }

    #[test]
    fn validator_rejects_out_of_range_calibration_point() {
        let mut config = Config::default();
        config.calibration.points.push(CalibrationPoint { x: 1.5, y: 0.5 });
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validator_rejects_single_seat_rooms() {
        let mut config = Config::default();
        config.room.max_participants = 1;
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
