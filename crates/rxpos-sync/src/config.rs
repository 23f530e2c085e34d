//! # Sync Configuration
//!
//! Configuration for the terminal's sync agent and reconciliation rules.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     RXPOS_SYNC_MODE=offline                                             │
//! │     RXPOS_DEVICE_ID=till-3                                              │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/pos/sync.toml (Linux)                                     │
//! │     ~/Library/Application Support/com.rxpos.pos/sync.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     SyncMode::Auto, auto-generated device_id                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Dispensary Till 1"
//!
//! [sync]
//! mode = "auto"                 # auto | offline
//! batch_size = 100
//! poll_interval_secs = 30
//! transport_alert_after_secs = 300
//!
//! [reconciliation]
//! refund_variance_tolerance_minor = 1
//! ```
//!
//! The payment reconciliation epsilon is fixed at one minor unit and is not
//! configurable.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rxpos_core::Money;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Mode
// =============================================================================

/// Whether the agent drains the queue at all.
///
/// `Offline` keeps accepting and queueing mutations but never contacts the
/// remote, which is how an isolated till or a training install runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Drain on reconnect, on a timer and on demand.
    #[default]
    Auto,

    /// Queue only.
    Offline,
}

impl SyncMode {
    /// Returns true if sync is enabled at all.
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SyncMode::Auto),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier. Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable name (e.g., "Dispensary Till 1").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Drain scheduling and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Queue page size per drain step.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Interval between timer-triggered drains (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How long transport failures may persist before an alert is emitted.
    #[serde(default = "default_transport_alert")]
    pub transport_alert_after_secs: u64,

    /// First retry delay after an interrupted drain (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Retry delay ceiling (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_batch_size() -> u32 {
    100
}
fn default_poll_interval() -> u64 {
    30
}
fn default_transport_alert() -> u64 {
    300
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            transport_alert_after_secs: default_transport_alert(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Reconciliation Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    /// Refund variance within this many minor units counts as matched.
    #[serde(default = "default_refund_tolerance")]
    pub refund_variance_tolerance_minor: i64,
}

fn default_refund_tolerance() -> i64 {
    1
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        ReconciliationSettings {
            refund_variance_tolerance_minor: default_refund_tolerance(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete terminal configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.reconciliation.refund_variance_tolerance_minor < 0 {
            return Err(SyncError::InvalidConfig(
                "refund_variance_tolerance_minor cannot be negative".into(),
            ));
        }

        Ok(())
    }

    /// Applies `RXPOS_*` overrides read through `lookup`.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("RXPOS_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = lookup("RXPOS_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(mode) = lookup("RXPOS_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Some(secs) = lookup("RXPOS_POLL_INTERVAL_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.sync.poll_interval_secs = s;
            }
        }

        if let Some(minor) = lookup("RXPOS_REFUND_TOLERANCE_MINOR") {
            if let Ok(m) = minor.parse::<i64>() {
                self.reconciliation.refund_variance_tolerance_minor = m;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "rxpos", "pos").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    pub fn transport_alert_after(&self) -> Duration {
        Duration::from_secs(self.sync.transport_alert_after_secs)
    }

    pub fn refund_tolerance(&self) -> Money {
        Money::from_minor(self.reconciliation.refund_variance_tolerance_minor)
    }
}
