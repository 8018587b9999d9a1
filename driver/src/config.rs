//! Driver configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use toupcore_hw::MAX_DEVICES;

/// Shortest temperature poll period honoured, whatever the config says
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Tunables of the camera driver.
///
/// Durations are stored in milliseconds so the struct serializes the same
/// way in any format the host chooses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Prefix of every attached device name, e.g. "Touptek G3M678M"
    pub name_prefix: String,

    /// Period of the sensor temperature and cooler power poll, at least
    /// `MIN_POLL_INTERVAL_MS`.
    /// Default: 5000 ms.
    pub temperature_poll_interval_ms: u64,

    /// Deviation from the cooler target, in degC, above which the
    /// temperature is still reported as settling.
    /// Default: 1.0.
    pub temperature_deadband: f64,

    /// Delay between a hot-plug notification and the rescan it triggers,
    /// giving the OS time to settle the device.
    /// Default: 500 ms.
    pub hotplug_debounce_ms: u64,

    /// Maximum number of cameras tracked at once.
    /// Default: the SDK's enumeration capacity.
    pub max_devices: usize,

    /// Attach a guide port for models with an ST4 connector.
    /// Default: true.
    pub enable_guider: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name_prefix: "Touptek".to_string(),
            temperature_poll_interval_ms: 5000,
            temperature_deadband: 1.0,
            hotplug_debounce_ms: 500,
            max_devices: MAX_DEVICES,
            enable_guider: true,
        }
    }
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for hosts that only want imaging, without guide ports
    pub fn imaging_only() -> Self {
        Self {
            enable_guider: false,
            ..Self::default()
        }
    }

    /// Faster polling and a tighter deadband, for cameras that settle quickly
    pub fn responsive() -> Self {
        Self {
            temperature_poll_interval_ms: 2000,
            temperature_deadband: 0.5,
            hotplug_debounce_ms: 250,
            ..Self::default()
        }
    }

    pub fn temperature_poll_interval(&self) -> Duration {
        Duration::from_millis(self.temperature_poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn hotplug_debounce(&self) -> Duration {
        Duration::from_millis(self.hotplug_debounce_ms)
    }

    /// Display name of a sensor
    pub fn sensor_name(&self, display_name: &str) -> String {
        format!("{} {}", self.name_prefix, display_name)
    }

    /// Display name of the guide port sharing a sensor's hardware
    pub fn guider_name(&self, display_name: &str) -> String {
        format!("{} {} (guider)", self.name_prefix, display_name)
    }
}
