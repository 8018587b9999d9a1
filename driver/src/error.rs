//! Driver error types
//!
//! No error here is fatal to the host. Each one is confined to the device it
//! occurred on and is mirrored into that device's property state.

use toupcore_hw::HwError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// A hardware call returned a failure code. Not retried.
    #[error("Hardware call failed: {0}")]
    HardwareCallFailed(#[from] HwError),

    /// A frame could not be pulled while an exposure or stream was running
    #[error("Frame lost: {0}")]
    FrameLost(String),

    /// The camera does not report the capability a request needs
    #[error("{0}")]
    UnsupportedFeature(String),

    /// The physical device is already claimed by another owner
    #[error("Unable to lock '{0}', the device is in use")]
    LockUnavailable(String),

    /// No mode matches the requested binning / bit depth combination
    #[error("No mode matches {0}")]
    ConfigurationMismatch(String),

    #[error("Device not connected")]
    NotConnected,

    /// An exposure or stream is already in progress
    #[error("{0} is busy")]
    Busy(String),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

pub type DriverResult<T> = Result<T, DriverError>;
