//! Touptek camera driver core
//!
//! Publishes each enumerated Touptek camera on a property bus as a sensor
//! device and, when the model has an ST4 port, a guide port device. Both
//! share one hardware connection that is opened by whichever connects first
//! and closed by whichever disconnects last.
//!
//! ```ignore
//! let registry = DeviceRegistry::new(hardware, bus, DriverConfig::default());
//! registry.rescan().await?;
//! // on every USB hot-plug notification
//! registry.notify_hotplug();
//! ```

/// Evaluates an SDK call and logs it with its result code
macro_rules! sdk {
    ($call:expr, $($arg:tt)+) => {{
        let result = $call;
        match &result {
            Ok(value) => tracing::debug!("{} -> {:?}", format_args!($($arg)+), value),
            Err(e) => tracing::error!("{} -> {}", format_args!($($arg)+), e),
        }
        result
    }};
}

pub mod camera;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod guider;
pub mod mode;
pub mod registry;

#[cfg(test)]
mod testing;

pub use camera::CameraDevice;
pub use config::DriverConfig;
pub use connection::{Role, SharedConnection};
pub use device::BusDevice;
pub use error::{DriverError, DriverResult};
pub use guider::{GuideAxis, GuiderDevice};
pub use mode::{BinMode, ModeDescriptor, PixelFamily};
pub use registry::DeviceRegistry;
