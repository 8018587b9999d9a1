//! Client-visible devices

use crate::error::DriverResult;
use async_trait::async_trait;
use toupcore_bus::Property;

/// A device published on the property bus
#[async_trait]
pub trait BusDevice: Send + Sync {
    /// Unique name on the bus
    fn name(&self) -> &str;

    /// Registers the device and defines its initial properties
    async fn attach(&self);

    /// Disconnects if needed and withdraws the device
    async fn detach(&self);

    async fn is_connected(&self) -> bool;

    /// Applies a client request addressed to one of this device's
    /// properties.
    ///
    /// Failures are also reported through the property's state and message,
    /// so callers that only watch the bus may ignore the result.
    async fn change_property(&self, request: &Property) -> DriverResult<()>;
}
