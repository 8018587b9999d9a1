//! The property bus seam between device drivers and their host

use crate::property::Property;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A captured frame handed to the bus for delivery to clients
#[derive(Debug, Clone, Copy)]
pub struct ImageFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub sequence: u32,
    /// Hardware timestamp in microseconds
    pub timestamp: u64,
    /// FITS `BAYERPAT` keyword, absent for mono and RGB frames
    pub bayer_pattern: Option<&'a str>,
    pub data: &'a [u8],
}

/// Everything a bus observer can see happen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusEvent {
    DeviceAttached(String),
    DeviceDetached(String),
    Defined(Property),
    Updated {
        property: Property,
        message: Option<String>,
    },
    Deleted {
        device: String,
        name: String,
        message: Option<String>,
    },
    ImageDelivered {
        device: String,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        sequence: u32,
        bytes: usize,
        bayer_pattern: Option<String>,
        streaming: bool,
    },
    StreamFinalized(String),
    FailureCleanup(String),
}

/// Host-side property bus consumed by drivers.
///
/// All methods are synchronous and must not block for long: they are
/// called with driver locks held.
pub trait PropertyBus: Send + Sync {
    /// Registers a device name with the host
    fn attach_device(&self, device: &str);

    /// Removes a device and everything it defined
    fn detach_device(&self, device: &str);

    /// Returns `name`, or `name #N` if a device with that name is attached
    fn make_name_unique(&self, name: &str) -> String;

    /// Publishes a new property. Hidden properties are ignored.
    fn define(&self, property: &Property);

    /// Publishes new values and state of an already defined property
    fn update(&self, property: &Property, message: Option<&str>);

    /// Withdraws a property
    fn delete(&self, property: &Property, message: Option<&str>);

    /// Lock serializing connect/disconnect of all devices sharing `master`
    fn master_lock(&self, master: &str) -> Arc<tokio::sync::Mutex<()>>;

    /// Host-wide exclusive claim on a physical device. Returns false if
    /// another owner already holds it.
    fn try_global_lock(&self, identity: &str) -> bool;

    fn global_unlock(&self, identity: &str);

    /// Delivers a captured frame, as a single shot or as part of a stream
    fn process_image(&self, device: &str, frame: &ImageFrame<'_>, streaming: bool);

    /// Closes any stream started by `process_image(.., true)`
    fn finalize_video_stream(&self, device: &str);

    /// Releases in-progress delivery resources after an acquisition failure
    fn failure_cleanup(&self, device: &str);
}
