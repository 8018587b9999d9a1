//! Shared fixtures for the driver's unit tests

use crate::camera::CameraDevice;
use crate::config::DriverConfig;
use crate::connection::SharedConnection;
use crate::device::BusDevice;
use std::sync::Arc;
use std::time::Duration;
use toupcore_bus::{LocalBus, Property, PropertyKind};
use toupcore_hw::mock::{descriptor, MockHardware};

pub const CAMERA_ID: &str = "tp-1";
pub const CAMERA_MODEL: &str = "ATR585C";

pub struct Rig {
    pub hw: Arc<MockHardware>,
    pub bus: Arc<LocalBus>,
    pub connection: Arc<SharedConnection>,
    pub camera: Arc<CameraDevice>,
}

/// A 1280x960 camera plugged into a mock SDK, not yet attached
pub fn rig(flags: u64, config: DriverConfig) -> Rig {
    let hw = Arc::new(MockHardware::new());
    let descriptor = descriptor(CAMERA_ID, CAMERA_MODEL, flags, 1280, 960);
    hw.plug(descriptor.clone());
    let bus = Arc::new(LocalBus::default());
    let connection = Arc::new(SharedConnection::new(CAMERA_ID, hw.clone()));
    let name = config.sensor_name(CAMERA_MODEL);
    let camera = CameraDevice::new(&name, descriptor, connection.clone(), bus.clone(), Arc::new(config));
    Rig {
        hw,
        bus,
        connection,
        camera,
    }
}

pub async fn connected_camera(flags: u64, config: DriverConfig) -> Rig {
    let rig = rig(flags, config);
    rig.camera.attach().await;
    if let Err(e) = rig.camera.connect().await {
        panic!("connect failed: {}", e);
    }
    rig
}

/// Lets the event worker and deferred transitions run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn switch_request(device: &str, name: &str, items: &[(&str, bool)]) -> Property {
    items
        .iter()
        .fold(Property::request(device, name, PropertyKind::Switch), |p, (item, on)| {
            p.with_switch(item, "", *on)
        })
}

pub fn number_request(device: &str, name: &str, items: &[(&str, f64)]) -> Property {
    items
        .iter()
        .fold(Property::request(device, name, PropertyKind::Number), |p, (item, value)| {
            p.with_number(item, "", 0.0, 0.0, 0.0, *value)
        })
}
