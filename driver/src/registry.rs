//! Tracks the cameras the SDK enumerates and the bus devices built on them
//!
//! `reconcile` is the only mutator. Each pass marks every tracked camera
//! absent, re-marks the ones still enumerated, attaches new ones and detaches
//! whatever stayed absent. Passes are serialized by the registry lock so
//! overlapping hot-plug rescans cannot interleave.

use crate::camera::CameraDevice;
use crate::config::DriverConfig;
use crate::connection::SharedConnection;
use crate::device::BusDevice;
use crate::error::{DriverError, DriverResult};
use crate::guider::GuiderDevice;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use toupcore_bus::{Property, PropertyBus, Timer};
use toupcore_hw::{flag, DeviceDescriptor, HardwareInterface};

/// One physical camera: its sensor and, with an ST4 port, its guider
struct TrackedCamera {
    identity: String,
    present: bool,
    camera: Arc<CameraDevice>,
    guider: Option<Arc<GuiderDevice>>,
}

pub struct DeviceRegistry {
    hardware: Arc<dyn HardwareInterface>,
    bus: Arc<dyn PropertyBus>,
    config: Arc<DriverConfig>,
    tracked: Mutex<Vec<TrackedCamera>>,
    pending_rescan: std::sync::Mutex<Option<Timer>>,
    weak: Weak<DeviceRegistry>,
}

impl DeviceRegistry {
    pub fn new(hardware: Arc<dyn HardwareInterface>, bus: Arc<dyn PropertyBus>, config: DriverConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            hardware,
            bus,
            config: Arc::new(config),
            tracked: Mutex::new(Vec::new()),
            pending_rescan: std::sync::Mutex::new(None),
            weak: weak.clone(),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Brings the tracked set in line with one enumeration pass
    pub async fn reconcile(&self, enumeration: &[DeviceDescriptor]) {
        let mut tracked = self.tracked.lock().await;
        for entry in tracked.iter_mut() {
            entry.present = false;
        }

        for descriptor in enumeration {
            if let Some(entry) = tracked.iter_mut().find(|e| e.identity == descriptor.id) {
                entry.present = true;
                continue;
            }
            if tracked.len() >= self.config.max_devices {
                tracing::warn!(
                    "Ignoring '{}' ({}): already tracking {} cameras",
                    descriptor.display_name,
                    descriptor.id,
                    tracked.len()
                );
                continue;
            }
            let entry = self.track(descriptor).await;
            tracked.push(entry);
        }

        let (kept, gone): (Vec<_>, Vec<_>) = std::mem::take(&mut *tracked).into_iter().partition(|e| e.present);
        *tracked = kept;
        for entry in gone {
            self.untrack(entry).await;
        }
    }

    async fn track(&self, descriptor: &DeviceDescriptor) -> TrackedCamera {
        let connection = Arc::new(SharedConnection::new(&descriptor.id, self.hardware.clone()));
        let name = self.bus.make_name_unique(&self.config.sensor_name(&descriptor.display_name));
        let camera = CameraDevice::new(
            &name,
            descriptor.clone(),
            connection.clone(),
            self.bus.clone(),
            self.config.clone(),
        );
        camera.attach().await;

        let guider = if self.config.enable_guider && descriptor.model.has(flag::ST4) {
            let guider_name = self.bus.make_name_unique(&self.config.guider_name(&descriptor.display_name));
            let guider = GuiderDevice::new(&guider_name, &name, descriptor, connection, self.bus.clone());
            guider.attach().await;
            Some(guider)
        } else {
            None
        };

        tracing::info!("Tracking '{}' as '{}'", descriptor.id, name);
        TrackedCamera {
            identity: descriptor.id.clone(),
            present: true,
            camera,
            guider,
        }
    }

    /// Guider goes first; the shared handle closes with whichever side
    /// disconnects last
    async fn untrack(&self, entry: TrackedCamera) {
        if let Some(guider) = entry.guider {
            guider.detach().await;
        }
        entry.camera.detach().await;
        tracing::info!("'{}' is gone", entry.identity);
    }

    /// Enumerates the hardware and reconciles against the result
    pub async fn rescan(&self) -> DriverResult<()> {
        let enumeration = match self.hardware.enumerate() {
            Ok(enumeration) => {
                tracing::debug!("EnumV2() -> {} cameras", enumeration.len());
                enumeration
            }
            Err(e) => {
                tracing::error!("EnumV2() -> {}", e);
                return Err(e.into());
            }
        };
        self.reconcile(&enumeration).await;
        Ok(())
    }

    /// Schedules a rescan once the hot-plug debounce delay has passed.
    /// Another notification inside the delay restarts it.
    pub fn notify_hotplug(&self) {
        let weak = self.weak.clone();
        let timer = Timer::once(self.config.hotplug_debounce(), move || async move {
            if let Some(registry) = weak.upgrade() {
                if let Err(e) = registry.rescan().await {
                    tracing::error!("Hot-plug rescan failed: {}", e);
                }
            }
        });
        let mut pending = self.pending_rescan.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *pending = Some(timer);
    }

    /// Detaches every tracked device
    pub async fn shutdown(&self) {
        let pending = self
            .pending_rescan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(timer) = pending {
            timer.cancel_sync().await;
        }
        let tracked = std::mem::take(&mut *self.tracked.lock().await);
        futures::future::join_all(tracked.into_iter().map(|entry| self.untrack(entry))).await;
    }

    /// Names of every attached device, sensors before their guiders
    pub async fn device_names(&self) -> Vec<String> {
        let tracked = self.tracked.lock().await;
        tracked
            .iter()
            .flat_map(|e| {
                std::iter::once(e.camera.name().to_string()).chain(e.guider.iter().map(|g| g.name().to_string()))
            })
            .collect()
    }

    pub async fn device(&self, name: &str) -> Option<Arc<dyn BusDevice>> {
        let tracked = self.tracked.lock().await;
        tracked.iter().find_map(|e| {
            if e.camera.name() == name {
                return Some(e.camera.clone() as Arc<dyn BusDevice>);
            }
            e.guider
                .as_ref()
                .filter(|g| g.name() == name)
                .map(|g| g.clone() as Arc<dyn BusDevice>)
        })
    }

    pub async fn camera(&self, identity: &str) -> Option<Arc<CameraDevice>> {
        let tracked = self.tracked.lock().await;
        tracked.iter().find(|e| e.identity == identity).map(|e| e.camera.clone())
    }

    pub async fn guider(&self, identity: &str) -> Option<Arc<GuiderDevice>> {
        let tracked = self.tracked.lock().await;
        tracked.iter().find(|e| e.identity == identity).and_then(|e| e.guider.clone())
    }

    /// Routes a client request to the device it names
    pub async fn change_property(&self, request: &Property) -> DriverResult<()> {
        let device = self
            .device(&request.device)
            .await
            .ok_or_else(|| DriverError::UnknownDevice(request.device.clone()))?;
        device.change_property(request).await
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
