//! The hardware connection shared by a sensor and its guide port
//!
//! One physical camera has one SDK handle. The sensor and the guide port
//! each hold a usage marker on it; the handle is opened by whichever side
//! connects first and closed by whichever side disconnects last. Every SDK
//! call on the handle goes through `lock()`.
//!
//! Lock order: a device's own state lock may be held while taking the
//! connection lock, never the other way round.

use crate::error::{DriverError, DriverResult};
use crate::mode::BinMode;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use toupcore_bus::PropertyBus;
use toupcore_hw::{BayerPattern, EventCallback, HardwareHandle, HardwareInterface, Roi};

/// Which sub-device holds a usage marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sensor,
    Guider,
}

/// Sensor settings last applied to the hardware
#[derive(Default)]
pub struct Acquisition {
    /// Index of the mode programmed by the last exposure setup, `None`
    /// forces a full setup on the next exposure
    pub applied_mode: Option<usize>,
    pub applied_roi: Option<Roi>,
    /// Bits per pixel requested from `pull_image`
    pub bits: u32,
    pub bin_mode: BinMode,
    pub bayer: Option<BayerPattern>,
    /// Event sink registered with `start_pull_mode`, reused when a mode
    /// change restarts acquisition
    pub callback: Option<EventCallback>,
}

impl Acquisition {
    /// Forgets the applied mode and ROI so the next exposure reprograms both
    pub fn invalidate(&mut self) {
        self.applied_mode = None;
        self.applied_roi = None;
    }
}

#[derive(Default)]
struct ConnectionState {
    handle: Option<HardwareHandle>,
    sensor_active: bool,
    guide_active: bool,
    acquisition: Acquisition,
}

impl ConnectionState {
    fn marker(&mut self, role: Role) -> &mut bool {
        match role {
            Role::Sensor => &mut self.sensor_active,
            Role::Guider => &mut self.guide_active,
        }
    }
}

pub struct SharedConnection {
    identity: String,
    hardware: Arc<dyn HardwareInterface>,
    state: Mutex<ConnectionState>,
}

/// Exclusive access to the hardware of one camera
pub struct HardwareGuard<'a> {
    state: MutexGuard<'a, ConnectionState>,
    hardware: &'a dyn HardwareInterface,
}

impl<'a> HardwareGuard<'a> {
    /// The open handle, or `NotConnected` if neither side holds one
    pub fn handle(&self) -> DriverResult<HardwareHandle> {
        self.state.handle.ok_or(DriverError::NotConnected)
    }

    pub fn hardware(&self) -> &'a dyn HardwareInterface {
        self.hardware
    }

    pub fn acquisition(&self) -> &Acquisition {
        &self.state.acquisition
    }

    pub fn acquisition_mut(&mut self) -> &mut Acquisition {
        &mut self.state.acquisition
    }
}

impl SharedConnection {
    pub fn new(identity: &str, hardware: Arc<dyn HardwareInterface>) -> Self {
        Self {
            identity: identity.to_string(),
            hardware,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// The id the SDK enumerated this camera under
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn lock(&self) -> HardwareGuard<'_> {
        HardwareGuard {
            state: self.state.lock().await,
            hardware: self.hardware.as_ref(),
        }
    }

    /// Marks `role` active, opening the handle if the sibling has not
    /// already done so. On failure `role` stays inactive.
    pub async fn acquire(&self, role: Role, bus: &dyn PropertyBus) -> DriverResult<HardwareHandle> {
        let mut state = self.state.lock().await;
        let handle = match state.handle {
            Some(handle) => handle,
            None => {
                if !bus.try_global_lock(&self.identity) {
                    tracing::error!("try_global_lock({}): failed to get lock", self.identity);
                    return Err(DriverError::LockUnavailable(self.identity.clone()));
                }
                match self.hardware.open(&self.identity) {
                    Ok(handle) => {
                        tracing::debug!("Open({}) -> {:?}", self.identity, handle);
                        state.handle = Some(handle);
                        state.acquisition = Acquisition::default();
                        handle
                    }
                    Err(e) => {
                        tracing::error!("Open({}) -> {}", self.identity, e);
                        bus.global_unlock(&self.identity);
                        return Err(e.into());
                    }
                }
            }
        };
        *state.marker(role) = true;
        Ok(handle)
    }

    /// Clears the marker of `role` and closes the handle once neither side
    /// is active. Returns true if this call closed it.
    pub async fn release(&self, role: Role, bus: &dyn PropertyBus) -> bool {
        let mut state = self.state.lock().await;
        *state.marker(role) = false;
        if state.sensor_active || state.guide_active {
            return false;
        }
        match state.handle.take() {
            Some(handle) => {
                self.hardware.close(handle);
                tracing::debug!("Close({:?})", handle);
                bus.global_unlock(&self.identity);
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self, role: Role) -> bool {
        let mut state = self.state.lock().await;
        *state.marker(role)
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }
}

impl std::fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toupcore_bus::LocalBus;
    use toupcore_hw::mock::{descriptor, HwCall, MockHardware};
    use toupcore_hw::flag;

    fn setup() -> (Arc<MockHardware>, SharedConnection, LocalBus) {
        let hw = Arc::new(MockHardware::new());
        hw.plug(descriptor("tp-1-2", "G3M678M", flag::MONO | flag::RAW8 | flag::ST4, 640, 480));
        let connection = SharedConnection::new("tp-1-2", hw.clone());
        (hw, connection, LocalBus::default())
    }

    #[tokio::test]
    async fn test_sensor_then_guider_refcount() {
        let (hw, connection, bus) = setup();

        let sensor = connection.acquire(Role::Sensor, &bus).await.unwrap();
        let guider = connection.acquire(Role::Guider, &bus).await.unwrap();
        assert_eq!(sensor, guider);
        assert_eq!(hw.count_calls(|c| matches!(c, HwCall::Open(_))), 1);
        assert!(bus.is_globally_locked("tp-1-2"));

        assert!(!connection.release(Role::Sensor, &bus).await);
        assert!(connection.is_open().await);
        assert!(hw.is_open("tp-1-2"));

        assert!(connection.release(Role::Guider, &bus).await);
        assert!(!connection.is_open().await);
        assert_eq!(hw.count_calls(|c| *c == HwCall::Close), 1);
        assert!(!bus.is_globally_locked("tp-1-2"));

        // Releasing again is a no-op
        assert!(!connection.release(Role::Guider, &bus).await);
        assert_eq!(hw.count_calls(|c| *c == HwCall::Close), 1);
    }

    #[tokio::test]
    async fn test_open_failure_leaves_role_inactive() {
        let (hw, connection, bus) = setup();
        hw.fail("open");

        let err = connection.acquire(Role::Sensor, &bus).await.unwrap_err();
        assert!(matches!(err, DriverError::HardwareCallFailed(_)));
        assert!(!connection.is_active(Role::Sensor).await);
        assert!(!connection.is_open().await);
        assert!(!bus.is_globally_locked("tp-1-2"));
    }

    #[tokio::test]
    async fn test_global_lock_held_elsewhere() {
        let (hw, connection, bus) = setup();
        assert!(bus.try_global_lock("tp-1-2"));

        let err = connection.acquire(Role::Guider, &bus).await.unwrap_err();
        assert_eq!(err, DriverError::LockUnavailable("tp-1-2".to_string()));
        assert_eq!(hw.count_calls(|c| matches!(c, HwCall::Open(_))), 0);
        assert!(!connection.is_active(Role::Guider).await);
    }

    #[tokio::test]
    async fn test_guard_requires_open_handle() {
        let (_hw, connection, bus) = setup();
        assert_eq!(connection.lock().await.handle(), Err(DriverError::NotConnected));

        connection.acquire(Role::Sensor, &bus).await.unwrap();
        let mut guard = connection.lock().await;
        assert!(guard.handle().is_ok());
        guard.acquisition_mut().applied_mode = Some(3);
        guard.acquisition_mut().invalidate();
        assert_eq!(guard.acquisition().applied_mode, None);
    }
}
