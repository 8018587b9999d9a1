//! ST4 guide port sharing a camera's hardware connection
//!
//! The two axes are independent: each one is Busy for the length of its
//! current pulse and returns to Ok when the pulse timer fires. A new pulse
//! on a busy axis replaces the running one.

use crate::connection::{Role, SharedConnection};
use crate::device::BusDevice;
use crate::error::{DriverError, DriverResult};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use toupcore_bus::names::*;
use toupcore_bus::{Permission, Property, PropertyBus, PropertyKind, PropertyState, SwitchRule, Timer};
use toupcore_hw::{option, DeviceDescriptor, GuideDirection, InfoKey};

/// Longest pulse a client may request, in ms
pub const MAX_PULSE_MS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideAxis {
    /// North / South
    Dec,
    /// East / West
    Ra,
}

impl GuideAxis {
    pub fn of(direction: GuideDirection) -> Self {
        match direction {
            GuideDirection::North | GuideDirection::South => Self::Dec,
            GuideDirection::East | GuideDirection::West => Self::Ra,
        }
    }

    pub fn property_name(self) -> &'static str {
        match self {
            Self::Dec => GUIDER_GUIDE_DEC,
            Self::Ra => GUIDER_GUIDE_RA,
        }
    }

    /// Item names with their directions, in the order they are checked
    fn directions(self) -> [(&'static str, GuideDirection); 2] {
        match self {
            Self::Dec => [(GUIDER_GUIDE_NORTH, GuideDirection::North), (GUIDER_GUIDE_SOUTH, GuideDirection::South)],
            Self::Ra => [(GUIDER_GUIDE_EAST, GuideDirection::East), (GUIDER_GUIDE_WEST, GuideDirection::West)],
        }
    }

    fn from_property_name(name: &str) -> Option<Self> {
        match name {
            GUIDER_GUIDE_DEC => Some(Self::Dec),
            GUIDER_GUIDE_RA => Some(Self::Ra),
            _ => None,
        }
    }
}

fn item_name(direction: GuideDirection) -> &'static str {
    match direction {
        GuideDirection::North => GUIDER_GUIDE_NORTH,
        GuideDirection::South => GUIDER_GUIDE_SOUTH,
        GuideDirection::East => GUIDER_GUIDE_EAST,
        GuideDirection::West => GUIDER_GUIDE_WEST,
    }
}

#[derive(Default)]
struct AxisPulse {
    timer: Option<Timer>,
    /// Bumped per pulse so a stale timer cannot end a newer pulse
    generation: u64,
}

struct GuiderState {
    connected: bool,
    connection: Property,
    info: Property,
    dec: Property,
    ra: Property,
    dec_pulse: AxisPulse,
    ra_pulse: AxisPulse,
}

impl GuiderState {
    fn axis(&mut self, axis: GuideAxis) -> (&mut Property, &mut AxisPulse) {
        match axis {
            GuideAxis::Dec => (&mut self.dec, &mut self.dec_pulse),
            GuideAxis::Ra => (&mut self.ra, &mut self.ra_pulse),
        }
    }
}

pub struct GuiderDevice {
    name: String,
    /// Name of the sensor whose master lock serializes our connects
    master: String,
    bus: Arc<dyn PropertyBus>,
    connection: Arc<SharedConnection>,
    state: Mutex<GuiderState>,
    weak: Weak<GuiderDevice>,
}

impl GuiderDevice {
    pub fn new(
        name: &str,
        master: &str,
        descriptor: &DeviceDescriptor,
        connection: Arc<SharedConnection>,
        bus: Arc<dyn PropertyBus>,
    ) -> Arc<Self> {
        let connection_property = Property::switch(name, CONNECTION, MAIN_GROUP, "Connection status", Permission::ReadWrite, SwitchRule::OneOfMany)
            .with_switch(CONNECTED, "Connected", false)
            .with_switch(DISCONNECTED, "Disconnected", true);
        let info = Property::text(name, INFO, MAIN_GROUP, "Info", Permission::ReadOnly)
            .with_text(INFO_DEVICE_MODEL, "Model", &descriptor.model.name)
            .with_text(INFO_DEVICE_SERIAL, "Serial number", "")
            .with_text(INFO_DEVICE_HW_REVISION, "Hardware revision", "")
            .with_text(INFO_DEVICE_FW_REVISION, "Firmware revision", "");
        let dec = Property::number(name, GUIDER_GUIDE_DEC, GUIDER_MAIN_GROUP, "DEC guiding", Permission::ReadWrite)
            .with_number(GUIDER_GUIDE_NORTH, "North (ms)", 0.0, MAX_PULSE_MS, 1.0, 0.0)
            .with_number(GUIDER_GUIDE_SOUTH, "South (ms)", 0.0, MAX_PULSE_MS, 1.0, 0.0);
        let ra = Property::number(name, GUIDER_GUIDE_RA, GUIDER_MAIN_GROUP, "RA guiding", Permission::ReadWrite)
            .with_number(GUIDER_GUIDE_EAST, "East (ms)", 0.0, MAX_PULSE_MS, 1.0, 0.0)
            .with_number(GUIDER_GUIDE_WEST, "West (ms)", 0.0, MAX_PULSE_MS, 1.0, 0.0);

        Arc::new_cyclic(|weak| Self {
            name: name.to_string(),
            master: master.to_string(),
            bus,
            connection,
            state: Mutex::new(GuiderState {
                connected: false,
                connection: connection_property,
                info,
                dec,
                ra,
                dec_pulse: AxisPulse::default(),
                ra_pulse: AxisPulse::default(),
            }),
            weak: weak.clone(),
        })
    }

    pub async fn property(&self, name: &str) -> Option<Property> {
        let state = self.state.lock().await;
        match name {
            CONNECTION => Some(state.connection.clone()),
            INFO => Some(state.info.clone()),
            GUIDER_GUIDE_DEC => Some(state.dec.clone()),
            GUIDER_GUIDE_RA => Some(state.ra.clone()),
            _ => None,
        }
    }

    pub async fn connect(&self) -> DriverResult<()> {
        let master = self.bus.master_lock(&self.master);
        let _master = master.lock().await;
        let mut state = self.state.lock().await;
        if state.connected {
            return Ok(());
        }

        if let Err(e) = self.connection.acquire(Role::Guider, self.bus.as_ref()).await {
            tracing::error!("Failed to connect '{}': {}", self.name, e);
            let connection = &mut state.connection;
            let _ = connection.set_switch(DISCONNECTED, true);
            connection.state = PropertyState::Alert;
            self.bus.update(connection, Some(&e.to_string()));
            return Err(e);
        }

        {
            let guard = self.connection.lock().await;
            if let Ok(handle) = guard.handle() {
                let hw = guard.hardware();
                let _ = sdk!(hw.put_option(handle, option::CALLBACK_THREAD, 1), "put_Option(OPTION_CALLBACK_THREAD, 1)");
                for (key, item) in [
                    (InfoKey::SerialNumber, INFO_DEVICE_SERIAL),
                    (InfoKey::HardwareVersion, INFO_DEVICE_HW_REVISION),
                    (InfoKey::FirmwareVersion, INFO_DEVICE_FW_REVISION),
                ] {
                    if let Ok(text) = sdk!(hw.get_info(handle, key), "get_Info({:?})", key) {
                        let _ = state.info.set_text(item, &text);
                    }
                }
            }
        }
        self.bus.update(&state.info, None);

        state.connected = true;
        self.bus.define(&state.dec);
        self.bus.define(&state.ra);
        let connection = &mut state.connection;
        let _ = connection.set_switch(CONNECTED, true);
        connection.state = PropertyState::Ok;
        self.bus.update(connection, None);
        tracing::info!("Connected to '{}'", self.name);
        Ok(())
    }

    pub async fn disconnect(&self) -> DriverResult<()> {
        let master = self.bus.master_lock(&self.master);
        let _master = master.lock().await;
        let timers = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return Ok(());
            }
            state.connected = false;
            [state.dec_pulse.timer.take(), state.ra_pulse.timer.take()]
        };

        // Pulse timers take the state lock when they fire
        for timer in timers.into_iter().flatten() {
            timer.cancel_sync().await;
        }

        let mut state = self.state.lock().await;
        for axis in [GuideAxis::Dec, GuideAxis::Ra] {
            let (property, _) = state.axis(axis);
            for (item, _) in axis.directions() {
                let _ = property.set_number_both(item, 0.0);
            }
            property.state = PropertyState::Idle;
            self.bus.delete(property, None);
        }
        let connection = &mut state.connection;
        let _ = connection.set_switch(DISCONNECTED, true);
        connection.state = PropertyState::Ok;
        self.bus.update(connection, None);
        drop(state);

        self.connection.release(Role::Guider, self.bus.as_ref()).await;
        tracing::info!("Disconnected from '{}'", self.name);
        Ok(())
    }

    /// Sends one ST4 pulse. Returns the resulting state of the axis.
    pub async fn pulse(&self, direction: GuideDirection, duration_ms: u32) -> DriverResult<PropertyState> {
        let axis = GuideAxis::of(direction);
        let request = axis.directions().iter().fold(
            Property::request(&self.name, axis.property_name(), PropertyKind::Number),
            |request, (item, d)| {
                let value = if *d == direction { f64::from(duration_ms) } else { 0.0 };
                request.with_number(item, "", 0.0, 0.0, 0.0, value)
            },
        );
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(DriverError::NotConnected);
        }
        self.change_axis(&mut state, axis, &request).await?;
        Ok(state.axis(axis).0.state)
    }

    /// Copies a guide request and starts the pulse it names. The direction
    /// the request itself asks for wins over one still set from an earlier
    /// pulse on the same axis.
    async fn change_axis(&self, state: &mut GuiderState, axis: GuideAxis, request: &Property) -> DriverResult<()> {
        let (property, pulse) = state.axis(axis);
        property.copy_values(request);

        let requested = |item: &str| {
            request
                .item(item)
                .and(property.number_value(item))
                .filter(|ms| *ms > 0.0)
        };
        let wanted = axis
            .directions()
            .into_iter()
            .find_map(|(item, direction)| requested(item).map(|ms| (direction, ms)))
            .or_else(|| {
                axis.directions()
                    .into_iter()
                    .find_map(|(item, direction)| property.number_value(item).filter(|ms| *ms > 0.0).map(|ms| (direction, ms)))
            });

        pulse.generation += 1;
        pulse.timer = None;
        let Some((direction, ms)) = wanted else {
            property.state = PropertyState::Ok;
            self.bus.update(property, None);
            return Ok(());
        };
        for (item, other) in axis.directions() {
            if other != direction {
                let _ = property.set_number_both(item, 0.0);
            }
        }

        let duration_ms = ms.round() as u32;
        let result = {
            let guard = self.connection.lock().await;
            guard.handle().and_then(|handle| {
                sdk!(
                    guard.hardware().st4_guide(handle, direction, duration_ms),
                    "ST4PlusGuide({}, {})",
                    direction.code(),
                    duration_ms
                )
                .map_err(DriverError::from)
            })
        };
        if let Err(e) = result {
            property.state = PropertyState::Alert;
            self.bus.update(property, Some(&e.to_string()));
            return Err(e);
        }

        property.state = PropertyState::Busy;
        self.bus.update(property, None);
        let weak = self.weak.clone();
        let generation = pulse.generation;
        pulse.timer = Some(Timer::once(Duration::from_millis(u64::from(duration_ms)), move || async move {
            if let Some(guider) = weak.upgrade() {
                guider.finish_pulse(axis, generation).await;
            }
        }));
        tracing::debug!("'{}' {} pulse {} ms", self.name, item_name(direction), duration_ms);
        Ok(())
    }

    async fn finish_pulse(&self, axis: GuideAxis, generation: u64) {
        let mut state = self.state.lock().await;
        if !state.connected {
            return;
        }
        let (property, pulse) = state.axis(axis);
        if pulse.generation != generation {
            return;
        }
        pulse.timer = None;
        for (item, _) in axis.directions() {
            let _ = property.set_number_both(item, 0.0);
        }
        property.state = PropertyState::Ok;
        self.bus.update(property, None);
    }

    async fn change_connection(&self, request: &Property) -> DriverResult<()> {
        let wanted = {
            let mut state = self.state.lock().await;
            let connection = &mut state.connection;
            let was_connected = connection.switch_value(CONNECTED) == Some(true);
            connection.copy_values(request);
            let wanted = connection.switch_value(CONNECTED) == Some(true);
            if wanted == was_connected {
                connection.state = PropertyState::Ok;
                self.bus.update(connection, None);
                return Ok(());
            }
            connection.state = PropertyState::Busy;
            self.bus.update(connection, None);
            wanted
        };
        if wanted {
            self.connect().await
        } else {
            self.disconnect().await
        }
    }
}

#[async_trait]
impl BusDevice for GuiderDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attach(&self) {
        self.bus.attach_device(&self.name);
        let state = self.state.lock().await;
        self.bus.define(&state.connection);
        self.bus.define(&state.info);
        tracing::info!("'{}' attached", self.name);
    }

    async fn detach(&self) {
        if let Err(e) = self.disconnect().await {
            tracing::warn!("Disconnect of '{}' during detach failed: {}", self.name, e);
        }
        {
            let state = self.state.lock().await;
            self.bus.delete(&state.connection, None);
            self.bus.delete(&state.info, None);
        }
        self.bus.detach_device(&self.name);
        tracing::info!("'{}' detached", self.name);
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    async fn change_property(&self, request: &Property) -> DriverResult<()> {
        if request.name == CONNECTION {
            return self.change_connection(request).await;
        }
        let axis = GuideAxis::from_property_name(&request.name)
            .ok_or_else(|| DriverError::UnknownProperty(request.name.clone()))?;
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(DriverError::NotConnected);
        }
        self.change_axis(&mut state, axis, request).await
    }
}

impl std::fmt::Debug for GuiderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuiderDevice")
            .field("name", &self.name)
            .field("master", &self.master)
            .finish_non_exhaustive()
    }
}
