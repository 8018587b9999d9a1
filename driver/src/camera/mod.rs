//! Imaging sensor device
//!
//! A `CameraDevice` owns the property surface of one sensor and drives its
//! exposure, thermal and settings state machines. Vendor events never touch
//! device state directly: the SDK callback only forwards them into a channel
//! drained by a worker task, which applies them under the device's own lock.

mod exposure;
pub mod properties;
mod settings;
mod thermal;

use crate::config::DriverConfig;
use crate::connection::{Role, SharedConnection};
use crate::device::BusDevice;
use crate::error::{DriverError, DriverResult};
use crate::mode::{detect_mode, enumerate_modes, BinMode, ModeDescriptor};
use async_trait::async_trait;
use properties::{CameraProperties, CONVERSION_GAINS, X_CCD_ADVANCED, X_CCD_BIN_MODE, X_CCD_CONVERSION_GAIN, X_CCD_FAN, X_CCD_FAN_SPEED, X_CCD_HEATER, X_CCD_HEATER_POWER};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use toupcore_bus::names::*;
use toupcore_bus::{Property, PropertyBus, PropertyState, Timer};
use toupcore_hw::{
    flag, option, BayerPattern, DeviceDescriptor, EventCallback, HardwareEvent, InfoKey, RangeKey,
};

/// Vendor events waiting for the worker. Events beyond this are dropped.
const EVENT_QUEUE_DEPTH: usize = 64;

/// A vendor event and the arm generation current when it was raised
type QueuedEvent = (u64, HardwareEvent);

/// Drains vendor events on the runtime
struct EventWorker {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl EventWorker {
    /// Stops after every event already queued has been applied
    async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!("Event worker panicked: {}", e);
            }
        }
    }
}

struct CameraState {
    connected: bool,
    props: CameraProperties,
    /// Last temperature read from the sensor, in degC
    current_temperature: f64,
    thermal_timer: Option<Timer>,
    worker: Option<EventWorker>,
}

pub struct CameraDevice {
    name: String,
    descriptor: DeviceDescriptor,
    config: Arc<DriverConfig>,
    bus: Arc<dyn PropertyBus>,
    connection: Arc<SharedConnection>,
    modes: Vec<ModeDescriptor>,
    max_width: u32,
    max_height: u32,
    /// Set by `abort()`, consumed by the next frame the worker sees
    aborting: AtomicBool,
    /// Bumped on every trigger; events raised under an older value belong
    /// to an exposure that is already over
    arm_generation: Arc<AtomicU64>,
    state: Mutex<CameraState>,
    weak: Weak<CameraDevice>,
}

impl CameraDevice {
    pub fn new(
        name: &str,
        descriptor: DeviceDescriptor,
        connection: Arc<SharedConnection>,
        bus: Arc<dyn PropertyBus>,
        config: Arc<DriverConfig>,
    ) -> Arc<Self> {
        let modes = enumerate_modes(&descriptor.model);
        let max = descriptor.model.max_resolution();
        let props = CameraProperties::new(name, &descriptor, &modes);
        Arc::new_cyclic(|weak| Self {
            name: name.to_string(),
            descriptor,
            config,
            bus,
            connection,
            modes,
            max_width: max.width,
            max_height: max.height,
            aborting: AtomicBool::new(false),
            arm_generation: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(CameraState {
                connected: false,
                props,
                current_temperature: 0.0,
                thermal_timer: None,
                worker: None,
            }),
            weak: weak.clone(),
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Modes offered in `CCD_MODE`, in item order
    pub fn modes(&self) -> &[ModeDescriptor] {
        &self.modes
    }

    /// Snapshot of one of this device's properties, published or not
    pub async fn property(&self, name: &str) -> Option<Property> {
        let state = self.state.lock().await;
        let props = &state.props;
        let property = match name {
            CONNECTION => &props.connection,
            INFO => &props.info,
            _ => return props.connected_set().into_iter().find(|p| p.name == name).cloned(),
        };
        Some(property.clone())
    }

    fn selected_mode(&self, props: &CameraProperties) -> Option<(usize, ModeDescriptor)> {
        let index = props.mode.selected_index()?;
        self.modes.get(index).map(|mode| (index, *mode))
    }

    pub async fn connect(&self) -> DriverResult<()> {
        let master = self.bus.master_lock(&self.name);
        let _master = master.lock().await;
        let mut state = self.state.lock().await;
        if state.connected {
            return Ok(());
        }

        if let Err(e) = self.connection.acquire(Role::Sensor, self.bus.as_ref()).await {
            return Err(self.connect_failed(&mut state, e));
        }
        if let Err(e) = self.configure(&mut state).await {
            // Pull mode never started, so the worker has nothing queued
            self.stop_hardware().await;
            if let Some(worker) = state.worker.take() {
                worker.shutdown().await;
            }
            self.connection.release(Role::Sensor, self.bus.as_ref()).await;
            return Err(self.connect_failed(&mut state, e));
        }

        if self.descriptor.model.has(flag::GETTEMPERATURE) {
            state.thermal_timer = Some(self.start_thermal_timer());
        }
        state.connected = true;
        for property in state.props.connected_set() {
            self.bus.define(property);
        }
        let connection = &mut state.props.connection;
        let _ = connection.set_switch(CONNECTED, true);
        connection.state = PropertyState::Ok;
        self.bus.update(connection, None);
        tracing::info!(
            "Connected to '{}' ({}x{}, {} modes)",
            self.name,
            self.max_width,
            self.max_height,
            self.modes.len()
        );
        Ok(())
    }

    fn connect_failed(&self, state: &mut CameraState, error: DriverError) -> DriverError {
        tracing::error!("Failed to connect '{}': {}", self.name, error);
        let connection = &mut state.props.connection;
        let _ = connection.set_switch(DISCONNECTED, true);
        connection.state = PropertyState::Alert;
        self.bus.update(connection, Some(&error.to_string()));
        error
    }

    /// Reads the camera's current settings into the property surface and
    /// starts pull-mode acquisition
    async fn configure(&self, state: &mut CameraState) -> DriverResult<()> {
        let model = &self.descriptor.model;
        let mut guard = self.connection.lock().await;
        let handle = guard.handle()?;
        let hw = guard.hardware();
        let props = &mut state.props;

        if model.has(flag::GETTEMPERATURE) && props.temperature.is_writable() {
            if let Ok(tec) = sdk!(hw.get_option(handle, option::TEC), "get_Option(OPTION_TEC)") {
                let item = if tec != 0 { CCD_COOLER_ON } else { CCD_COOLER_OFF };
                let _ = props.cooler.set_switch(item, true);
            }
            if let Ok(target) = sdk!(hw.get_option(handle, option::TECTARGET), "get_Option(OPTION_TECTARGET)") {
                let target = f64::from(target) / 10.0;
                state.current_temperature = target;
                let _ = props.temperature.set_number_target(CCD_TEMPERATURE_ITEM, target);
            }
        }

        let _ = sdk!(hw.put_option(handle, option::CALLBACK_THREAD, 1), "put_Option(OPTION_CALLBACK_THREAD, 1)");

        for (key, item) in [
            (InfoKey::SerialNumber, INFO_DEVICE_SERIAL),
            (InfoKey::HardwareVersion, INFO_DEVICE_HW_REVISION),
            (InfoKey::FirmwareVersion, INFO_DEVICE_FW_REVISION),
        ] {
            if let Ok(text) = sdk!(hw.get_info(handle, key), "get_Info({:?})", key) {
                let _ = props.info.set_text(item, &text);
            }
        }
        self.bus.update(&props.info, None);

        let bayer = sdk!(hw.get_raw_format(handle), "get_RawFormat()")
            .ok()
            .and_then(|(fourcc, _)| BayerPattern::from_fourcc(fourcc));

        let raw = model.is_mono() || hw.get_option(handle, option::RAW).map_or(true, |v| v != 0);
        let high_depth = hw.get_option(handle, option::BITDEPTH).map_or(false, |v| v != 0);
        let binning = sdk!(hw.get_option(handle, option::BINNING), "get_Option(OPTION_BINNING)").unwrap_or(1);
        if let Some(index) = detect_mode(&self.modes, model, raw, high_depth, binning) {
            let _ = props.mode.set_switch(&self.modes[index].name(), true);
            let _ = props.frame.set_number_both(CCD_FRAME_BITS_PER_PIXEL, f64::from(self.modes[index].bit_depth));
        }
        let bin = f64::from((binning & 0x0f).max(1));
        let _ = props.bin.set_number_both(CCD_BIN_HORIZONTAL, bin);
        let _ = props.bin.set_number_both(CCD_BIN_VERTICAL, bin);

        let bits = self.selected_mode(props).map_or(8, |(_, mode)| mode.pull_bits());
        let bin_mode = props
            .bin_mode
            .selected()
            .and_then(|item| BinMode::from_item_name(&item.name))
            .unwrap_or_default();
        let acquisition = guard.acquisition_mut();
        acquisition.invalidate();
        acquisition.bits = bits;
        acquisition.bin_mode = bin_mode;
        acquisition.bayer = bayer;

        if let Ok(range) = sdk!(hw.get_range(handle, RangeKey::ExposureTime), "get_ExpTimeRange()") {
            let (min, max) = (f64::from(range.min) / 1e6, f64::from(range.max) / 1e6);
            let _ = props.exposure.set_number_range(CCD_EXPOSURE_ITEM, min, max);
            let _ = props.streaming.set_number_range(CCD_STREAMING_EXPOSURE, min, max);
        }
        let _ = sdk!(hw.put_auto_expo_enable(handle, false), "put_AutoExpoEnable(false)");

        if let Ok(range) = sdk!(hw.get_range(handle, RangeKey::Gain), "get_ExpoAGainRange()") {
            let _ = props.gain.set_number_range(CCD_GAIN_ITEM, f64::from(range.min), f64::from(range.max));
        }
        if let Ok(gain) = sdk!(hw.get_expo_gain(handle), "get_ExpoAGain()") {
            let _ = props.gain.set_number_both(CCD_GAIN_ITEM, f64::from(gain));
        }

        if let Some(fan) = props.fan.as_mut() {
            if let Ok(max) = sdk!(hw.get_fan_max_speed(handle), "get_FanMaxSpeed()") {
                let _ = fan.set_number_range(X_CCD_FAN_SPEED, 0.0, f64::from(max));
            }
            if let Ok(speed) = sdk!(hw.get_option(handle, option::FAN), "get_Option(OPTION_FAN)") {
                let _ = fan.set_number_both(X_CCD_FAN_SPEED, f64::from(speed));
            }
        }
        if let Some(heater) = props.heater.as_mut() {
            if let Ok(max) = sdk!(hw.get_option(handle, option::HEAT_MAX), "get_Option(OPTION_HEAT_MAX)") {
                let _ = heater.set_number_range(X_CCD_HEATER_POWER, 0.0, f64::from(max));
            }
            if let Ok(power) = sdk!(hw.get_option(handle, option::HEAT), "get_Option(OPTION_HEAT)") {
                let _ = heater.set_number_both(X_CCD_HEATER_POWER, f64::from(power));
            }
        }
        if let Some(conversion_gain) = props.conversion_gain.as_mut() {
            if let Ok(value) = sdk!(hw.get_option(handle, option::CG), "get_Option(OPTION_CG)") {
                if let Some(item) = usize::try_from(value).ok().and_then(|i| CONVERSION_GAINS.get(i)) {
                    let _ = conversion_gain.set_switch(item, true);
                }
            }
        }

        sdk!(hw.put_option(handle, option::TRIGGER, 1), "put_Option(OPTION_TRIGGER, 1)")?;

        let (sender, receiver) = mpsc::channel::<QueuedEvent>(EVENT_QUEUE_DEPTH);
        let generation = self.arm_generation.clone();
        let camera = self.name.clone();
        let callback: EventCallback = Arc::new(move |event| {
            if let Err(mpsc::error::TrySendError::Full((_, event))) =
                sender.try_send((generation.load(Ordering::SeqCst), event))
            {
                tracing::warn!("'{}': event queue full, dropped {:?}", camera, event);
            }
        });
        state.worker = Some(self.spawn_worker(receiver));
        sdk!(hw.start_pull_mode(handle, callback.clone()), "StartPullModeWithCallback()")?;
        guard.acquisition_mut().callback = Some(callback);
        Ok(())
    }

    fn spawn_worker(&self, mut events: mpsc::Receiver<QueuedEvent>) -> EventWorker {
        let (stop, mut stopped) = oneshot::channel();
        let weak = self.weak.clone();
        let mut buffer = vec![0u8; 3 * self.max_width as usize * self.max_height as usize];
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = events.recv() => {
                        let Some((generation, event)) = event else { break };
                        let Some(camera) = weak.upgrade() else { break };
                        camera.on_hardware_event(event, generation, &mut buffer).await;
                    }
                    _ = &mut stopped => break,
                }
            }
        });
        EventWorker { stop, task }
    }

    /// Stops acquisition and unregisters the event callback
    async fn stop_hardware(&self) {
        let mut guard = self.connection.lock().await;
        if let Ok(handle) = guard.handle() {
            let _ = sdk!(guard.hardware().stop(handle), "Stop()");
        }
        guard.acquisition_mut().callback = None;
    }

    pub async fn disconnect(&self) -> DriverResult<()> {
        let master = self.bus.master_lock(&self.name);
        let _master = master.lock().await;
        let (worker, timer) = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return Ok(());
            }
            state.connected = false;
            (state.worker.take(), state.thermal_timer.take())
        };

        // Both the worker and the thermal poll take the state lock, so it
        // must not be held while waiting for them
        self.stop_hardware().await;
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
        if let Some(timer) = timer {
            timer.cancel_sync().await;
        }

        let mut state = self.state.lock().await;
        let props = &mut state.props;
        for property in [&mut props.exposure, &mut props.streaming] {
            if property.state == PropertyState::Busy {
                property.state = PropertyState::Alert;
            }
        }
        for property in props.connected_set() {
            self.bus.delete(property, None);
        }
        let connection = &mut props.connection;
        let _ = connection.set_switch(DISCONNECTED, true);
        connection.state = PropertyState::Ok;
        self.bus.update(connection, None);
        drop(state);

        self.connection.release(Role::Sensor, self.bus.as_ref()).await;
        tracing::info!("Disconnected from '{}'", self.name);
        Ok(())
    }

    async fn change_connection(&self, request: &Property) -> DriverResult<()> {
        let wanted = {
            let mut state = self.state.lock().await;
            let connection = &mut state.props.connection;
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
impl BusDevice for CameraDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attach(&self) {
        self.bus.attach_device(&self.name);
        let state = self.state.lock().await;
        self.bus.define(&state.props.connection);
        self.bus.define(&state.props.info);
        tracing::info!("'{}' attached", self.name);
    }

    async fn detach(&self) {
        if let Err(e) = self.disconnect().await {
            tracing::warn!("Disconnect of '{}' during detach failed: {}", self.name, e);
        }
        {
            let state = self.state.lock().await;
            self.bus.delete(&state.props.connection, None);
            self.bus.delete(&state.props.info, None);
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
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(DriverError::NotConnected);
        }
        match request.name.as_str() {
            CCD_EXPOSURE => self.begin_exposure(&mut state, request).await.map(|_| ()),
            CCD_STREAMING => self.begin_streaming(&mut state, request).await.map(|_| ()),
            CCD_ABORT_EXPOSURE => self.change_abort(&mut state, request).await,
            CCD_MODE => self.change_mode(&mut state, request).await,
            CCD_BIN => self.change_bin(&mut state, request).await,
            CCD_FRAME => self.change_frame(&mut state, request).await,
            CCD_GAIN => self.change_gain(&mut state, request).await,
            CCD_COOLER => self.change_cooler(&mut state, request).await,
            CCD_TEMPERATURE => self.change_temperature(&mut state, request).await,
            X_CCD_ADVANCED => self.change_advanced(&mut state, request).await,
            X_CCD_FAN => self.change_fan(&mut state, request).await,
            X_CCD_HEATER => self.change_heater(&mut state, request).await,
            X_CCD_CONVERSION_GAIN => self.change_conversion_gain(&mut state, request).await,
            X_CCD_BIN_MODE => self.change_bin_mode(&mut state, request).await,
            other => Err(DriverError::UnknownProperty(other.to_string())),
        }
    }
}

impl std::fmt::Debug for CameraDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraDevice")
            .field("name", &self.name)
            .field("identity", &self.connection.identity())
            .field("modes", &self.modes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connected_camera, rig, settle, switch_request};
    use toupcore_bus::BusEvent;
    use toupcore_hw::mock::HwCall;

    const FLAGS: u64 = flag::RAW8 | flag::RAW12 | flag::ROI_HARDWARE | flag::ST4;

    #[tokio::test(start_paused = true)]
    async fn test_attach_defines_connection_and_info_only() {
        let rig = rig(FLAGS, DriverConfig::default());
        rig.camera.attach().await;

        assert!(rig.bus.devices().contains(&rig.camera.name().to_string()));
        assert!(rig.bus.is_defined(rig.camera.name(), CONNECTION));
        assert!(rig.bus.is_defined(rig.camera.name(), INFO));
        assert!(!rig.bus.is_defined(rig.camera.name(), CCD_EXPOSURE));
        assert!(!rig.camera.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_sequence() {
        let rig = connected_camera(FLAGS | flag::GETTEMPERATURE | flag::TEC_ONOFF, DriverConfig::default()).await;
        let name = rig.camera.name();

        let calls = rig.hw.calls();
        assert!(calls.contains(&HwCall::PutOption(option::CALLBACK_THREAD, 1)));
        assert!(calls.contains(&HwCall::PutAutoExpoEnable(false)));
        assert!(calls.contains(&HwCall::PutOption(option::TRIGGER, 1)));
        assert_eq!(calls.last(), Some(&HwCall::StartPullMode));

        let info = rig.bus.property(name, INFO).unwrap();
        assert_eq!(info.text_value(INFO_DEVICE_SERIAL), Some("SN-tp-1"));
        assert_eq!(info.text_value(INFO_DEVICE_FW_REVISION), Some("1.7.2"));

        // Mock starts in RAW, 8 bit, unbinned
        let mode = rig.bus.property(name, CCD_MODE).unwrap();
        assert_eq!(mode.selected().map(|i| i.name.as_str()), Some("RAW08_1"));
        let exposure = rig.bus.property(name, CCD_EXPOSURE).unwrap();
        assert_eq!(exposure.number_range(CCD_EXPOSURE_ITEM), Some((0.0001, 3600.0)));
        let gain = rig.bus.property(name, CCD_GAIN).unwrap();
        assert_eq!(gain.number_range(CCD_GAIN_ITEM), Some((100.0, 5000.0)));
        let temperature = rig.bus.property(name, CCD_TEMPERATURE).unwrap();
        assert_eq!(temperature.number_target(CCD_TEMPERATURE_ITEM), Some(-10.0));

        let connection = rig.bus.property(name, CONNECTION).unwrap();
        assert_eq!(connection.state, PropertyState::Ok);
        assert_eq!(connection.switch_value(CONNECTED), Some(true));
        assert!(rig.bus.is_globally_locked("tp-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_detects_binned_high_depth_mode() {
        let rig = rig(FLAGS, DriverConfig::default());
        rig.hw.set_option("tp-1", option::BITDEPTH, 1);
        rig.hw.set_option("tp-1", option::BINNING, 0x42);
        rig.camera.attach().await;
        rig.camera.connect().await.unwrap();

        let mode = rig.camera.property(CCD_MODE).await.unwrap();
        assert_eq!(mode.selected().map(|i| i.name.as_str()), Some("RAW12_2"));
        let bin = rig.camera.property(CCD_BIN).await.unwrap();
        assert_eq!(bin.number_value(CCD_BIN_HORIZONTAL), Some(2.0));
        assert_eq!(bin.number_value(CCD_BIN_VERTICAL), Some(2.0));
        let frame = rig.camera.property(CCD_FRAME).await.unwrap();
        assert_eq!(frame.number_value(CCD_FRAME_BITS_PER_PIXEL), Some(12.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_reports_alert() {
        let rig = rig(FLAGS, DriverConfig::default());
        rig.camera.attach().await;
        rig.hw.fail("start_pull_mode");

        let err = rig.camera.connect().await.unwrap_err();
        assert!(matches!(err, DriverError::HardwareCallFailed(_)));
        let connection = rig.bus.property(rig.camera.name(), CONNECTION).unwrap();
        assert_eq!(connection.state, PropertyState::Alert);
        assert_eq!(connection.switch_value(DISCONNECTED), Some(true));
        assert!(!rig.camera.is_connected().await);
        assert_eq!(rig.hw.open_handles(), 0);
        assert!(!rig.bus.is_globally_locked("tp-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_locked_elsewhere() {
        let rig = rig(FLAGS, DriverConfig::default());
        rig.camera.attach().await;
        assert!(rig.bus.try_global_lock("tp-1"));

        let err = rig.camera.connect().await.unwrap_err();
        assert_eq!(err, DriverError::LockUnavailable("tp-1".to_string()));
        assert_eq!(
            rig.bus.last_message(rig.camera.name(), CONNECTION).as_deref(),
            Some("Unable to lock 'tp-1', the device is in use")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_tears_down() {
        let rig = connected_camera(FLAGS | flag::GETTEMPERATURE, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        rig.camera
            .change_property(&switch_request(&name, CONNECTION, &[(DISCONNECTED, true)]))
            .await
            .unwrap();

        assert!(!rig.camera.is_connected().await);
        assert!(!rig.bus.is_defined(&name, CCD_EXPOSURE));
        assert!(!rig.bus.is_defined(&name, CCD_TEMPERATURE));
        assert!(rig.bus.is_defined(&name, CONNECTION));
        assert_eq!(rig.hw.count_calls(|c| *c == HwCall::Stop), 1);
        assert_eq!(rig.hw.count_calls(|c| *c == HwCall::Close), 1);
        assert!(!rig.bus.is_globally_locked("tp-1"));

        // Nothing fires into a stopped camera and no telemetry follows
        assert!(!rig.hw.fire("tp-1", HardwareEvent::Image));
        rig.bus.clear_history();
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert!(rig.bus.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_request_publishes_busy_first() {
        let rig = rig(FLAGS, DriverConfig::default());
        rig.camera.attach().await;
        let name = rig.camera.name().to_string();

        rig.camera
            .change_property(&switch_request(&name, CONNECTION, &[(CONNECTED, true)]))
            .await
            .unwrap();

        let states: Vec<_> = rig.bus.updates_of(&name, CONNECTION).iter().map(|p| p.state).collect();
        assert_eq!(states, vec![PropertyState::Idle, PropertyState::Busy, PropertyState::Ok]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_need_connection() {
        let rig = rig(FLAGS, DriverConfig::default());
        rig.camera.attach().await;
        let name = rig.camera.name().to_string();

        let err = rig
            .camera
            .change_property(&switch_request(&name, CCD_ABORT_EXPOSURE, &[(CCD_ABORT_EXPOSURE_ITEM, true)]))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_property() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let err = rig
            .camera
            .change_property(&switch_request(rig.camera.name(), "CCD_UPLOAD_MODE", &[("CLIENT", true)]))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::UnknownProperty("CCD_UPLOAD_MODE".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_disconnects() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.detach().await;
        settle().await;

        assert!(!rig.bus.devices().contains(&name));
        assert_eq!(rig.hw.open_handles(), 0);
        assert!(rig
            .bus
            .history()
            .iter()
            .any(|e| *e == BusEvent::DeviceDetached(name.clone())));
    }
}
