//! Scriptable in-process camera
//!
//! `MockHardware` behaves like the vendor SDK closely enough to drive the
//! camera core without a device: cameras can be plugged and unplugged, any
//! call can be made to fail, every call is recorded, and events can be fired
//! from any thread the way the SDK's own callback thread would.

use crate::error::{HwError, HwResult};
use crate::interface::{EventCallback, HardwareInterface};
use crate::types::{
    bytes_per_pixel, flag, option, BayerPattern, ColorAdjustment, DeviceDescriptor, FrameInfo,
    GuideDirection, HardwareEvent, HardwareHandle, InfoKey, ModelInfo, ParameterRange, RangeKey,
    Resolution, Roi,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// E_NOTIMPL
pub const E_NOTIMPL: i32 = 0x8000_4001u32 as i32;
/// E_FAIL
pub const E_FAIL: i32 = 0x8000_4005u32 as i32;

/// A recorded SDK call
#[derive(Debug, Clone, PartialEq)]
pub enum HwCall {
    Open(String),
    Close,
    StartPullMode,
    Stop,
    Trigger(u16),
    PutOption(u32, i32),
    PullImage { bits: u32 },
    PutExpoTime(u32),
    PutAutoExpoEnable(bool),
    PutExpoGain(u16),
    PutRoi(Roi),
    PutSpeed(u16),
    PutTemperature(i16),
    PutAdjustment(ColorAdjustment, i32),
    PutWhiteBalanceGain([i32; 3]),
    St4Guide(GuideDirection, u32),
}

struct MockDevice {
    descriptor: DeviceDescriptor,
    plugged: bool,
    options: HashMap<u32, i32>,
    temperature: i16,
    gain: u16,
    bayer: Option<BayerPattern>,
}

struct OpenCamera {
    id: String,
    callback: Option<EventCallback>,
    sequence: u32,
    roi: Option<Roi>,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    handles: HashMap<HardwareHandle, OpenCamera>,
    next_handle: usize,
    calls: Vec<HwCall>,
    failures: HashMap<&'static str, i32>,
}

/// Mock implementation of `HardwareInterface`
#[derive(Default)]
pub struct MockHardware {
    state: Mutex<MockState>,
}

/// Builds a descriptor for a camera with a single preview resolution
pub fn descriptor(id: &str, display_name: &str, flags: u64, width: u32, height: u32) -> DeviceDescriptor {
    DeviceDescriptor {
        id: id.to_string(),
        display_name: display_name.to_string(),
        model: ModelInfo {
            name: display_name.to_string(),
            flags,
            max_speed: 2,
            preview: 1,
            still: 0,
            max_fan_speed: if flags & flag::FAN != 0 { 3 } else { 0 },
            pixel_size_x: 3.76,
            pixel_size_y: 3.76,
            resolutions: vec![Resolution { width, height }],
        },
    }
}

impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plugs in a camera. Re-plugging a known id keeps its settings.
    pub fn plug(&self, descriptor: DeviceDescriptor) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.descriptor.id == descriptor.id) {
            device.plugged = true;
            return;
        }
        let mut options = HashMap::from([
            (option::RAW, 1),
            (option::BITDEPTH, 0),
            (option::BINNING, 1),
            (option::TEC, 0),
            (option::TECTARGET, -100),
            (option::TEC_VOLTAGE, 600),
            (option::TEC_VOLTAGE_MAX, 1200),
            (option::FAN, 0),
            (option::HEAT, 0),
            (option::HEAT_MAX, 2),
            (option::CG, 0),
            (option::TRIGGER, 0),
        ]);
        if descriptor.model.flags & flag::TEC_ONOFF == 0 {
            options.remove(&option::TEC_VOLTAGE_MAX);
        }
        let bayer = if descriptor.model.flags & flag::MONO == 0 {
            Some(BayerPattern::Rggb)
        } else {
            None
        };
        state.devices.push(MockDevice {
            descriptor,
            plugged: true,
            options,
            temperature: 200,
            gain: 100,
            bayer,
        });
    }

    /// Removes a camera from enumeration. Open handles keep working until
    /// closed, like the SDK before it reports `Disconnected`.
    pub fn unplug(&self, id: &str) {
        if let Some(device) = self.lock().devices.iter_mut().find(|d| d.descriptor.id == id) {
            device.plugged = false;
        }
    }

    /// Makes every future call named `call` fail with E_FAIL
    pub fn fail(&self, call: &'static str) {
        self.fail_with(call, E_FAIL);
    }

    pub fn fail_with(&self, call: &'static str, code: i32) {
        self.lock().failures.insert(call, code);
    }

    pub fn succeed(&self, call: &'static str) {
        self.lock().failures.remove(call);
    }

    /// Sensor temperature reported by `get_temperature`
    pub fn set_temperature(&self, id: &str, celsius: f64) {
        if let Some(device) = self.lock().devices.iter_mut().find(|d| d.descriptor.id == id) {
            device.temperature = (celsius * 10.0).round() as i16;
        }
    }

    pub fn set_option(&self, id: &str, key: u32, value: i32) {
        if let Some(device) = self.lock().devices.iter_mut().find(|d| d.descriptor.id == id) {
            device.options.insert(key, value);
        }
    }

    pub fn remove_option(&self, id: &str, key: u32) {
        if let Some(device) = self.lock().devices.iter_mut().find(|d| d.descriptor.id == id) {
            device.options.remove(&key);
        }
    }

    pub fn option(&self, id: &str, key: u32) -> Option<i32> {
        self.lock()
            .devices
            .iter()
            .find(|d| d.descriptor.id == id)
            .and_then(|d| d.options.get(&key).copied())
    }

    pub fn calls(&self) -> Vec<HwCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of recorded calls matching `predicate`
    pub fn count_calls(&self, predicate: impl Fn(&HwCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.lock().handles.values().any(|h| h.id == id)
    }

    /// Delivers `event` to the callback registered for camera `id`, on the
    /// calling thread. Returns false if no acquisition is running.
    pub fn fire(&self, id: &str, event: HardwareEvent) -> bool {
        let callback = self
            .lock()
            .handles
            .values()
            .find(|h| h.id == id)
            .and_then(|h| h.callback.clone());
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    fn record(&self, state: &mut MockState, call: HwCall) {
        state.calls.push(call);
    }

    fn injected(state: &MockState, call: &'static str) -> HwResult<()> {
        match state.failures.get(call) {
            Some(code) => Err(HwError::call(call, *code)),
            None => Ok(()),
        }
    }

    fn with_device<T>(
        &self,
        handle: HardwareHandle,
        call: &'static str,
        record: Option<HwCall>,
        f: impl FnOnce(&mut MockDevice, &mut OpenCamera) -> HwResult<T>,
    ) -> HwResult<T> {
        let mut state = self.lock();
        if let Some(record) = record {
            self.record(&mut state, record);
        }
        Self::injected(&state, call)?;
        let MockState { devices, handles, .. } = &mut *state;
        let open = handles.get_mut(&handle).ok_or(HwError::InvalidHandle)?;
        let device = devices
            .iter_mut()
            .find(|d| d.descriptor.id == open.id)
            .ok_or(HwError::InvalidHandle)?;
        f(device, open)
    }
}

impl HardwareInterface for MockHardware {
    fn enumerate(&self) -> HwResult<Vec<DeviceDescriptor>> {
        let state = self.lock();
        Self::injected(&state, "enumerate")?;
        Ok(state
            .devices
            .iter()
            .filter(|d| d.plugged)
            .map(|d| d.descriptor.clone())
            .collect())
    }

    fn open(&self, id: &str) -> HwResult<HardwareHandle> {
        let mut state = self.lock();
        self.record(&mut state, HwCall::Open(id.to_string()));
        Self::injected(&state, "open")?;
        let plugged = state.devices.iter().any(|d| d.descriptor.id == id && d.plugged);
        if !plugged || state.handles.values().any(|h| h.id == id) {
            return Err(HwError::OpenFailed(id.to_string()));
        }
        state.next_handle += 1;
        let handle = HardwareHandle::from_raw(state.next_handle);
        state.handles.insert(
            handle,
            OpenCamera {
                id: id.to_string(),
                callback: None,
                sequence: 0,
                roi: None,
            },
        );
        Ok(handle)
    }

    fn close(&self, handle: HardwareHandle) {
        let mut state = self.lock();
        self.record(&mut state, HwCall::Close);
        state.handles.remove(&handle);
    }

    fn start_pull_mode(&self, handle: HardwareHandle, callback: EventCallback) -> HwResult<()> {
        self.with_device(handle, "start_pull_mode", Some(HwCall::StartPullMode), |_, open| {
            open.callback = Some(callback);
            Ok(())
        })
    }

    fn stop(&self, handle: HardwareHandle) -> HwResult<()> {
        self.with_device(handle, "stop", Some(HwCall::Stop), |_, open| {
            open.callback = None;
            Ok(())
        })
    }

    fn trigger(&self, handle: HardwareHandle, count: u16) -> HwResult<()> {
        self.with_device(handle, "trigger", Some(HwCall::Trigger(count)), |_, _| Ok(()))
    }

    fn get_option(&self, handle: HardwareHandle, key: u32) -> HwResult<i32> {
        self.with_device(handle, "get_option", None, |device, _| {
            device
                .options
                .get(&key)
                .copied()
                .ok_or(HwError::call("get_option", E_NOTIMPL))
        })
    }

    fn put_option(&self, handle: HardwareHandle, key: u32, value: i32) -> HwResult<()> {
        self.with_device(handle, "put_option", Some(HwCall::PutOption(key, value)), |device, _| {
            device.options.insert(key, value);
            Ok(())
        })
    }

    fn pull_image(&self, handle: HardwareHandle, buffer: &mut [u8], bits: u32) -> HwResult<FrameInfo> {
        self.with_device(handle, "pull_image", Some(HwCall::PullImage { bits }), |device, open| {
            let full = device.descriptor.model.max_resolution();
            // A programmed ROI is already in output pixels; without one the
            // whole sensor is read out at the current bin factor
            let (width, height) = match open.roi {
                Some(roi) => (roi.width, roi.height),
                None => {
                    let bin = (device.options.get(&option::BINNING).copied().unwrap_or(1) & 0x0f).max(1) as u32;
                    (full.width / bin, full.height / bin)
                }
            };
            let len = width as usize * height as usize * bytes_per_pixel(bits);
            if len > buffer.len() {
                return Err(HwError::call("pull_image", E_FAIL));
            }
            open.sequence += 1;
            buffer[..len].fill(open.sequence as u8);
            Ok(FrameInfo {
                width,
                height,
                flag: 0,
                sequence: open.sequence,
                timestamp: u64::from(open.sequence) * 1_000_000,
            })
        })
    }

    fn get_range(&self, handle: HardwareHandle, key: RangeKey) -> HwResult<ParameterRange> {
        self.with_device(handle, "get_range", None, |_, _| {
            Ok(match key {
                RangeKey::ExposureTime => ParameterRange {
                    min: 100,
                    max: 3_600_000_000,
                    default: 10_000,
                },
                RangeKey::Gain => ParameterRange {
                    min: 100,
                    max: 5000,
                    default: 100,
                },
            })
        })
    }

    fn put_expo_time(&self, handle: HardwareHandle, micros: u32) -> HwResult<()> {
        self.with_device(handle, "put_expo_time", Some(HwCall::PutExpoTime(micros)), |_, _| Ok(()))
    }

    fn put_auto_expo_enable(&self, handle: HardwareHandle, enable: bool) -> HwResult<()> {
        self.with_device(handle, "put_auto_expo_enable", Some(HwCall::PutAutoExpoEnable(enable)), |_, _| Ok(()))
    }

    fn get_expo_gain(&self, handle: HardwareHandle) -> HwResult<u16> {
        self.with_device(handle, "get_expo_gain", None, |device, _| Ok(device.gain))
    }

    fn put_expo_gain(&self, handle: HardwareHandle, gain: u16) -> HwResult<()> {
        self.with_device(handle, "put_expo_gain", Some(HwCall::PutExpoGain(gain)), |device, _| {
            device.gain = gain;
            Ok(())
        })
    }

    fn put_roi(&self, handle: HardwareHandle, roi: Roi) -> HwResult<()> {
        self.with_device(handle, "put_roi", Some(HwCall::PutRoi(roi)), |_, open| {
            open.roi = Some(roi);
            Ok(())
        })
    }

    fn put_speed(&self, handle: HardwareHandle, speed: u16) -> HwResult<()> {
        self.with_device(handle, "put_speed", Some(HwCall::PutSpeed(speed)), |_, _| Ok(()))
    }

    fn get_temperature(&self, handle: HardwareHandle) -> HwResult<i16> {
        self.with_device(handle, "get_temperature", None, |device, _| Ok(device.temperature))
    }

    fn put_temperature(&self, handle: HardwareHandle, tenths: i16) -> HwResult<()> {
        self.with_device(handle, "put_temperature", Some(HwCall::PutTemperature(tenths)), |device, _| {
            device.options.insert(option::TECTARGET, i32::from(tenths));
            Ok(())
        })
    }

    fn get_info(&self, handle: HardwareHandle, key: InfoKey) -> HwResult<String> {
        self.with_device(handle, "get_info", None, |device, _| {
            Ok(match key {
                InfoKey::SerialNumber => format!("SN-{}", device.descriptor.id),
                InfoKey::HardwareVersion => "3.1".to_string(),
                InfoKey::FirmwareVersion => "1.7.2".to_string(),
            })
        })
    }

    fn get_raw_format(&self, handle: HardwareHandle) -> HwResult<(u32, u32)> {
        self.with_device(handle, "get_raw_format", None, |device, _| {
            // 'YYYY' for mono sensors
            let code = device.bayer.map_or(0x5959_5959, BayerPattern::to_fourcc);
            Ok((code, 12))
        })
    }

    fn put_adjustment(&self, handle: HardwareHandle, adjustment: ColorAdjustment, value: i32) -> HwResult<()> {
        self.with_device(
            handle,
            "put_adjustment",
            Some(HwCall::PutAdjustment(adjustment, value)),
            |_, _| Ok(()),
        )
    }

    fn put_white_balance_gain(&self, handle: HardwareHandle, gain: [i32; 3]) -> HwResult<()> {
        self.with_device(
            handle,
            "put_white_balance_gain",
            Some(HwCall::PutWhiteBalanceGain(gain)),
            |_, _| Ok(()),
        )
    }

    fn get_fan_max_speed(&self, handle: HardwareHandle) -> HwResult<i32> {
        self.with_device(handle, "get_fan_max_speed", None, |device, _| {
            Ok(device.descriptor.model.max_fan_speed as i32)
        })
    }

    fn st4_guide(&self, handle: HardwareHandle, direction: GuideDirection, duration_ms: u32) -> HwResult<()> {
        self.with_device(
            handle,
            "st4_guide",
            Some(HwCall::St4Guide(direction, duration_ms)),
            |_, _| Ok(()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn camera() -> MockHardware {
        let hw = MockHardware::new();
        hw.plug(descriptor("tp-1", "G3M678C", flag::RAW8 | flag::RAW12 | flag::ST4, 640, 480));
        hw
    }

    #[test]
    fn test_open_is_exclusive() {
        let hw = camera();
        let handle = hw.open("tp-1").unwrap();
        assert!(matches!(hw.open("tp-1"), Err(HwError::OpenFailed(_))));
        hw.close(handle);
        assert!(hw.open("tp-1").is_ok());
    }

    #[test]
    fn test_unplug_hides_from_enumeration() {
        let hw = camera();
        assert_eq!(hw.enumerate().unwrap().len(), 1);
        hw.unplug("tp-1");
        assert!(hw.enumerate().unwrap().is_empty());
        assert!(hw.open("tp-1").is_err());
    }

    #[test]
    fn test_injected_failure() {
        let hw = camera();
        let handle = hw.open("tp-1").unwrap();
        hw.fail("trigger");
        assert!(matches!(
            hw.trigger(handle, 1),
            Err(HwError::Call { call: "trigger", .. })
        ));
        hw.succeed("trigger");
        assert!(hw.trigger(handle, 1).is_ok());
        assert_eq!(hw.count_calls(|c| *c == HwCall::Trigger(1)), 2);
    }

    #[test]
    fn test_pull_image_honours_roi_and_binning() {
        let hw = camera();
        let handle = hw.open("tp-1").unwrap();
        let mut buffer = vec![0u8; 640 * 480 * 3];

        let info = hw.pull_image(handle, &mut buffer, 8).unwrap();
        assert_eq!((info.width, info.height, info.sequence), (640, 480, 1));

        hw.put_option(handle, option::BINNING, 2 | crate::bin_mode::AVERAGE).unwrap();
        let info = hw.pull_image(handle, &mut buffer, 16).unwrap();
        assert_eq!((info.width, info.height, info.sequence), (320, 240, 2));

        // The ROI is not binned a second time
        hw.put_roi(handle, Roi { left: 0, top: 0, width: 320, height: 240 }).unwrap();
        let info = hw.pull_image(handle, &mut buffer, 16).unwrap();
        assert_eq!((info.width, info.height, info.sequence), (320, 240, 3));

        let mut small = vec![0u8; 16];
        assert!(hw.pull_image(handle, &mut small, 16).is_err());
    }

    #[test]
    fn test_fire_reaches_callback_until_stop() {
        let hw = camera();
        let handle = hw.open("tp-1").unwrap();
        let seen = Arc::new(AtomicU32::new(0));
        let s = seen.clone();
        hw.start_pull_mode(handle, Arc::new(move |event: HardwareEvent| {
            s.store(event.code(), Ordering::SeqCst);
        }))
        .unwrap();

        assert!(hw.fire("tp-1", HardwareEvent::Image));
        assert_eq!(seen.load(Ordering::SeqCst), 0x04);

        hw.stop(handle).unwrap();
        assert!(!hw.fire("tp-1", HardwareEvent::Error));
    }

    #[test]
    fn test_unknown_option_is_not_implemented() {
        let hw = camera();
        let handle = hw.open("tp-1").unwrap();
        // No TEC_ONOFF flag on this model
        assert!(hw.get_option(handle, option::TEC_VOLTAGE_MAX).is_err());
        assert_eq!(hw.get_option(handle, option::TECTARGET).unwrap(), -100);
    }
}
