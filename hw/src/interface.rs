//! The hardware capability set consumed by the camera core

use crate::error::HwResult;
use crate::types::{
    ColorAdjustment, DeviceDescriptor, FrameInfo, GuideDirection, HardwareEvent, HardwareHandle,
    InfoKey, ParameterRange, RangeKey, Roi,
};
use std::sync::Arc;

/// Receives camera events. Invoked on a thread owned by the SDK, so it must
/// return quickly and must never call back into `stop()` or `close()`.
pub type EventCallback = Arc<dyn Fn(HardwareEvent) + Send + Sync>;

/// Synchronous camera SDK.
///
/// Calls against one handle are not required to be thread safe; callers
/// serialize them.
pub trait HardwareInterface: Send + Sync {
    /// Lists the cameras currently attached
    fn enumerate(&self) -> HwResult<Vec<DeviceDescriptor>>;

    fn open(&self, id: &str) -> HwResult<HardwareHandle>;

    fn close(&self, handle: HardwareHandle);

    /// Starts pull-mode acquisition. `callback` stays registered until
    /// `stop()` or `close()`.
    fn start_pull_mode(&self, handle: HardwareHandle, callback: EventCallback) -> HwResult<()>;

    fn stop(&self, handle: HardwareHandle) -> HwResult<()>;

    /// Requests `count` frames in software trigger mode. 0 cancels,
    /// `TRIGGER_CONTINUOUS` triggers until cancelled.
    fn trigger(&self, handle: HardwareHandle, count: u16) -> HwResult<()>;

    /// Cancels any outstanding trigger
    fn abort(&self, handle: HardwareHandle) -> HwResult<()> {
        self.trigger(handle, 0)
    }

    fn get_option(&self, handle: HardwareHandle, option: u32) -> HwResult<i32>;

    fn put_option(&self, handle: HardwareHandle, option: u32, value: i32) -> HwResult<()>;

    /// Copies the pending frame into `buffer` at `bits` per pixel
    fn pull_image(&self, handle: HardwareHandle, buffer: &mut [u8], bits: u32) -> HwResult<FrameInfo>;

    fn get_range(&self, handle: HardwareHandle, key: RangeKey) -> HwResult<ParameterRange>;

    fn put_expo_time(&self, handle: HardwareHandle, micros: u32) -> HwResult<()>;

    fn put_auto_expo_enable(&self, handle: HardwareHandle, enable: bool) -> HwResult<()>;

    fn get_expo_gain(&self, handle: HardwareHandle) -> HwResult<u16>;

    fn put_expo_gain(&self, handle: HardwareHandle, gain: u16) -> HwResult<()>;

    fn put_roi(&self, handle: HardwareHandle, roi: Roi) -> HwResult<()>;

    fn put_speed(&self, handle: HardwareHandle, speed: u16) -> HwResult<()>;

    /// Sensor temperature in 0.1 degC
    fn get_temperature(&self, handle: HardwareHandle) -> HwResult<i16>;

    /// Cooler target in 0.1 degC
    fn put_temperature(&self, handle: HardwareHandle, tenths: i16) -> HwResult<()>;

    fn get_info(&self, handle: HardwareHandle, key: InfoKey) -> HwResult<String>;

    /// Raw pixel format as (fourcc, bit depth)
    fn get_raw_format(&self, handle: HardwareHandle) -> HwResult<(u32, u32)>;

    fn put_adjustment(&self, handle: HardwareHandle, adjustment: ColorAdjustment, value: i32) -> HwResult<()>;

    fn put_white_balance_gain(&self, handle: HardwareHandle, gain: [i32; 3]) -> HwResult<()>;

    fn get_fan_max_speed(&self, handle: HardwareHandle) -> HwResult<i32>;

    /// Drives the ST4 port in `direction` for `duration_ms`
    fn st4_guide(&self, handle: HardwareHandle, direction: GuideDirection, duration_ms: u32) -> HwResult<()>;
}
