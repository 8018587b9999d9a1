//! Touptek Toupcam SDK binding
//!
//! Loads `toupcam.dll` / `libtoupcam.so` / `libtoupcam.dylib` at runtime and
//! exposes it as a `HardwareInterface`. The same binding works for rebranded
//! SDKs built from the Toupcam sources as long as the library is renamed or
//! `ToupcamSdk::load_from` is pointed at it with the `Toupcam_` symbol prefix.

use crate::error::{check, HwError, HwResult};
use crate::interface::{EventCallback, HardwareInterface};
use crate::types::{
    ColorAdjustment, DeviceDescriptor, FrameInfo, GuideDirection, HardwareEvent, HardwareHandle,
    InfoKey, ModelInfo, ParameterRange, RangeKey, Resolution, Roi, MAX_DEVICES,
};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::sync::{Mutex, MutexGuard};

// ============================================================================
// SDK Types
// ============================================================================

/// Opaque handle to a camera
type HToupcam = *mut c_void;

/// The SDK uses wide strings on Windows and narrow strings elsewhere
#[cfg(windows)]
type SdkChar = u16;
#[cfg(not(windows))]
type SdkChar = c_char;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ToupcamResolution {
    width: c_uint,
    height: c_uint,
}

#[repr(C)]
#[allow(dead_code)]
struct ToupcamModelV2 {
    name: *const SdkChar,
    flag: u64,
    maxspeed: c_uint,
    preview: c_uint,
    still: c_uint,
    maxfanspeed: c_uint,
    ioctrol: c_uint,
    xpixsz: f32,
    ypixsz: f32,
    res: [ToupcamResolution; 16],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ToupcamDeviceV2 {
    displayname: [SdkChar; 64],
    id: [SdkChar; 64],
    model: *const ToupcamModelV2,
}

#[repr(C)]
#[derive(Debug, Default)]
struct ToupcamFrameInfoV2 {
    width: c_uint,
    height: c_uint,
    flag: c_uint,
    seq: c_uint,
    timestamp: u64,
}

// ============================================================================
// SDK Function Types
// ============================================================================

type PullCallback = unsafe extern "system" fn(event: c_uint, ctx: *mut c_void);

type FnEnumV2 = unsafe extern "system" fn(arr: *mut ToupcamDeviceV2) -> c_uint;
type FnOpen = unsafe extern "system" fn(id: *const SdkChar) -> HToupcam;
type FnClose = unsafe extern "system" fn(h: HToupcam);
type FnStartPullModeWithCallback =
    unsafe extern "system" fn(h: HToupcam, func: PullCallback, ctx: *mut c_void) -> i32;
type FnStop = unsafe extern "system" fn(h: HToupcam) -> i32;
type FnTrigger = unsafe extern "system" fn(h: HToupcam, number: u16) -> i32;
type FnGetOption = unsafe extern "system" fn(h: HToupcam, option: c_uint, value: *mut c_int) -> i32;
type FnPutOption = unsafe extern "system" fn(h: HToupcam, option: c_uint, value: c_int) -> i32;
type FnPullImageV2 = unsafe extern "system" fn(
    h: HToupcam,
    data: *mut c_void,
    bits: c_int,
    info: *mut ToupcamFrameInfoV2,
) -> i32;
type FnGetExpTimeRange =
    unsafe extern "system" fn(h: HToupcam, min: *mut c_uint, max: *mut c_uint, def: *mut c_uint) -> i32;
type FnGetExpoAGainRange =
    unsafe extern "system" fn(h: HToupcam, min: *mut u16, max: *mut u16, def: *mut u16) -> i32;
type FnPutExpoTime = unsafe extern "system" fn(h: HToupcam, time: c_uint) -> i32;
type FnPutAutoExpoEnable = unsafe extern "system" fn(h: HToupcam, enable: c_int) -> i32;
type FnGetExpoAGain = unsafe extern "system" fn(h: HToupcam, gain: *mut u16) -> i32;
type FnPutExpoAGain = unsafe extern "system" fn(h: HToupcam, gain: u16) -> i32;
type FnPutRoi = unsafe extern "system" fn(
    h: HToupcam,
    x_offset: c_uint,
    y_offset: c_uint,
    x_width: c_uint,
    y_height: c_uint,
) -> i32;
type FnPutSpeed = unsafe extern "system" fn(h: HToupcam, speed: u16) -> i32;
type FnGetTemperature = unsafe extern "system" fn(h: HToupcam, temperature: *mut i16) -> i32;
type FnPutTemperature = unsafe extern "system" fn(h: HToupcam, temperature: i16) -> i32;
type FnGetString = unsafe extern "system" fn(h: HToupcam, buffer: *mut c_char) -> i32;
type FnGetRawFormat = unsafe extern "system" fn(h: HToupcam, fourcc: *mut c_uint, bits: *mut c_uint) -> i32;
type FnPutInt = unsafe extern "system" fn(h: HToupcam, value: c_int) -> i32;
type FnPutWhiteBalanceGain = unsafe extern "system" fn(h: HToupcam, gain: *mut c_int) -> i32;
type FnGetFanMaxSpeed = unsafe extern "system" fn(h: HToupcam) -> c_int;
type FnSt4PlusGuide = unsafe extern "system" fn(h: HToupcam, direction: c_uint, duration: c_uint) -> i32;

#[cfg(windows)]
const LIBRARY_NAME: &str = "toupcam.dll";
#[cfg(target_os = "macos")]
const LIBRARY_NAME: &str = "libtoupcam.dylib";
#[cfg(all(not(windows), not(target_os = "macos")))]
const LIBRARY_NAME: &str = "libtoupcam.so";

// ============================================================================
// SDK Wrapper
// ============================================================================

struct Symbols {
    enum_v2: FnEnumV2,
    open: FnOpen,
    close: FnClose,
    start_pull_mode: FnStartPullModeWithCallback,
    stop: FnStop,
    trigger: FnTrigger,
    get_option: FnGetOption,
    put_option: FnPutOption,
    pull_image_v2: FnPullImageV2,
    get_exp_time_range: FnGetExpTimeRange,
    get_expo_again_range: FnGetExpoAGainRange,
    put_expo_time: FnPutExpoTime,
    put_auto_expo_enable: FnPutAutoExpoEnable,
    get_expo_again: FnGetExpoAGain,
    put_expo_again: FnPutExpoAGain,
    put_roi: FnPutRoi,
    put_speed: FnPutSpeed,
    get_temperature: FnGetTemperature,
    put_temperature: FnPutTemperature,
    get_serial_number: FnGetString,
    get_hw_version: FnGetString,
    get_fw_version: FnGetString,
    get_raw_format: FnGetRawFormat,
    put_contrast: FnPutInt,
    put_hue: FnPutInt,
    put_saturation: FnPutInt,
    put_brightness: FnPutInt,
    put_gamma: FnPutInt,
    put_white_balance_gain: FnPutWhiteBalanceGain,
    get_fan_max_speed: FnGetFanMaxSpeed,
    st4_plus_guide: FnSt4PlusGuide,
}

fn symbol<T: Copy>(library: &Library, name: &str) -> HwResult<T> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    unsafe { library.get::<T>(&bytes) }
        .map(|s| *s)
        .map_err(|e| HwError::SdkNotLoaded(format!("Symbol {} missing: {}", name, e)))
}

impl Symbols {
    fn resolve(library: &Library) -> HwResult<Self> {
        Ok(Self {
            enum_v2: symbol(library, "Toupcam_EnumV2")?,
            open: symbol(library, "Toupcam_Open")?,
            close: symbol(library, "Toupcam_Close")?,
            start_pull_mode: symbol(library, "Toupcam_StartPullModeWithCallback")?,
            stop: symbol(library, "Toupcam_Stop")?,
            trigger: symbol(library, "Toupcam_Trigger")?,
            get_option: symbol(library, "Toupcam_get_Option")?,
            put_option: symbol(library, "Toupcam_put_Option")?,
            pull_image_v2: symbol(library, "Toupcam_PullImageV2")?,
            get_exp_time_range: symbol(library, "Toupcam_get_ExpTimeRange")?,
            get_expo_again_range: symbol(library, "Toupcam_get_ExpoAGainRange")?,
            put_expo_time: symbol(library, "Toupcam_put_ExpoTime")?,
            put_auto_expo_enable: symbol(library, "Toupcam_put_AutoExpoEnable")?,
            get_expo_again: symbol(library, "Toupcam_get_ExpoAGain")?,
            put_expo_again: symbol(library, "Toupcam_put_ExpoAGain")?,
            put_roi: symbol(library, "Toupcam_put_Roi")?,
            put_speed: symbol(library, "Toupcam_put_Speed")?,
            get_temperature: symbol(library, "Toupcam_get_Temperature")?,
            put_temperature: symbol(library, "Toupcam_put_Temperature")?,
            get_serial_number: symbol(library, "Toupcam_get_SerialNumber")?,
            get_hw_version: symbol(library, "Toupcam_get_HwVersion")?,
            get_fw_version: symbol(library, "Toupcam_get_FwVersion")?,
            get_raw_format: symbol(library, "Toupcam_get_RawFormat")?,
            put_contrast: symbol(library, "Toupcam_put_Contrast")?,
            put_hue: symbol(library, "Toupcam_put_Hue")?,
            put_saturation: symbol(library, "Toupcam_put_Saturation")?,
            put_brightness: symbol(library, "Toupcam_put_Brightness")?,
            put_gamma: symbol(library, "Toupcam_put_Gamma")?,
            put_white_balance_gain: symbol(library, "Toupcam_put_WhiteBalanceGain")?,
            get_fan_max_speed: symbol(library, "Toupcam_get_FanMaxSpeed")?,
            st4_plus_guide: symbol(library, "Toupcam_ST4PlusGuide")?,
        })
    }
}

/// Boxed event callback handed to the SDK as its context pointer
struct CallbackSlot(*mut EventCallback);

unsafe impl Send for CallbackSlot {}

impl CallbackSlot {
    fn new(callback: EventCallback) -> Self {
        Self(Box::into_raw(Box::new(callback)))
    }

    /// # Safety
    /// The SDK must no longer be able to call back with this context.
    unsafe fn release(self) {
        drop(Box::from_raw(self.0));
    }
}

unsafe extern "system" fn pull_trampoline(event: c_uint, ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    let callback = &*(ctx as *const EventCallback);
    callback(HardwareEvent::from_code(event));
}

/// The vendor SDK as a `HardwareInterface`
pub struct ToupcamSdk {
    symbols: Symbols,
    callbacks: Mutex<HashMap<HardwareHandle, CallbackSlot>>,
    _library: Library,
}

unsafe impl Send for ToupcamSdk {}
unsafe impl Sync for ToupcamSdk {}

impl ToupcamSdk {
    /// Loads the SDK from the platform's default library name
    pub fn load() -> HwResult<Self> {
        Self::load_from(LIBRARY_NAME)
    }

    pub fn load_from(path: &str) -> HwResult<Self> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| HwError::SdkNotLoaded(format!("Failed to load {}: {}", path, e)))?;
        let symbols = Symbols::resolve(&library)?;
        tracing::info!("Loaded Toupcam SDK from {}", path);
        Ok(Self {
            symbols,
            callbacks: Mutex::new(HashMap::new()),
            _library: library,
        })
    }

    fn callbacks(&self) -> MutexGuard<'_, HashMap<HardwareHandle, CallbackSlot>> {
        self.callbacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn raw(handle: HardwareHandle) -> HToupcam {
        handle.as_raw() as HToupcam
    }

    fn release_callback(&self, handle: HardwareHandle) {
        if let Some(slot) = self.callbacks().remove(&handle) {
            // Stop/Close return only after the SDK's callback thread is idle
            unsafe { slot.release() };
        }
    }

    fn get_string(&self, handle: HardwareHandle, call: &'static str, f: FnGetString) -> HwResult<String> {
        let mut buffer = [0 as c_char; 64];
        check(call, unsafe { f(Self::raw(handle), buffer.as_mut_ptr()) })?;
        let bytes: Vec<u8> = buffer.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(windows)]
fn from_sdk_chars(chars: &[SdkChar]) -> String {
    let end = chars.iter().position(|&c| c == 0).unwrap_or(chars.len());
    String::from_utf16_lossy(&chars[..end])
}

#[cfg(not(windows))]
fn from_sdk_chars(chars: &[SdkChar]) -> String {
    let bytes: Vec<u8> = chars.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(windows)]
fn to_sdk_chars(s: &str) -> Vec<SdkChar> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(not(windows))]
fn to_sdk_chars(s: &str) -> Vec<SdkChar> {
    s.bytes().map(|b| b as SdkChar).chain(std::iter::once(0)).collect()
}

/// Reads a NUL-terminated SDK string of at most 256 characters
unsafe fn from_sdk_ptr(ptr: *const SdkChar) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0;
    while len < 256 && *ptr.add(len) != 0 {
        len += 1;
    }
    from_sdk_chars(std::slice::from_raw_parts(ptr, len))
}

impl HardwareInterface for ToupcamSdk {
    fn enumerate(&self) -> HwResult<Vec<DeviceDescriptor>> {
        let mut arr: Vec<ToupcamDeviceV2> = vec![unsafe { std::mem::zeroed() }; MAX_DEVICES];
        let count = unsafe { (self.symbols.enum_v2)(arr.as_mut_ptr()) } as usize;
        tracing::debug!("Toupcam_EnumV2() -> {}", count);

        let mut devices = Vec::with_capacity(count);
        for dev in arr.iter().take(count.min(MAX_DEVICES)) {
            if dev.model.is_null() {
                continue;
            }
            let model = unsafe { &*dev.model };
            devices.push(DeviceDescriptor {
                id: from_sdk_chars(&dev.id),
                display_name: from_sdk_chars(&dev.displayname),
                model: ModelInfo {
                    name: unsafe { from_sdk_ptr(model.name) },
                    flags: model.flag,
                    max_speed: model.maxspeed,
                    preview: model.preview,
                    still: model.still,
                    max_fan_speed: model.maxfanspeed,
                    pixel_size_x: model.xpixsz,
                    pixel_size_y: model.ypixsz,
                    resolutions: model
                        .res
                        .iter()
                        .map(|r| Resolution { width: r.width, height: r.height })
                        .collect(),
                },
            });
        }
        Ok(devices)
    }

    fn open(&self, id: &str) -> HwResult<HardwareHandle> {
        // Cameras are opened by their '@'-prefixed enumeration id
        let id = to_sdk_chars(&format!("@{}", id));
        let h = unsafe { (self.symbols.open)(id.as_ptr()) };
        if h.is_null() {
            let name = from_sdk_chars(&id);
            tracing::error!("Toupcam_Open({}) returned NULL", name);
            return Err(HwError::OpenFailed(name));
        }
        Ok(HardwareHandle::from_raw(h as usize))
    }

    fn close(&self, handle: HardwareHandle) {
        unsafe { (self.symbols.close)(Self::raw(handle)) };
        self.release_callback(handle);
    }

    fn start_pull_mode(&self, handle: HardwareHandle, callback: EventCallback) -> HwResult<()> {
        if self.callbacks().contains_key(&handle) {
            self.stop(handle)?;
        }
        let slot = CallbackSlot::new(callback);
        let ctx = slot.0 as *mut c_void;
        let result = unsafe { (self.symbols.start_pull_mode)(Self::raw(handle), pull_trampoline, ctx) };
        if result < 0 {
            // Never started, so the SDK holds no reference
            unsafe { slot.release() };
            return Err(HwError::call("Toupcam_StartPullModeWithCallback", result));
        }
        self.callbacks().insert(handle, slot);
        Ok(())
    }

    fn stop(&self, handle: HardwareHandle) -> HwResult<()> {
        let result = check("Toupcam_Stop", unsafe { (self.symbols.stop)(Self::raw(handle)) });
        self.release_callback(handle);
        result
    }

    fn trigger(&self, handle: HardwareHandle, count: u16) -> HwResult<()> {
        check("Toupcam_Trigger", unsafe { (self.symbols.trigger)(Self::raw(handle), count) })
    }

    fn get_option(&self, handle: HardwareHandle, option: u32) -> HwResult<i32> {
        let mut value: c_int = 0;
        check("Toupcam_get_Option", unsafe {
            (self.symbols.get_option)(Self::raw(handle), option, &mut value)
        })?;
        Ok(value)
    }

    fn put_option(&self, handle: HardwareHandle, option: u32, value: i32) -> HwResult<()> {
        check("Toupcam_put_Option", unsafe {
            (self.symbols.put_option)(Self::raw(handle), option, value)
        })
    }

    fn pull_image(&self, handle: HardwareHandle, buffer: &mut [u8], bits: u32) -> HwResult<FrameInfo> {
        let mut info = ToupcamFrameInfoV2::default();
        check("Toupcam_PullImageV2", unsafe {
            (self.symbols.pull_image_v2)(
                Self::raw(handle),
                buffer.as_mut_ptr() as *mut c_void,
                bits as c_int,
                &mut info,
            )
        })?;
        Ok(FrameInfo {
            width: info.width,
            height: info.height,
            flag: info.flag,
            sequence: info.seq,
            timestamp: info.timestamp,
        })
    }

    fn get_range(&self, handle: HardwareHandle, key: RangeKey) -> HwResult<ParameterRange> {
        match key {
            RangeKey::ExposureTime => {
                let (mut min, mut max, mut def) = (0, 0, 0);
                check("Toupcam_get_ExpTimeRange", unsafe {
                    (self.symbols.get_exp_time_range)(Self::raw(handle), &mut min, &mut max, &mut def)
                })?;
                Ok(ParameterRange { min, max, default: def })
            }
            RangeKey::Gain => {
                let (mut min, mut max, mut def) = (0u16, 0u16, 0u16);
                check("Toupcam_get_ExpoAGainRange", unsafe {
                    (self.symbols.get_expo_again_range)(Self::raw(handle), &mut min, &mut max, &mut def)
                })?;
                Ok(ParameterRange {
                    min: min.into(),
                    max: max.into(),
                    default: def.into(),
                })
            }
        }
    }

    fn put_expo_time(&self, handle: HardwareHandle, micros: u32) -> HwResult<()> {
        check("Toupcam_put_ExpoTime", unsafe {
            (self.symbols.put_expo_time)(Self::raw(handle), micros)
        })
    }

    fn put_auto_expo_enable(&self, handle: HardwareHandle, enable: bool) -> HwResult<()> {
        check("Toupcam_put_AutoExpoEnable", unsafe {
            (self.symbols.put_auto_expo_enable)(Self::raw(handle), c_int::from(enable))
        })
    }

    fn get_expo_gain(&self, handle: HardwareHandle) -> HwResult<u16> {
        let mut gain = 0u16;
        check("Toupcam_get_ExpoAGain", unsafe {
            (self.symbols.get_expo_again)(Self::raw(handle), &mut gain)
        })?;
        Ok(gain)
    }

    fn put_expo_gain(&self, handle: HardwareHandle, gain: u16) -> HwResult<()> {
        check("Toupcam_put_ExpoAGain", unsafe {
            (self.symbols.put_expo_again)(Self::raw(handle), gain)
        })
    }

    fn put_roi(&self, handle: HardwareHandle, roi: Roi) -> HwResult<()> {
        check("Toupcam_put_Roi", unsafe {
            (self.symbols.put_roi)(Self::raw(handle), roi.left, roi.top, roi.width, roi.height)
        })
    }

    fn put_speed(&self, handle: HardwareHandle, speed: u16) -> HwResult<()> {
        check("Toupcam_put_Speed", unsafe {
            (self.symbols.put_speed)(Self::raw(handle), speed)
        })
    }

    fn get_temperature(&self, handle: HardwareHandle) -> HwResult<i16> {
        let mut temperature = 0i16;
        check("Toupcam_get_Temperature", unsafe {
            (self.symbols.get_temperature)(Self::raw(handle), &mut temperature)
        })?;
        Ok(temperature)
    }

    fn put_temperature(&self, handle: HardwareHandle, tenths: i16) -> HwResult<()> {
        check("Toupcam_put_Temperature", unsafe {
            (self.symbols.put_temperature)(Self::raw(handle), tenths)
        })
    }

    fn get_info(&self, handle: HardwareHandle, key: InfoKey) -> HwResult<String> {
        match key {
            InfoKey::SerialNumber => {
                self.get_string(handle, "Toupcam_get_SerialNumber", self.symbols.get_serial_number)
            }
            InfoKey::HardwareVersion => {
                self.get_string(handle, "Toupcam_get_HwVersion", self.symbols.get_hw_version)
            }
            InfoKey::FirmwareVersion => {
                self.get_string(handle, "Toupcam_get_FwVersion", self.symbols.get_fw_version)
            }
        }
    }

    fn get_raw_format(&self, handle: HardwareHandle) -> HwResult<(u32, u32)> {
        let (mut fourcc, mut bits) = (0, 0);
        check("Toupcam_get_RawFormat", unsafe {
            (self.symbols.get_raw_format)(Self::raw(handle), &mut fourcc, &mut bits)
        })?;
        Ok((fourcc, bits))
    }

    fn put_adjustment(&self, handle: HardwareHandle, adjustment: ColorAdjustment, value: i32) -> HwResult<()> {
        let (call, f) = match adjustment {
            ColorAdjustment::Contrast => ("Toupcam_put_Contrast", self.symbols.put_contrast),
            ColorAdjustment::Hue => ("Toupcam_put_Hue", self.symbols.put_hue),
            ColorAdjustment::Saturation => ("Toupcam_put_Saturation", self.symbols.put_saturation),
            ColorAdjustment::Brightness => ("Toupcam_put_Brightness", self.symbols.put_brightness),
            ColorAdjustment::Gamma => ("Toupcam_put_Gamma", self.symbols.put_gamma),
        };
        check(call, unsafe { f(Self::raw(handle), value) })
    }

    fn put_white_balance_gain(&self, handle: HardwareHandle, gain: [i32; 3]) -> HwResult<()> {
        let mut gain = gain;
        check("Toupcam_put_WhiteBalanceGain", unsafe {
            (self.symbols.put_white_balance_gain)(Self::raw(handle), gain.as_mut_ptr())
        })
    }

    fn get_fan_max_speed(&self, handle: HardwareHandle) -> HwResult<i32> {
        let speed = unsafe { (self.symbols.get_fan_max_speed)(Self::raw(handle)) };
        check("Toupcam_get_FanMaxSpeed", speed)?;
        Ok(speed)
    }

    fn st4_guide(&self, handle: HardwareHandle, direction: GuideDirection, duration_ms: u32) -> HwResult<()> {
        check("Toupcam_ST4PlusGuide", unsafe {
            (self.symbols.st4_plus_guide)(Self::raw(handle), direction.code(), duration_ms)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_char_round_trip() {
        let chars = to_sdk_chars("tp-1-7");
        assert_eq!(chars.last().copied(), Some(0 as SdkChar));
        assert_eq!(from_sdk_chars(&chars), "tp-1-7");
    }

    #[test]
    fn test_from_sdk_ptr_handles_null() {
        assert_eq!(unsafe { from_sdk_ptr(std::ptr::null()) }, "");
    }

    #[test]
    fn test_missing_library() {
        assert!(matches!(
            ToupcamSdk::load_from("/nonexistent/libtoupcam.so"),
            Err(HwError::SdkNotLoaded(_))
        ));
    }
}
