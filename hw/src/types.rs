// ============================================================================
// SDK Constants
// ============================================================================

use serde::{Deserialize, Serialize};

/// Maximum number of cameras the SDK enumerates
pub const MAX_DEVICES: usize = 128;

/// `trigger()` count requesting continuous triggering
pub const TRIGGER_CONTINUOUS: u16 = 0xffff;

/// Camera model capability flags (64 bit)
pub mod flag {
    pub const ROI_HARDWARE: u64 = 0x0000_0008;
    pub const MONO: u64 = 0x0000_0010;
    pub const TEC: u64 = 0x0000_0080;
    pub const ST4: u64 = 0x0000_0200;
    pub const GETTEMPERATURE: u64 = 0x0000_0400;
    pub const RAW10: u64 = 0x0000_1000;
    pub const RAW12: u64 = 0x0000_2000;
    pub const RAW14: u64 = 0x0000_4000;
    pub const RAW16: u64 = 0x0000_8000;
    pub const FAN: u64 = 0x0001_0000;
    pub const TEC_ONOFF: u64 = 0x0002_0000;
    pub const TRIGGER_SINGLE: u64 = 0x0020_0000;
    pub const CG: u64 = 0x0400_0000;
    pub const RAW8: u64 = 0x8000_0000;
    pub const CGHDR: u64 = 0x0008_0000_0000;
    pub const HEAT: u64 = 0x0080_0000_0000;
}

/// `get_option` / `put_option` keys
pub mod option {
    pub const NOFRAME_TIMEOUT: u32 = 0x01;
    /// 0 = RGB, 1 = raw
    pub const RAW: u32 = 0x04;
    /// 0 = 8 bit, 1 = the sensor's highest depth
    pub const BITDEPTH: u32 = 0x06;
    pub const FAN: u32 = 0x07;
    /// Cooler on/off
    pub const TEC: u32 = 0x08;
    /// 0 = video, 1 = software trigger, 2 = external trigger
    pub const TRIGGER: u32 = 0x0b;
    /// Cooler target in 0.1 degC
    pub const TECTARGET: u32 = 0x0f;
    /// Bin factor OR-ed with one of the `bin_mode` bits
    pub const BINNING: u32 = 0x17;
    /// Conversion gain: 0 = LCG, 1 = HCG, 2 = HDR
    pub const CG: u32 = 0x19;
    pub const TEC_VOLTAGE: u32 = 0x20;
    pub const TEC_VOLTAGE_MAX: u32 = 0x21;
    /// Deliver events on a dedicated SDK thread
    pub const CALLBACK_THREAD: u32 = 0x30;
    pub const HEAT_MAX: u32 = 0x36;
    pub const HEAT: u32 = 0x37;
    /// 1 = hard flush, 2 = soft flush, 3 = both
    pub const FLUSH: u32 = 0x3d;
}

/// Pixel combination used by `option::BINNING`
pub mod bin_mode {
    pub const SATURATE: i32 = 0x00;
    pub const EXPAND: i32 = 0x40;
    pub const AVERAGE: i32 = 0x80;
}

/// Image adjustment limits
pub mod limits {
    pub const HUE: (i32, i32, i32) = (-180, 180, 0);
    pub const SATURATION: (i32, i32, i32) = (0, 255, 128);
    pub const BRIGHTNESS: (i32, i32, i32) = (-64, 64, 0);
    pub const CONTRAST: (i32, i32, i32) = (-100, 100, 0);
    pub const GAMMA: (i32, i32, i32) = (20, 180, 100);
    pub const WBGAIN: (i32, i32, i32) = (-127, 127, 0);
    /// Cooler target range in 0.1 degC
    pub const TEC_TARGET: (i32, i32) = (-500, 400);
}

// ============================================================================
// Types
// ============================================================================

/// Opaque handle to an open camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareHandle(usize);

impl HardwareHandle {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Camera event delivered on the SDK's callback thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    Image,
    StillImage,
    TriggerFail,
    Error,
    Disconnected,
    NoFrameTimeout,
    NoPacketTimeout,
    Other(u32),
}

impl HardwareEvent {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x0004 => Self::Image,
            0x0005 => Self::StillImage,
            0x0007 => Self::TriggerFail,
            0x0080 => Self::Error,
            0x0081 => Self::Disconnected,
            0x0082 => Self::NoFrameTimeout,
            0x0085 => Self::NoPacketTimeout,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Image => 0x0004,
            Self::StillImage => 0x0005,
            Self::TriggerFail => 0x0007,
            Self::Error => 0x0080,
            Self::Disconnected => 0x0081,
            Self::NoFrameTimeout => 0x0082,
            Self::NoPacketTimeout => 0x0085,
            Self::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Static description of a camera model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub flags: u64,
    pub max_speed: u32,
    /// Number of valid entries at the start of `resolutions`
    pub preview: u32,
    pub still: u32,
    pub max_fan_speed: u32,
    pub pixel_size_x: f32,
    pub pixel_size_y: f32,
    pub resolutions: Vec<Resolution>,
}

impl ModelInfo {
    pub fn has(&self, flag: u64) -> bool {
        self.flags & flag != 0
    }

    pub fn is_mono(&self) -> bool {
        self.has(flag::MONO)
    }

    /// Largest width and height over the preview resolutions
    pub fn max_resolution(&self) -> Resolution {
        self.resolutions
            .iter()
            .take(self.preview as usize)
            .fold(Resolution::default(), |acc, r| Resolution {
                width: acc.width.max(r.width),
                height: acc.height.max(r.height),
            })
    }
}

/// One entry of an enumeration pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Opaque id accepted by `open()`
    pub id: String,
    pub display_name: String,
    pub model: ModelInfo,
}

/// Metadata of a pulled frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub flag: u32,
    pub sequence: u32,
    /// Microseconds
    pub timestamp: u64,
}

/// Hardware readout rectangle in sensor pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roi {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Ranged parameters queried with `get_range()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKey {
    /// Microseconds
    ExposureTime,
    /// Percent, 100 = unity
    Gain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterRange {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

/// Identification strings of an open camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKey {
    SerialNumber,
    HardwareVersion,
    FirmwareVersion,
}

/// Color image adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorAdjustment {
    Contrast,
    Hue,
    Saturation,
    Brightness,
    Gamma,
}

impl ColorAdjustment {
    /// (min, max, default)
    pub fn limits(self) -> (i32, i32, i32) {
        match self {
            Self::Contrast => limits::CONTRAST,
            Self::Hue => limits::HUE,
            Self::Saturation => limits::SATURATION,
            Self::Brightness => limits::BRIGHTNESS,
            Self::Gamma => limits::GAMMA,
        }
    }
}

/// ST4 pulse direction, numbered as the SDK expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideDirection {
    North = 0,
    South = 1,
    East = 2,
    West = 3,
}

impl GuideDirection {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Color filter array layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BayerPattern {
    Gbrg,
    Rggb,
    Bggr,
    Grbg,
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

impl BayerPattern {
    /// Decodes the raw format fourcc; `None` for mono and non-Bayer formats
    pub fn from_fourcc(code: u32) -> Option<Self> {
        match code {
            c if c == fourcc(b"GBRG") => Some(Self::Gbrg),
            c if c == fourcc(b"RGGB") => Some(Self::Rggb),
            c if c == fourcc(b"BGGR") => Some(Self::Bggr),
            c if c == fourcc(b"GRBG") => Some(Self::Grbg),
            _ => None,
        }
    }

    pub fn to_fourcc(self) -> u32 {
        match self {
            Self::Gbrg => fourcc(b"GBRG"),
            Self::Rggb => fourcc(b"RGGB"),
            Self::Bggr => fourcc(b"BGGR"),
            Self::Grbg => fourcc(b"GRBG"),
        }
    }

    /// FITS `BAYERPAT` value
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Gbrg => "GBRG",
            Self::Rggb => "RGGB",
            Self::Bggr => "BGGR",
            Self::Grbg => "GRBG",
        }
    }
}

/// Bytes per pixel of a pulled frame for the requested `bits`
pub fn bytes_per_pixel(bits: u32) -> usize {
    match bits {
        0..=8 => 1,
        9..=16 => 2,
        24 => 3,
        48 => 6,
        other => ((other + 7) / 8) as usize,
    }
}
