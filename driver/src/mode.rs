//! Readout modes and frame geometry
//!
//! A mode is published as a single switch item named
//! `<FAMILY><2-digit bit depth>_<bin factor>`, e.g. `RAW16_2` or `RGB08_1`.
//! Selecting one determines bit depth and binning at the same time.

use std::fmt;
use toupcore_hw::{bin_mode, flag, ModelInfo, Roi};

/// Smallest ROI width and height the sensor accepts
pub const MIN_ROI_SIZE: u32 = 16;

/// Bin factors offered for every model
pub const BIN_FACTORS: std::ops::RangeInclusive<u32> = 1..=8;

/// RAW depths in the order modes are listed, with the flag advertising each
const RAW_DEPTHS: [(u64, u32); 5] = [
    (flag::RAW8, 8),
    (flag::RAW10, 10),
    (flag::RAW12, 12),
    (flag::RAW14, 14),
    (flag::RAW16, 16),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFamily {
    /// Bayer mosaic straight off a color sensor
    Raw,
    /// Mono sensor
    Mon,
    /// Debayered 24-bit color
    Rgb,
}

impl PixelFamily {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Mon => "MON",
            Self::Rgb => "RGB",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "RAW" => Some(Self::Raw),
            "MON" => Some(Self::Mon),
            "RGB" => Some(Self::Rgb),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeDescriptor {
    pub family: PixelFamily,
    pub bit_depth: u32,
    pub bin_factor: u32,
}

impl ModeDescriptor {
    pub fn new(family: PixelFamily, bit_depth: u32, bin_factor: u32) -> Self {
        Self {
            family,
            bit_depth,
            bin_factor,
        }
    }

    /// Parses a mode item name: family from the first three characters, bit
    /// depth from the next two digits, bin factor after the underscore
    pub fn parse(name: &str) -> Option<Self> {
        let family = PixelFamily::from_prefix(name.get(0..3)?)?;
        let depth = name.get(3..5)?;
        if !depth.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let bit_depth = depth.parse().ok()?;
        let (_, bin) = name.split_once('_')?;
        let bin_factor = bin.parse().ok()?;
        Some(Self::new(family, bit_depth, bin_factor))
    }

    /// Item name, the inverse of `parse`
    pub fn name(&self) -> String {
        format!("{}{:02}_{}", self.family.prefix(), self.bit_depth, self.bin_factor)
    }

    /// Family and depth without the bin factor, e.g. `RAW12`
    pub fn prefix(&self) -> String {
        format!("{}{:02}", self.family.prefix(), self.bit_depth)
    }

    /// Human readable label showing the binned frame size
    pub fn label(&self, max_width: u32, max_height: u32) -> String {
        let width = round_bin(max_width, self.bin_factor);
        let height = round_bin(max_height, self.bin_factor);
        let depth = match self.family {
            PixelFamily::Rgb => 24,
            _ => self.bit_depth,
        };
        format!("{} {} {}x{}", self.family.prefix(), depth, width, height)
    }

    /// Bits per pixel requested from `pull_image` in this mode
    pub fn pull_bits(&self) -> u32 {
        match self.family {
            PixelFamily::Rgb => 24,
            _ => self.bit_depth,
        }
    }
}

impl fmt::Display for ModeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Sensor dimension `d` in output pixels at bin factor `b`, rounded down to
/// an even number
pub fn round_bin(d: u32, b: u32) -> u32 {
    2 * (d / b.max(1) / 2)
}

/// Maps a requested frame to the ROI programmed into the hardware.
///
/// Each coordinate goes through `round_bin`, width and height are raised to
/// `MIN_ROI_SIZE`, and a rectangle that does not fit the sensor falls back
/// to the full frame instead of being clamped.
pub fn fit_roi(requested: Roi, bin_factor: u32, max_width: u32, max_height: u32) -> Roi {
    let left = round_bin(requested.left, bin_factor);
    let top = round_bin(requested.top, bin_factor);
    let width = round_bin(requested.width, bin_factor).max(MIN_ROI_SIZE);
    let height = round_bin(requested.height, bin_factor).max(MIN_ROI_SIZE);
    if left + width > max_width || top + height > max_height {
        return Roi {
            left: 0,
            top: 0,
            width: max_width,
            height: max_height,
        };
    }
    Roi {
        left,
        top,
        width,
        height,
    }
}

/// Every mode a model supports, bin factor major
pub fn enumerate_modes(model: &ModelInfo) -> Vec<ModeDescriptor> {
    let family = if model.is_mono() {
        PixelFamily::Mon
    } else {
        PixelFamily::Raw
    };
    let mut modes = Vec::new();
    for bin in BIN_FACTORS {
        for (bit, depth) in RAW_DEPTHS {
            if model.has(bit) {
                modes.push(ModeDescriptor::new(family, depth, bin));
            }
        }
        if !model.is_mono() {
            modes.push(ModeDescriptor::new(PixelFamily::Rgb, 8, bin));
        }
    }
    modes
}

/// Highest RAW depth the model advertises, at least 8
pub fn max_bit_depth(model: &ModelInfo) -> u32 {
    RAW_DEPTHS
        .iter()
        .filter(|(bit, _)| model.has(*bit))
        .map(|(_, depth)| *depth)
        .max()
        .unwrap_or(8)
        .max(8)
}

/// Index of the mode with the family and depth of `current` at `bin_factor`
pub fn select_for_binning(modes: &[ModeDescriptor], current: &ModeDescriptor, bin_factor: u32) -> Option<usize> {
    modes
        .iter()
        .position(|m| m.family == current.family && m.bit_depth == current.bit_depth && m.bin_factor == bin_factor)
}

/// Index of the mode with the family and binning of `current` at `bit_depth`
pub fn select_for_bit_depth(modes: &[ModeDescriptor], current: &ModeDescriptor, bit_depth: u32) -> Option<usize> {
    modes
        .iter()
        .position(|m| m.family == current.family && m.bin_factor == current.bin_factor && m.bit_depth == bit_depth)
}

/// Finds the mode the camera is already in from its RAW, BITDEPTH and
/// BINNING options
pub fn detect_mode(modes: &[ModeDescriptor], model: &ModelInfo, raw: bool, high_depth: bool, binning: i32) -> Option<usize> {
    let bin_factor = ((binning & 0x0f) as u32).max(1);
    let depth = if high_depth { max_bit_depth(model) } else { 8 };
    let wanted = if model.is_mono() {
        ModeDescriptor::new(PixelFamily::Mon, depth, bin_factor)
    } else if raw {
        ModeDescriptor::new(PixelFamily::Raw, depth, bin_factor)
    } else {
        ModeDescriptor::new(PixelFamily::Rgb, 8, bin_factor)
    };
    modes.iter().position(|m| *m == wanted)
}

/// How binned pixels are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinMode {
    #[default]
    Saturate,
    /// Sum and expand to 16 bits
    Expand,
    Average,
}

impl BinMode {
    pub const ALL: [BinMode; 3] = [Self::Saturate, Self::Expand, Self::Average];

    /// Bits OR-ed into the BINNING option
    pub fn bits(self) -> i32 {
        match self {
            Self::Saturate => bin_mode::SATURATE,
            Self::Expand => bin_mode::EXPAND,
            Self::Average => bin_mode::AVERAGE,
        }
    }

    pub fn item_name(self) -> &'static str {
        match self {
            Self::Saturate => "SATURATE",
            Self::Expand => "EXPAND",
            Self::Average => "AVERAGE",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Saturate => "Sum and saturate",
            Self::Expand => "Sum and expand to 16-bits (10, 12 and 14-bit data)",
            Self::Average => "Average",
        }
    }

    pub fn from_item_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.item_name() == name)
    }
}
