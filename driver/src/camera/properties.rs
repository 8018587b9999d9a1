//! Property surface of a camera

use crate::mode::{max_bit_depth, BinMode, ModeDescriptor, BIN_FACTORS};
use toupcore_bus::names::*;
use toupcore_bus::{Permission, Property, SwitchRule};
use toupcore_hw::{flag, limits, ColorAdjustment, DeviceDescriptor, TRIGGER_CONTINUOUS};

pub const X_CCD_ADVANCED: &str = "X_CCD_ADVANCED";
pub const X_CCD_FAN: &str = "X_CCD_FAN";
pub const X_CCD_FAN_SPEED: &str = "FAN_SPEED";
pub const X_CCD_HEATER: &str = "X_CCD_HEATER";
pub const X_CCD_HEATER_POWER: &str = "POWER";
pub const X_CCD_CONVERSION_GAIN: &str = "X_CCD_CONVERSION_GAIN";
pub const X_CCD_CONVERSION_GAIN_LCG: &str = "LCG";
pub const X_CCD_CONVERSION_GAIN_HCG: &str = "HCG";
pub const X_CCD_CONVERSION_GAIN_HDR: &str = "HDR";
pub const X_CCD_BIN_MODE: &str = "X_CCD_BIN_MODE";
pub const X_CCD_R_GAIN: &str = "R_GAIN";
pub const X_CCD_G_GAIN: &str = "G_GAIN";
pub const X_CCD_B_GAIN: &str = "B_GAIN";

/// Item names of the color adjustments, in the order they are applied
pub const ADJUSTMENTS: [(&str, ColorAdjustment); 5] = [
    ("CONTRAST", ColorAdjustment::Contrast),
    ("HUE", ColorAdjustment::Hue),
    ("SATURATION", ColorAdjustment::Saturation),
    ("BRIGHTNESS", ColorAdjustment::Brightness),
    ("GAMMA", ColorAdjustment::Gamma),
];

/// Conversion gain item names by option value
pub const CONVERSION_GAINS: [&str; 3] = [X_CCD_CONVERSION_GAIN_LCG, X_CCD_CONVERSION_GAIN_HCG, X_CCD_CONVERSION_GAIN_HDR];

#[derive(Debug, Clone)]
pub struct CameraProperties {
    pub connection: Property,
    pub info: Property,
    pub ccd_info: Property,
    pub mode: Property,
    pub frame: Property,
    pub bin: Property,
    pub exposure: Property,
    pub streaming: Property,
    pub abort: Property,
    pub cooler: Property,
    pub cooler_power: Property,
    pub temperature: Property,
    pub gain: Property,
    pub advanced: Option<Property>,
    pub fan: Option<Property>,
    pub heater: Option<Property>,
    pub conversion_gain: Option<Property>,
    pub bin_mode: Property,
}

impl CameraProperties {
    pub fn new(device: &str, descriptor: &DeviceDescriptor, modes: &[ModeDescriptor]) -> Self {
        let model = &descriptor.model;
        let max = model.max_resolution();
        let (width, height) = (f64::from(max.width), f64::from(max.height));
        let depth = f64::from(max_bit_depth(model));
        let first_depth = modes.first().map_or(8.0, |m| f64::from(m.bit_depth));
        let (min_bin, max_bin) = (f64::from(*BIN_FACTORS.start()), f64::from(*BIN_FACTORS.end()));

        let connection = Property::switch(device, CONNECTION, MAIN_GROUP, "Connection status", Permission::ReadWrite, SwitchRule::OneOfMany)
            .with_switch(CONNECTED, "Connected", false)
            .with_switch(DISCONNECTED, "Disconnected", true);

        let info = Property::text(device, INFO, MAIN_GROUP, "Info", Permission::ReadOnly)
            .with_text(INFO_DEVICE_MODEL, "Model", &model.name)
            .with_text(INFO_DEVICE_SERIAL, "Serial number", "")
            .with_text(INFO_DEVICE_HW_REVISION, "Hardware revision", "")
            .with_text(INFO_DEVICE_FW_REVISION, "Firmware revision", "");

        let ccd_info = Property::number(device, CCD_INFO, CCD_MAIN_GROUP, "CCD info", Permission::ReadOnly)
            .with_number(CCD_INFO_WIDTH, "Horizontal resolution", 0.0, width, 1.0, width)
            .with_number(CCD_INFO_HEIGHT, "Vertical resolution", 0.0, height, 1.0, height)
            .with_number(CCD_INFO_PIXEL_WIDTH, "Pixel width", 0.0, 100.0, 0.01, f64::from(model.pixel_size_x))
            .with_number(CCD_INFO_PIXEL_HEIGHT, "Pixel height", 0.0, 100.0, 0.01, f64::from(model.pixel_size_y))
            .with_number(CCD_INFO_BITS_PER_PIXEL, "Bits/pixel", 8.0, depth, 1.0, depth);

        let mut mode = Property::switch(device, CCD_MODE, CCD_MAIN_GROUP, "Capture mode", Permission::ReadWrite, SwitchRule::OneOfMany);
        for (i, m) in modes.iter().enumerate() {
            mode = mode.with_switch(&m.name(), &m.label(max.width, max.height), i == 0);
        }

        let frame_perm = if model.has(flag::ROI_HARDWARE) {
            Permission::ReadWrite
        } else {
            Permission::ReadOnly
        };
        let frame = Property::number(device, CCD_FRAME, CCD_IMAGE_GROUP, "Frame", frame_perm)
            .with_number(CCD_FRAME_LEFT, "Left", 0.0, width, 1.0, 0.0)
            .with_number(CCD_FRAME_TOP, "Top", 0.0, height, 1.0, 0.0)
            .with_number(CCD_FRAME_WIDTH, "Width", 0.0, width, 1.0, width)
            .with_number(CCD_FRAME_HEIGHT, "Height", 0.0, height, 1.0, height)
            .with_number(CCD_FRAME_BITS_PER_PIXEL, "Bits per pixel", 8.0, depth, 1.0, first_depth);

        let bin = Property::number(device, CCD_BIN, CCD_IMAGE_GROUP, "Binning", Permission::ReadWrite)
            .with_number(CCD_BIN_HORIZONTAL, "Horizontal binning", min_bin, max_bin, 1.0, 1.0)
            .with_number(CCD_BIN_VERTICAL, "Vertical binning", min_bin, max_bin, 1.0, 1.0);

        let exposure = Property::number(device, CCD_EXPOSURE, CCD_MAIN_GROUP, "Start exposure", Permission::ReadWrite)
            .with_number(CCD_EXPOSURE_ITEM, "Start exposure", 0.0, 3600.0, 0.001, 0.0);

        let streaming = Property::number(device, CCD_STREAMING, CCD_MAIN_GROUP, "Start streaming", Permission::ReadWrite)
            .with_number(CCD_STREAMING_EXPOSURE, "Shutter time", 0.0, 3600.0, 0.001, 0.0)
            .with_number(CCD_STREAMING_COUNT, "Frame count", -1.0, f64::from(TRIGGER_CONTINUOUS - 1), 1.0, -1.0)
            .hidden(model.has(flag::TRIGGER_SINGLE));

        let abort = Property::switch(device, CCD_ABORT_EXPOSURE, CCD_MAIN_GROUP, "Abort exposure", Permission::ReadWrite, SwitchRule::AtMostOne)
            .with_switch(CCD_ABORT_EXPOSURE_ITEM, "Abort exposure", false);

        let has_temperature = model.has(flag::GETTEMPERATURE);
        let has_cooler = has_temperature && model.has(flag::TEC_ONOFF);
        let (target_min, target_max) = (
            f64::from(limits::TEC_TARGET.0) / 10.0,
            f64::from(limits::TEC_TARGET.1) / 10.0,
        );

        let cooler = Property::switch(device, CCD_COOLER, CCD_COOLER_GROUP, "Cooler status", Permission::ReadWrite, SwitchRule::OneOfMany)
            .with_switch(CCD_COOLER_ON, "On", false)
            .with_switch(CCD_COOLER_OFF, "Off", true)
            .hidden(!has_cooler);

        let cooler_power = Property::number(device, CCD_COOLER_POWER, CCD_COOLER_GROUP, "Cooler power", Permission::ReadOnly)
            .with_number(CCD_COOLER_POWER_ITEM, "Power (%)", 0.0, 100.0, 1.0, 0.0)
            .hidden(!has_cooler);

        let temperature_perm = if has_cooler {
            Permission::ReadWrite
        } else {
            Permission::ReadOnly
        };
        let temperature = Property::number(device, CCD_TEMPERATURE, CCD_COOLER_GROUP, "Sensor temperature", temperature_perm)
            .with_number(CCD_TEMPERATURE_ITEM, "Temperature (C)", target_min, target_max, 0.1, 0.0)
            .hidden(!has_temperature);

        let gain = Property::number(device, CCD_GAIN, CCD_MAIN_GROUP, "Gain", Permission::ReadWrite)
            .with_number(CCD_GAIN_ITEM, "Gain", 0.0, 500.0, 1.0, 100.0);

        let advanced = (!model.is_mono()).then(|| {
            let mut advanced = Property::number(device, X_CCD_ADVANCED, ADVANCED_GROUP, "Advanced Settings", Permission::ReadWrite);
            for (name, adjustment) in ADJUSTMENTS {
                let (min, max, default) = adjustment.limits();
                advanced = advanced.with_number(name, &title_case(name), f64::from(min), f64::from(max), 1.0, f64::from(default));
            }
            let (min, max, default) = limits::WBGAIN;
            let (min, max, default) = (f64::from(min), f64::from(max), f64::from(default));
            advanced
                .with_number(X_CCD_R_GAIN, "Red gain", min, max, 1.0, default)
                .with_number(X_CCD_G_GAIN, "Green gain", min, max, 1.0, default)
                .with_number(X_CCD_B_GAIN, "Blue gain", min, max, 1.0, default)
        });

        let fan = model.has(flag::FAN).then(|| {
            Property::number(device, X_CCD_FAN, ADVANCED_GROUP, "Fan control", Permission::ReadWrite)
                .with_number(X_CCD_FAN_SPEED, "Fan speed", 0.0, 0.0, 1.0, 0.0)
        });

        let heater = model.has(flag::HEAT).then(|| {
            Property::number(device, X_CCD_HEATER, ADVANCED_GROUP, "Window heater", Permission::ReadWrite)
                .with_number(X_CCD_HEATER_POWER, "Power", 0.0, 0.0, 1.0, 0.0)
        });

        let conversion_gain = (model.has(flag::CG) || model.has(flag::CGHDR)).then(|| {
            let property = Property::switch(device, X_CCD_CONVERSION_GAIN, ADVANCED_GROUP, "Conversion gain", Permission::ReadWrite, SwitchRule::OneOfMany)
                .with_switch(X_CCD_CONVERSION_GAIN_LCG, "Low conversion gain", true)
                .with_switch(X_CCD_CONVERSION_GAIN_HCG, "High conversion gain", false);
            if model.has(flag::CGHDR) {
                property.with_switch(X_CCD_CONVERSION_GAIN_HDR, "High dynamic range", false)
            } else {
                property
            }
        });

        let mut bin_mode = Property::switch(device, X_CCD_BIN_MODE, ADVANCED_GROUP, "Binning mode", Permission::ReadWrite, SwitchRule::OneOfMany);
        for mode in BinMode::ALL {
            bin_mode = bin_mode.with_switch(mode.item_name(), mode.label(), mode == BinMode::default());
        }

        Self {
            connection,
            info,
            ccd_info,
            mode,
            frame,
            bin,
            exposure,
            streaming,
            abort,
            cooler,
            cooler_power,
            temperature,
            gain,
            advanced,
            fan,
            heater,
            conversion_gain,
            bin_mode,
        }
    }

    /// Properties published only while connected, in definition order
    pub fn connected_set(&self) -> Vec<&Property> {
        let mut set = vec![
            &self.ccd_info,
            &self.mode,
            &self.frame,
            &self.bin,
            &self.exposure,
            &self.streaming,
            &self.abort,
            &self.cooler,
            &self.cooler_power,
            &self.temperature,
            &self.gain,
        ];
        set.extend(self.advanced.iter());
        set.extend(self.fan.iter());
        set.extend(self.heater.iter());
        set.extend(self.conversion_gain.iter());
        set.push(&self.bin_mode);
        set
    }

    pub fn is_cooler_off(&self) -> bool {
        !self.cooler.hidden && self.cooler.switch_value(CCD_COOLER_OFF) == Some(true)
    }
}

fn title_case(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
