//! Standard property and item names

/// Connection control switch
pub const CONNECTION: &str = "CONNECTION";
pub const CONNECTED: &str = "CONNECTED";
pub const DISCONNECTED: &str = "DISCONNECTED";

/// Device identification
pub const INFO: &str = "INFO";
pub const INFO_DEVICE_MODEL: &str = "DEVICE_MODEL";
pub const INFO_DEVICE_SERIAL: &str = "DEVICE_SERIAL_NUM";
pub const INFO_DEVICE_HW_REVISION: &str = "DEVICE_HW_REVISION";
pub const INFO_DEVICE_FW_REVISION: &str = "DEVICE_FW_REVISION";

// Camera properties
pub const CCD_INFO: &str = "CCD_INFO";
pub const CCD_INFO_WIDTH: &str = "WIDTH";
pub const CCD_INFO_HEIGHT: &str = "HEIGHT";
pub const CCD_INFO_PIXEL_WIDTH: &str = "PIXEL_WIDTH";
pub const CCD_INFO_PIXEL_HEIGHT: &str = "PIXEL_HEIGHT";
pub const CCD_INFO_BITS_PER_PIXEL: &str = "BITS_PER_PIXEL";

pub const CCD_MODE: &str = "CCD_MODE";

pub const CCD_FRAME: &str = "CCD_FRAME";
pub const CCD_FRAME_LEFT: &str = "LEFT";
pub const CCD_FRAME_TOP: &str = "TOP";
pub const CCD_FRAME_WIDTH: &str = "WIDTH";
pub const CCD_FRAME_HEIGHT: &str = "HEIGHT";
pub const CCD_FRAME_BITS_PER_PIXEL: &str = "BITS_PER_PIXEL";

pub const CCD_BIN: &str = "CCD_BIN";
pub const CCD_BIN_HORIZONTAL: &str = "HORIZONTAL";
pub const CCD_BIN_VERTICAL: &str = "VERTICAL";

pub const CCD_EXPOSURE: &str = "CCD_EXPOSURE";
pub const CCD_EXPOSURE_ITEM: &str = "EXPOSURE";

pub const CCD_STREAMING: &str = "CCD_STREAMING";
pub const CCD_STREAMING_EXPOSURE: &str = "EXPOSURE";
pub const CCD_STREAMING_COUNT: &str = "COUNT";

pub const CCD_ABORT_EXPOSURE: &str = "CCD_ABORT_EXPOSURE";
pub const CCD_ABORT_EXPOSURE_ITEM: &str = "ABORT_EXPOSURE";

pub const CCD_COOLER: &str = "CCD_COOLER";
pub const CCD_COOLER_ON: &str = "ON";
pub const CCD_COOLER_OFF: &str = "OFF";

pub const CCD_COOLER_POWER: &str = "CCD_COOLER_POWER";
pub const CCD_COOLER_POWER_ITEM: &str = "POWER";

pub const CCD_TEMPERATURE: &str = "CCD_TEMPERATURE";
pub const CCD_TEMPERATURE_ITEM: &str = "TEMPERATURE";

pub const CCD_GAIN: &str = "CCD_GAIN";
pub const CCD_GAIN_ITEM: &str = "GAIN";

// Guider properties
pub const GUIDER_GUIDE_DEC: &str = "GUIDER_GUIDE_DEC";
pub const GUIDER_GUIDE_NORTH: &str = "NORTH";
pub const GUIDER_GUIDE_SOUTH: &str = "SOUTH";
pub const GUIDER_GUIDE_RA: &str = "GUIDER_GUIDE_RA";
pub const GUIDER_GUIDE_EAST: &str = "EAST";
pub const GUIDER_GUIDE_WEST: &str = "WEST";

// Groups
pub const MAIN_GROUP: &str = "Main";
pub const CCD_MAIN_GROUP: &str = "Camera";
pub const CCD_IMAGE_GROUP: &str = "Image";
pub const CCD_COOLER_GROUP: &str = "Cooler";
pub const GUIDER_MAIN_GROUP: &str = "Guider";
pub const ADVANCED_GROUP: &str = "Advanced";
