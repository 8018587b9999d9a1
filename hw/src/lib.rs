//! Touptek camera hardware interface
//!
//! The capability set the camera core consumes, expressed as the
//! `HardwareInterface` trait, plus two implementations:
//!
//! - `sdk::ToupcamSdk` (feature `sdk`): the vendor C SDK loaded at runtime
//! - `mock::MockHardware` (feature `mock`): a scriptable in-process camera
//!
//! Many white-label brands (Altair, OGMA, Mallincam, Risingcam, ...) ship the
//! same SDK under a different prefix; the option, flag and event codes are
//! shared.

mod error;
mod interface;
mod types;

#[cfg(feature = "mock")]
pub mod mock;
#[cfg(feature = "sdk")]
pub mod sdk;

pub use error::{HwError, HwResult};
pub use interface::{EventCallback, HardwareInterface};
pub use types::*;
