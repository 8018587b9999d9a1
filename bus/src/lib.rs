//! Property bus model for device drivers
//!
//! Devices publish their state as named, typed, stateful property vectors.
//! Clients observe them and submit changes through the same model.
//!
//! ## Features
//!
//! - Text, number, switch, light and BLOB properties with `Idle`/`Ok`/`Busy`/`Alert` state
//! - Switch rules (one-of-many, at-most-one, any-of-many) enforced on copy
//! - `PropertyBus` trait implemented by hosts, plus an in-process `LocalBus`
//! - Per-master-device locks serializing connect/disconnect of sibling devices
//! - Timer service with one-shot, repeating and synchronous cancellation

mod bus;
mod error;
mod local;
mod property;
pub mod names;
pub mod timer;

pub use bus::{BusEvent, ImageFrame, PropertyBus};
pub use error::{BusError, BusResult};
pub use local::LocalBus;
pub use property::{Item, ItemValue, Permission, Property, PropertyKind, PropertyState, SwitchRule};
pub use timer::{defer, Timer};
