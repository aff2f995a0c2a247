//! fli-camera: typed bindings for the FLI camera, filter wheel and focuser SDK
//!
//! The vendor library does the device I/O. This crate adds a typed call
//! surface over it, status-to-error translation, the domain bitmask codec,
//! device enumeration with guaranteed list cleanup, and row-by-row frame
//! download. Everything talks to the library through the [`FliApi`] trait,
//! so it can be exercised against a mock.

pub mod config;
pub mod device;
pub mod domain;
pub mod enumerate;
pub mod native;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::{CameraConfig, LibrarySettings, Settings};
pub use device::{set_debug_level, Device, DeviceLock, FrameBuffer, Pixel};
pub use domain::{DeviceType, DomainMask, DomainSymbol, Interface};
pub use enumerate::{devices, for_each_device, list_devices, DeviceEntry};
pub use native::NativeLibrary;
pub use traits::{
    Area, BitDepth, DebugLevel, FliApi, FliError, FrameType, PixelSize, ReadoutDimensions,
    ShutterControl,
};
