//! Core types, errors and the native-library seam.

use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::DomainMask;

/// Native device handle (`flidev_t`).
pub type RawHandle = i64;

/// Rectangle in sensor coordinates: upper-left inclusive, lower-right exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Area {
    /// Upper-left column.
    pub ul_x: i64,
    /// Upper-left row.
    pub ul_y: i64,
    /// Lower-right column.
    pub lr_x: i64,
    /// Lower-right row.
    pub lr_y: i64,
}

impl Area {
    /// Create a new area from its corners.
    #[must_use]
    pub const fn new(ul_x: i64, ul_y: i64, lr_x: i64, lr_y: i64) -> Self {
        Self {
            ul_x,
            ul_y,
            lr_x,
            lr_y,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> i64 {
        self.lr_x - self.ul_x
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> i64 {
        self.lr_y - self.ul_y
    }
}

/// Currently configured readout geometry, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadoutDimensions {
    /// Pixels per row after binning.
    pub width: i64,
    /// Horizontal offset.
    pub hoffset: i64,
    /// Horizontal binning factor.
    pub hbin: i64,
    /// Rows after binning.
    pub height: i64,
    /// Vertical offset.
    pub voffset: i64,
    /// Vertical binning factor.
    pub vbin: i64,
}

/// Physical pixel size in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelSize {
    /// Pixel width.
    pub width: f64,
    /// Pixel height.
    pub height: f64,
}

/// Exposure frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Shutter opens during exposure.
    #[default]
    Normal,
    /// Shutter stays closed.
    Dark,
    /// Pre-exposure flood.
    Flood,
    /// Residual bulk image flush.
    RbiFlush,
}

impl FrameType {
    /// Native value.
    #[must_use]
    pub const fn bits(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Dark => 1,
            Self::Flood => 2,
            Self::RbiFlush => 3,
        }
    }
}

/// Sensor digitization depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitDepth {
    /// 8 bits per pixel.
    #[serde(rename = "8")]
    Eight,
    /// 16 bits per pixel.
    #[default]
    #[serde(rename = "16")]
    Sixteen,
}

impl BitDepth {
    /// Native value.
    #[must_use]
    pub const fn bits(self) -> i64 {
        match self {
            Self::Eight => 0,
            Self::Sixteen => 1,
        }
    }
}

/// Shutter command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterControl {
    /// Close the shutter.
    Close,
    /// Open the shutter.
    Open,
    /// Open on an external trigger going low.
    ExternalTriggerLow,
    /// Open on an external trigger going high.
    ExternalTriggerHigh,
    /// Exposure length controlled by the external trigger.
    ExternalExposureControl,
}

impl ShutterControl {
    /// Native value.
    #[must_use]
    pub const fn bits(self) -> i64 {
        match self {
            Self::Close => 0x0000,
            Self::Open => 0x0001,
            Self::ExternalTriggerLow => 0x0002,
            Self::ExternalTriggerHigh => 0x0004,
            Self::ExternalExposureControl => 0x0008,
        }
    }
}

/// Verbosity of the native library's own diagnostic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    /// No output.
    #[default]
    None,
    /// Failures only.
    Fail,
    /// Warnings.
    Warn,
    /// Informational messages.
    Info,
    /// Raw I/O tracing.
    Io,
    /// Info, warnings and failures.
    All,
}

impl DebugLevel {
    /// Native value.
    #[must_use]
    pub const fn bits(self) -> i64 {
        match self {
            Self::None => 0x00,
            Self::Info => 0x01,
            Self::Warn => 0x02,
            Self::Fail => 0x04,
            Self::Io => 0x08,
            Self::All => 0x01 | 0x02 | 0x04,
        }
    }
}

impl FromStr for DebugLevel {
    type Err = FliError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "fail" => Ok(Self::Fail),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "io" => Ok(Self::Io),
            "all" => Ok(Self::All),
            _ => Err(FliError::InvalidArgument(format!("unknown debug level '{s}'"))),
        }
    }
}

/// Error type for device operations.
#[derive(Debug, thiserror::Error)]
pub enum FliError {
    /// A native call returned a negative status.
    #[error("{call} failed: {} (errno {code})", os_error(.code))]
    Device {
        /// Native entry point that failed.
        call: &'static str,
        /// Negated status, an OS error number.
        code: i32,
    },

    /// A domain symbol is unknown or conflicts with another one.
    #[error("unknown domain symbol '{symbol}': {reason}")]
    UnknownDomainSymbol {
        /// Offending symbol text.
        symbol: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A domain mask has a byte without a symbolic mapping.
    #[error("invalid {field} bits {value:#04x} in domain mask {mask:#06x}")]
    InvalidDomainBits {
        /// Whole mask.
        mask: u16,
        /// Which field was bad.
        field: &'static str,
        /// The unmapped byte.
        value: u8,
    },

    /// Destination buffer does not match the readout geometry.
    #[error(
        "frame is {actual_width}x{actual_height} \
         but device reads out {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        /// Device readout width.
        expected_width: i64,
        /// Device readout height.
        expected_height: i64,
        /// Buffer width.
        actual_width: usize,
        /// Buffer height.
        actual_height: usize,
    },

    /// The shared library could not be loaded.
    #[error("failed to load native library at '{path}': {cause}")]
    LoadFailed {
        /// Path or name that was tried.
        path: String,
        /// Loader message.
        cause: String,
    },

    /// An entry point is missing from the shared library.
    #[error("symbol '{symbol}' not found in native library: {cause}")]
    SymbolNotFound {
        /// Symbol name.
        symbol: String,
        /// Loader message.
        cause: String,
    },

    /// A caller-supplied value cannot be passed to the native layer.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FliError {
    /// Build the error for a failed native call from its (negative) status.
    #[must_use]
    pub fn from_status(call: &'static str, status: i64) -> Self {
        let code = status
            .checked_neg()
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(i32::MAX);
        Self::Device { call, code }
    }

    /// The raw OS error number, for native failures.
    #[must_use]
    pub const fn native_code(&self) -> Option<i32> {
        match self {
            Self::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn os_error(code: &i32) -> io::Error {
    io::Error::from_raw_os_error(*code)
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, FliError>;

/// Bad-handle code; list iteration reports `-EBADF` past the last entry.
pub const EBADF: i64 = 9;

/// Convert a native status into a result: negative is failure.
pub fn check(call: &'static str, status: i64) -> Result<i64> {
    if status < 0 {
        Err(FliError::from_status(call, status))
    } else {
        Ok(status)
    }
}

/// Text up to the first NUL of a C output buffer.
pub(crate) fn text_from_c(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    buf.get(..end)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default()
}

/// The narrow interface to the vendor library.
///
/// One method per native entry point. Implementations translate status codes
/// with [`check`]; nothing here holds state beyond what the library itself
/// keeps. [`crate::native::NativeLibrary`] is the real implementation.
pub trait FliApi {
    /// Open a device by file name within a domain.
    fn open(&self, name: &str, domain: DomainMask) -> Result<RawHandle>;
    /// Close a device.
    fn close(&self, handle: RawHandle) -> Result<()>;
    /// Configure the library's diagnostic output.
    fn set_debug_level(&self, host: Option<&Path>, level: DebugLevel) -> Result<()>;
    /// Library version string.
    fn lib_version(&self) -> Result<String>;

    /// Model name.
    fn model(&self, handle: RawHandle) -> Result<String>;
    /// Serial number string.
    fn serial_string(&self, handle: RawHandle) -> Result<String>;
    /// Hardware revision.
    fn hw_revision(&self, handle: RawHandle) -> Result<i64>;
    /// Firmware revision.
    fn fw_revision(&self, handle: RawHandle) -> Result<i64>;
    /// Device status word.
    fn device_status(&self, handle: RawHandle) -> Result<i64>;
    /// Acquire the cross-process device lock.
    fn lock_device(&self, handle: RawHandle) -> Result<()>;
    /// Release the cross-process device lock.
    fn unlock_device(&self, handle: RawHandle) -> Result<()>;

    /// Physical pixel size.
    fn pixel_size(&self, handle: RawHandle) -> Result<PixelSize>;
    /// Full sensor array.
    fn array_area(&self, handle: RawHandle) -> Result<Area>;
    /// Light-sensitive part of the array.
    fn visible_area(&self, handle: RawHandle) -> Result<Area>;
    /// Currently configured readout geometry.
    fn readout_dimensions(&self, handle: RawHandle) -> Result<ReadoutDimensions>;
    /// Set the image area to read out.
    fn set_image_area(&self, handle: RawHandle, area: Area) -> Result<()>;
    /// Set horizontal binning.
    fn set_hbin(&self, handle: RawHandle, bin: i64) -> Result<()>;
    /// Set vertical binning.
    fn set_vbin(&self, handle: RawHandle, bin: i64) -> Result<()>;
    /// Set exposure time in milliseconds.
    fn set_exposure_time(&self, handle: RawHandle, millis: i64) -> Result<()>;
    /// Set the frame type.
    fn set_frame_type(&self, handle: RawHandle, frame_type: FrameType) -> Result<()>;
    /// Set the digitization depth.
    fn set_bit_depth(&self, handle: RawHandle, depth: BitDepth) -> Result<()>;
    /// Set the number of flushes before each exposure.
    fn set_flushes(&self, handle: RawHandle, flushes: i64) -> Result<()>;
    /// Start an exposure.
    fn expose_frame(&self, handle: RawHandle) -> Result<()>;
    /// Abort the current exposure.
    fn cancel_exposure(&self, handle: RawHandle) -> Result<()>;
    /// Remaining exposure time in milliseconds.
    fn exposure_status(&self, handle: RawHandle) -> Result<i64>;
    /// Transfer one row; the row length is the transfer width in samples.
    fn grab_row(&self, handle: RawHandle, row: &mut [u16]) -> Result<()>;
    /// Command the shutter.
    fn control_shutter(&self, handle: RawHandle, shutter: ShutterControl) -> Result<()>;

    /// Set the cooler set point in degrees Celsius.
    fn set_temperature(&self, handle: RawHandle, celsius: f64) -> Result<()>;
    /// Sensor temperature in degrees Celsius.
    fn temperature(&self, handle: RawHandle) -> Result<f64>;
    /// Cooler power in percent.
    fn cooler_power(&self, handle: RawHandle) -> Result<f64>;

    /// Move the filter wheel.
    fn set_filter_pos(&self, handle: RawHandle, position: i64) -> Result<()>;
    /// Current filter position.
    fn filter_pos(&self, handle: RawHandle) -> Result<i64>;
    /// Number of filter slots.
    fn filter_count(&self, handle: RawHandle) -> Result<i64>;

    /// Start moving the focuser without waiting.
    fn step_motor_async(&self, handle: RawHandle, steps: i64) -> Result<()>;
    /// Focuser position.
    fn stepper_position(&self, handle: RawHandle) -> Result<i64>;
    /// Steps still to go in the current move.
    fn steps_remaining(&self, handle: RawHandle) -> Result<i64>;
    /// Drive the focuser to its home position.
    fn home_focuser(&self, handle: RawHandle) -> Result<()>;

    /// Build the library's internal device list for a domain.
    fn create_list(&self, domain: DomainMask) -> Result<()>;
    /// Free the internal device list.
    fn delete_list(&self) -> Result<()>;
    /// Rewind the list and fetch the first entry; `None` at end of list.
    fn list_first(&self, filename: &mut [u8], name: &mut [u8]) -> Result<Option<DomainMask>>;
    /// Fetch the next entry; `None` at end of list.
    fn list_next(&self, filename: &mut [u8], name: &mut [u8]) -> Result<Option<DomainMask>>;
}
