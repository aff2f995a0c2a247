//! Opened device handles and frame download.

use std::ops::{Deref, DerefMut};
use std::thread;
use std::time::Duration;

use crate::config::CameraConfig;
use crate::domain::DomainMask;
use crate::traits::{
    Area, DebugLevel, FliApi, FliError, PixelSize, RawHandle, ReadoutDimensions, Result,
    ShutterControl, EBADF,
};

/// Pixel sample types a frame can be downloaded into.
///
/// The native row transfer always produces 16-bit samples. `u16` frames
/// receive them in place; narrower types go through the handle's scratch row.
pub trait Pixel: Copy + Default + sealed::Sealed {
    /// The row as native transfer memory, if the layouts match.
    fn as_native(row: &mut [Self]) -> Option<&mut [u16]>;

    /// Convert one native sample.
    fn from_native(sample: u16) -> Self;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
}

impl Pixel for u16 {
    fn as_native(row: &mut [Self]) -> Option<&mut [u16]> {
        Some(row)
    }

    fn from_native(sample: u16) -> Self {
        sample
    }
}

impl Pixel for u8 {
    fn as_native(_row: &mut [Self]) -> Option<&mut [u16]> {
        None
    }

    fn from_native(sample: u16) -> Self {
        Self::try_from(sample).unwrap_or(Self::MAX)
    }
}

/// Caller-owned 2-D pixel buffer, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer<P> {
    width: usize,
    height: usize,
    data: Vec<P>,
}

impl<P: Pixel> FrameBuffer<P> {
    /// Allocate a zeroed `width` x `height` frame.
    ///
    /// Fails if the sample count does not fit in memory addressing.
    pub fn new(width: usize, height: usize) -> Result<Self> {
        let len = width.checked_mul(height).ok_or_else(|| {
            FliError::InvalidArgument(format!("frame size {width}x{height} overflows"))
        })?;
        Ok(Self {
            width,
            height,
            data: vec![P::default(); len],
        })
    }

    /// Allocate a frame matching the readout geometry.
    pub fn for_readout(dims: &ReadoutDimensions) -> Result<Self> {
        let width = usize::try_from(dims.width)
            .map_err(|_| FliError::InvalidArgument(format!("readout width {}", dims.width)))?;
        let height = usize::try_from(dims.height)
            .map_err(|_| FliError::InvalidArgument(format!("readout height {}", dims.height)))?;
        Self::new(width, height)
    }

    /// Width in pixels.
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub const fn height(&self) -> usize {
        self.height
    }

    /// All samples, row-major.
    pub fn data(&self) -> &[P] {
        &self.data
    }

    /// One row, if `y` is in range.
    pub fn row(&self, y: usize) -> Option<&[P]> {
        self.data.chunks_exact(self.width.max(1)).nth(y)
    }

    /// Sample at (`x`, `y`), if in range.
    pub fn pixel_at(&self, x: usize, y: usize) -> Option<P> {
        self.row(y)?.get(x).copied()
    }

    fn rows_mut(&mut self) -> impl Iterator<Item = &mut [P]> {
        self.data.chunks_exact_mut(self.width.max(1))
    }
}

/// An opened device.
///
/// The native handle is owned exclusively and closed exactly once: by
/// [`Device::close`], or when the value is dropped. A dropped device never
/// reports a close failure; it only logs it.
pub struct Device<'lib, L: FliApi + ?Sized> {
    lib: &'lib L,
    handle: Option<RawHandle>,
    name: String,
    domain: DomainMask,
    scratch: Vec<u16>,
}

impl<'lib, L: FliApi + ?Sized> Device<'lib, L> {
    /// Open the device `name` within `domain`.
    ///
    /// # Errors
    ///
    /// [`FliError::Device`] if the native open fails; nothing is left open.
    pub fn open(lib: &'lib L, name: &str, domain: DomainMask) -> Result<Self> {
        let handle = lib.open(name, domain)?;
        tracing::debug!(name, %domain, handle, "device opened");
        Ok(Self {
            lib,
            handle: Some(handle),
            name: name.to_owned(),
            domain,
            scratch: Vec::new(),
        })
    }

    /// Device file name it was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Domain it was opened with.
    pub const fn domain(&self) -> DomainMask {
        self.domain
    }

    /// Whether the native handle is still open.
    pub const fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Close the device, reporting a native failure.
    ///
    /// The handle is invalid afterwards whatever the outcome; closing an
    /// already closed device does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        tracing::debug!(name = %self.name, handle, "closing device");
        self.lib.close(handle)
    }

    /// Close the device, logging instead of reporting a native failure.
    pub fn release(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(name = %self.name, error = %err, "ignoring close failure");
        }
    }

    fn raw(&self) -> Result<RawHandle> {
        self.handle
            .ok_or_else(|| FliError::from_status("device handle", -EBADF))
    }

    // -- Identification ------------------------------------------------------

    /// Model name.
    pub fn model(&self) -> Result<String> {
        self.lib.model(self.raw()?)
    }

    /// Serial number.
    pub fn serial(&self) -> Result<String> {
        self.lib.serial_string(self.raw()?)
    }

    /// Hardware revision.
    pub fn hw_revision(&self) -> Result<i64> {
        self.lib.hw_revision(self.raw()?)
    }

    /// Firmware revision.
    pub fn fw_revision(&self) -> Result<i64> {
        self.lib.fw_revision(self.raw()?)
    }

    /// Device status word.
    pub fn status(&self) -> Result<i64> {
        self.lib.device_status(self.raw()?)
    }

    /// Take the cross-process lock until the guard is dropped or unlocked.
    ///
    /// Use this to fence multi-step sequences such as set exposure, expose,
    /// download against other users of the same physical device.
    pub fn lock(&mut self) -> Result<DeviceLock<'_, 'lib, L>> {
        self.lib.lock_device(self.raw()?)?;
        Ok(DeviceLock {
            device: self,
            held: true,
        })
    }

    // -- Camera geometry -----------------------------------------------------

    /// Physical pixel size in meters.
    pub fn pixel_size(&self) -> Result<PixelSize> {
        self.lib.pixel_size(self.raw()?)
    }

    /// Full sensor array.
    pub fn array_area(&self) -> Result<Area> {
        self.lib.array_area(self.raw()?)
    }

    /// Light-sensitive part of the array.
    pub fn visible_area(&self) -> Result<Area> {
        self.lib.visible_area(self.raw()?)
    }

    /// Currently configured readout geometry.
    pub fn readout_dimensions(&self) -> Result<ReadoutDimensions> {
        self.lib.readout_dimensions(self.raw()?)
    }

    /// Apply every setting present in `config`, in a fixed order: image
    /// area, binning, bit depth, frame type, flushes, exposure, temperature.
    ///
    /// Stops at the first native failure.
    pub fn configure(&mut self, config: &CameraConfig) -> Result<()> {
        let handle = self.raw()?;
        if let Some(area) = config.image_area {
            self.lib.set_image_area(handle, area)?;
        }
        if let Some(hbin) = config.hbin {
            self.lib.set_hbin(handle, hbin)?;
        }
        if let Some(vbin) = config.vbin {
            self.lib.set_vbin(handle, vbin)?;
        }
        if let Some(depth) = config.bit_depth {
            self.lib.set_bit_depth(handle, depth)?;
        }
        if let Some(frame_type) = config.frame_type {
            self.lib.set_frame_type(handle, frame_type)?;
        }
        if let Some(flushes) = config.flushes {
            self.lib.set_flushes(handle, flushes)?;
        }
        if let Some(exposure) = config.exposure_ms {
            self.lib.set_exposure_time(handle, exposure)?;
        }
        if let Some(celsius) = config.temperature {
            self.lib.set_temperature(handle, celsius)?;
        }
        tracing::debug!(name = %self.name, ?config, "camera configured");
        Ok(())
    }

    /// Set the exposure time.
    pub fn set_exposure(&mut self, exposure: Duration) -> Result<()> {
        let millis = i64::try_from(exposure.as_millis())
            .map_err(|_| FliError::InvalidArgument(format!("exposure {exposure:?}")))?;
        self.lib.set_exposure_time(self.raw()?, millis)
    }

    /// Command the shutter.
    pub fn control_shutter(&mut self, shutter: ShutterControl) -> Result<()> {
        self.lib.control_shutter(self.raw()?, shutter)
    }

    // -- Exposure ------------------------------------------------------------

    /// Start an exposure with the current settings.
    pub fn expose(&mut self) -> Result<()> {
        self.lib.expose_frame(self.raw()?)
    }

    /// Abort the exposure in progress.
    pub fn cancel_exposure(&mut self) -> Result<()> {
        self.lib.cancel_exposure(self.raw()?)
    }

    /// Time left in the current exposure.
    pub fn exposure_remaining(&self) -> Result<Duration> {
        let millis = self.lib.exposure_status(self.raw()?)?;
        Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }

    /// Block until the exposure has finished, polling at most every `poll`.
    pub fn wait_for_exposure(&self, poll: Duration) -> Result<()> {
        loop {
            let remaining = self.exposure_remaining()?;
            if remaining.is_zero() {
                return Ok(());
            }
            thread::sleep(remaining.min(poll));
        }
    }

    /// Download the exposed image into `frame`, row by row.
    ///
    /// `frame` must match the readout geometry exactly. 16-bit frames are
    /// filled in place; 8-bit frames go through the scratch row and each
    /// sample saturates at 255. Whether the device is actually digitizing at
    /// the frame's depth is not checked.
    ///
    /// # Errors
    ///
    /// [`FliError::DimensionMismatch`] before any row is transferred, or the
    /// first failed row transfer. Rows already written stay as they are.
    pub fn download<P: Pixel>(&mut self, frame: &mut FrameBuffer<P>) -> Result<()> {
        let handle = self.raw()?;
        let dims = self.lib.readout_dimensions(handle)?;
        let matches = usize::try_from(dims.width).is_ok_and(|w| w == frame.width)
            && usize::try_from(dims.height).is_ok_and(|h| h == frame.height);
        if !matches {
            return Err(FliError::DimensionMismatch {
                expected_width: dims.width,
                expected_height: dims.height,
                actual_width: frame.width,
                actual_height: frame.height,
            });
        }

        let width = frame.width;
        for (y, row) in frame.rows_mut().enumerate() {
            tracing::trace!(row = y, "grabbing row");
            if let Some(native) = P::as_native(row) {
                self.lib.grab_row(handle, native)?;
                continue;
            }
            if self.scratch.len() < width {
                self.scratch.resize(width, 0);
            }
            let scratch = self.scratch.get_mut(..width).unwrap_or_default();
            self.lib.grab_row(handle, scratch)?;
            for (dst, &src) in row.iter_mut().zip(scratch.iter()) {
                *dst = P::from_native(src);
            }
        }
        Ok(())
    }

    /// Expose, wait for the exposure to end, and download into `frame`.
    pub fn acquire<P: Pixel>(&mut self, frame: &mut FrameBuffer<P>, poll: Duration) -> Result<()> {
        self.expose()?;
        self.wait_for_exposure(poll)?;
        self.download(frame)
    }

    // -- Temperature ---------------------------------------------------------

    /// Set the cooler set point.
    pub fn set_temperature(&mut self, celsius: f64) -> Result<()> {
        self.lib.set_temperature(self.raw()?, celsius)
    }

    /// Sensor temperature.
    pub fn temperature(&self) -> Result<f64> {
        self.lib.temperature(self.raw()?)
    }

    /// Cooler power in percent.
    pub fn cooler_power(&self) -> Result<f64> {
        self.lib.cooler_power(self.raw()?)
    }

    // -- Filter wheel --------------------------------------------------------

    /// Move to filter slot `position`.
    pub fn set_filter_pos(&mut self, position: i64) -> Result<()> {
        self.lib.set_filter_pos(self.raw()?, position)
    }

    /// Current filter slot.
    pub fn filter_pos(&self) -> Result<i64> {
        self.lib.filter_pos(self.raw()?)
    }

    /// Number of filter slots.
    pub fn filter_count(&self) -> Result<i64> {
        self.lib.filter_count(self.raw()?)
    }

    // -- Focuser -------------------------------------------------------------

    /// Start a relative move without waiting for it.
    pub fn step_motor_async(&mut self, steps: i64) -> Result<()> {
        self.lib.step_motor_async(self.raw()?, steps)
    }

    /// Focuser position.
    pub fn stepper_position(&self) -> Result<i64> {
        self.lib.stepper_position(self.raw()?)
    }

    /// Steps left in the current move.
    pub fn steps_remaining(&self) -> Result<i64> {
        self.lib.steps_remaining(self.raw()?)
    }

    /// Drive the focuser home.
    pub fn home_focuser(&mut self) -> Result<()> {
        self.lib.home_focuser(self.raw()?)
    }
}

impl<L: FliApi + ?Sized> Drop for Device<'_, L> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<L: FliApi + ?Sized> std::fmt::Debug for Device<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Held device lock; unlocks when dropped.
pub struct DeviceLock<'dev, 'lib, L: FliApi + ?Sized> {
    device: &'dev mut Device<'lib, L>,
    held: bool,
}

impl<L: FliApi + ?Sized> DeviceLock<'_, '_, L> {
    /// Release the lock, reporting a native failure.
    pub fn unlock(mut self) -> Result<()> {
        self.held = false;
        self.device.lib.unlock_device(self.device.raw()?)
    }
}

impl<'lib, L: FliApi + ?Sized> Deref for DeviceLock<'_, 'lib, L> {
    type Target = Device<'lib, L>;

    fn deref(&self) -> &Self::Target {
        self.device
    }
}

impl<L: FliApi + ?Sized> DerefMut for DeviceLock<'_, '_, L> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device
    }
}

impl<L: FliApi + ?Sized> Drop for DeviceLock<'_, '_, L> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let result = self
            .device
            .raw()
            .and_then(|handle| self.device.lib.unlock_device(handle));
        if let Err(err) = result {
            tracing::warn!(name = %self.device.name, error = %err, "ignoring unlock failure");
        }
    }
}

/// Configure the native library's diagnostic output.
///
/// `host` names the log destination; some platforms ignore it.
pub fn set_debug_level<L: FliApi + ?Sized>(
    lib: &L,
    host: Option<&std::path::Path>,
    level: DebugLevel,
) -> Result<()> {
    lib.set_debug_level(host, level)
}
