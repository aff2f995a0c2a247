//! Mock native layer for testing without hardware.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::domain::{DeviceType, DomainMask, Interface};
use crate::traits::{
    Area, BitDepth, DebugLevel, FliApi, FliError, FrameType, PixelSize, RawHandle,
    ReadoutDimensions, Result, ShutterControl, EBADF,
};

const EIO: i64 = 5;

/// One device reported by the mock device list.
#[derive(Debug, Clone)]
pub struct MockEntry {
    /// Domain reported for the device.
    pub domain: DomainMask,
    /// Device file name.
    pub filename: String,
    /// Human-readable device name.
    pub name: String,
}

/// Address and length of the buffer handed to one row transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowTransfer {
    /// Start address of the row buffer.
    pub addr: usize,
    /// Samples requested.
    pub len: usize,
}

#[derive(Debug, Default)]
struct MockState {
    entries: Vec<MockEntry>,
    cursor: Option<usize>,
    list_open: bool,
    open: HashMap<RawHandle, String>,
    next_handle: RawHandle,
    readout: ReadoutDimensions,
    rows_grabbed: usize,
    exposure_left: i64,
    exposure_step: i64,
    failing: HashMap<&'static str, i64>,
    fail_row: Option<usize>,
    fail_open_for: HashSet<String>,
    calls: Vec<&'static str>,
    transfers: Vec<RowTransfer>,
    settings: Vec<(&'static str, i64)>,
    temperature: f64,
    filter_pos: i64,
    stepper: i64,
}

/// Scripted stand-in for the vendor library.
///
/// Records every call by its native name, hands out sequential handles, and
/// fills rows with `row * 7 + column` so narrowing can be observed.
#[derive(Debug)]
pub struct MockLibrary {
    state: RefCell<MockState>,
}

impl Default for MockLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLibrary {
    /// Create a mock with no devices and a 64x48 readout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RefCell::new(MockState {
                next_handle: 1,
                readout: ReadoutDimensions {
                    width: 64,
                    hoffset: 0,
                    hbin: 1,
                    height: 48,
                    voffset: 0,
                    vbin: 1,
                },
                exposure_step: 40,
                temperature: 20.0,
                ..MockState::default()
            }),
        }
    }

    /// Add a device to the list.
    #[must_use]
    pub fn with_device(self, domain: DomainMask, filename: &str, name: &str) -> Self {
        self.state.borrow_mut().entries.push(MockEntry {
            domain,
            filename: filename.to_owned(),
            name: name.to_owned(),
        });
        self
    }

    /// Add `count` USB cameras named `cam0`, `cam1`, ...
    #[must_use]
    pub fn with_cameras(mut self, count: usize) -> Self {
        for index in 0..count {
            self = self.with_device(
                DomainMask::new(Interface::Usb, DeviceType::Camera),
                &format!("/dev/fliusb{index}"),
                &format!("cam{index}"),
            );
        }
        self
    }

    /// Set the readout geometry reported to callers.
    #[must_use]
    pub fn with_readout(self, width: i64, height: i64) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.readout.width = width;
            state.readout.height = height;
        }
        self
    }

    /// Make every call to `call` fail with OS error `code`.
    #[must_use]
    pub fn failing(self, call: &'static str, code: i64) -> Self {
        self.state.borrow_mut().failing.insert(call, code);
        self
    }

    /// Make the row transfer with this zero-based index fail.
    #[must_use]
    pub fn failing_row(self, row: usize) -> Self {
        self.state.borrow_mut().fail_row = Some(row);
        self
    }

    /// Make opening this file name fail.
    #[must_use]
    pub fn failing_open(self, filename: &str) -> Self {
        self.state.borrow_mut().fail_open_for.insert(filename.to_owned());
        self
    }

    /// Native calls made so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.borrow().calls.clone()
    }

    /// Number of times `call` was made.
    pub fn count(&self, call: &str) -> usize {
        self.state.borrow().calls.iter().filter(|c| **c == call).count()
    }

    /// Buffers handed to row transfers, in order.
    pub fn transfers(&self) -> Vec<RowTransfer> {
        self.state.borrow().transfers.clone()
    }

    /// Values set through setter calls, in order.
    pub fn settings(&self) -> Vec<(&'static str, i64)> {
        self.state.borrow().settings.clone()
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.borrow().open.len()
    }

    /// Whether a device list currently exists.
    pub fn list_open(&self) -> bool {
        self.state.borrow().list_open
    }

    fn enter(&self, call: &'static str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        match state.failing.get(call) {
            Some(code) => Err(FliError::from_status(call, -code)),
            None => Ok(()),
        }
    }

    fn enter_dev(&self, call: &'static str, handle: RawHandle) -> Result<()> {
        self.enter(call)?;
        if self.state.borrow().open.contains_key(&handle) {
            Ok(())
        } else {
            Err(FliError::from_status(call, -EBADF))
        }
    }

    fn record(&self, call: &'static str, handle: RawHandle, value: i64) -> Result<()> {
        self.enter_dev(call, handle)?;
        self.state.borrow_mut().settings.push((call, value));
        Ok(())
    }

    fn entry(
        &self,
        call: &'static str,
        index: usize,
        filename: &mut [u8],
        name: &mut [u8],
    ) -> Option<DomainMask> {
        let mut state = self.state.borrow_mut();
        state.cursor = Some(index);
        let entry = state.entries.get(index)?.clone();
        copy_text(&entry.filename, filename);
        copy_text(&entry.name, name);
        tracing::trace!(call, index, "mock list entry");
        Some(entry.domain)
    }
}

fn copy_text(text: &str, buf: &mut [u8]) {
    buf.fill(0);
    let len = text.len().min(buf.len().saturating_sub(1));
    for (dst, src) in buf.iter_mut().zip(text.bytes().take(len)) {
        *dst = src;
    }
}

impl FliApi for MockLibrary {
    fn open(&self, name: &str, _domain: DomainMask) -> Result<RawHandle> {
        self.enter("FLIOpen")?;
        let mut state = self.state.borrow_mut();
        if state.fail_open_for.contains(name) {
            return Err(FliError::from_status("FLIOpen", -EIO));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.open.insert(handle, name.to_owned());
        Ok(handle)
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        self.enter("FLIClose")?;
        match self.state.borrow_mut().open.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(FliError::from_status("FLIClose", -EBADF)),
        }
    }

    fn set_debug_level(&self, _host: Option<&Path>, level: DebugLevel) -> Result<()> {
        self.enter("FLISetDebugLevel")?;
        self.state.borrow_mut().settings.push(("FLISetDebugLevel", level.bits()));
        Ok(())
    }

    fn lib_version(&self) -> Result<String> {
        self.enter("FLIGetLibVersion")?;
        Ok("Software Development Library for Linux 1.999.1".to_owned())
    }

    fn model(&self, handle: RawHandle) -> Result<String> {
        self.enter_dev("FLIGetModel", handle)?;
        Ok("MicroLine ML8300".to_owned())
    }

    fn serial_string(&self, handle: RawHandle) -> Result<String> {
        self.enter_dev("FLIGetSerialString", handle)?;
        Ok(format!("ML{handle:04}"))
    }

    fn hw_revision(&self, handle: RawHandle) -> Result<i64> {
        self.enter_dev("FLIGetHWRevision", handle)?;
        Ok(256)
    }

    fn fw_revision(&self, handle: RawHandle) -> Result<i64> {
        self.enter_dev("FLIGetFWRevision", handle)?;
        Ok(512)
    }

    fn device_status(&self, handle: RawHandle) -> Result<i64> {
        self.enter_dev("FLIGetDeviceStatus", handle)?;
        Ok(0)
    }

    fn lock_device(&self, handle: RawHandle) -> Result<()> {
        self.enter_dev("FLILockDevice", handle)
    }

    fn unlock_device(&self, handle: RawHandle) -> Result<()> {
        self.enter_dev("FLIUnlockDevice", handle)
    }

    fn pixel_size(&self, handle: RawHandle) -> Result<PixelSize> {
        self.enter_dev("FLIGetPixelSize", handle)?;
        Ok(PixelSize {
            width: 5.4e-6,
            height: 5.4e-6,
        })
    }

    fn array_area(&self, handle: RawHandle) -> Result<Area> {
        self.enter_dev("FLIGetArrayArea", handle)?;
        Ok(Area::new(0, 0, 3468, 2512))
    }

    fn visible_area(&self, handle: RawHandle) -> Result<Area> {
        self.enter_dev("FLIGetVisibleArea", handle)?;
        Ok(Area::new(32, 4, 3358, 2504))
    }

    fn readout_dimensions(&self, handle: RawHandle) -> Result<ReadoutDimensions> {
        self.enter_dev("FLIGetReadoutDimensions", handle)?;
        let mut state = self.state.borrow_mut();
        state.rows_grabbed = 0;
        Ok(state.readout)
    }

    fn set_image_area(&self, handle: RawHandle, area: Area) -> Result<()> {
        self.record("FLISetImageArea", handle, area.width() * area.height())
    }

    fn set_hbin(&self, handle: RawHandle, bin: i64) -> Result<()> {
        self.record("FLISetHBin", handle, bin)
    }

    fn set_vbin(&self, handle: RawHandle, bin: i64) -> Result<()> {
        self.record("FLISetVBin", handle, bin)
    }

    fn set_exposure_time(&self, handle: RawHandle, millis: i64) -> Result<()> {
        self.record("FLISetExposureTime", handle, millis)
    }

    fn set_frame_type(&self, handle: RawHandle, frame_type: FrameType) -> Result<()> {
        self.record("FLISetFrameType", handle, frame_type.bits())
    }

    fn set_bit_depth(&self, handle: RawHandle, depth: BitDepth) -> Result<()> {
        self.record("FLISetBitDepth", handle, depth.bits())
    }

    fn set_flushes(&self, handle: RawHandle, flushes: i64) -> Result<()> {
        self.record("FLISetNFlushes", handle, flushes)
    }

    fn expose_frame(&self, handle: RawHandle) -> Result<()> {
        self.enter_dev("FLIExposeFrame", handle)?;
        let mut state = self.state.borrow_mut();
        let exposure = state
            .settings
            .iter()
            .rev()
            .find(|(call, _)| *call == "FLISetExposureTime")
            .map_or(0, |(_, millis)| *millis);
        state.exposure_left = exposure;
        Ok(())
    }

    fn cancel_exposure(&self, handle: RawHandle) -> Result<()> {
        self.enter_dev("FLICancelExposure", handle)?;
        self.state.borrow_mut().exposure_left = 0;
        Ok(())
    }

    fn exposure_status(&self, handle: RawHandle) -> Result<i64> {
        self.enter_dev("FLIGetExposureStatus", handle)?;
        let mut state = self.state.borrow_mut();
        let left = state.exposure_left;
        state.exposure_left = (left - state.exposure_step).max(0);
        Ok(left)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn grab_row(&self, handle: RawHandle, row: &mut [u16]) -> Result<()> {
        self.enter_dev("FLIGrabRow", handle)?;
        let mut state = self.state.borrow_mut();
        let index = state.rows_grabbed;
        state.rows_grabbed += 1;
        state.transfers.push(RowTransfer {
            addr: row.as_ptr() as usize,
            len: row.len(),
        });
        if state.fail_row == Some(index) {
            return Err(FliError::from_status("FLIGrabRow", -EIO));
        }
        for (column, sample) in row.iter_mut().enumerate() {
            *sample = (index * 7 + column) as u16;
        }
        Ok(())
    }

    fn control_shutter(&self, handle: RawHandle, shutter: ShutterControl) -> Result<()> {
        self.record("FLIControlShutter", handle, shutter.bits())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_temperature(&self, handle: RawHandle, celsius: f64) -> Result<()> {
        self.record("FLISetTemperature", handle, celsius.round() as i64)?;
        self.state.borrow_mut().temperature = celsius;
        Ok(())
    }

    fn temperature(&self, handle: RawHandle) -> Result<f64> {
        self.enter_dev("FLIGetTemperature", handle)?;
        Ok(self.state.borrow().temperature)
    }

    fn cooler_power(&self, handle: RawHandle) -> Result<f64> {
        self.enter_dev("FLIGetCoolerPower", handle)?;
        Ok(42.5)
    }

    fn set_filter_pos(&self, handle: RawHandle, position: i64) -> Result<()> {
        self.record("FLISetFilterPos", handle, position)?;
        self.state.borrow_mut().filter_pos = position;
        Ok(())
    }

    fn filter_pos(&self, handle: RawHandle) -> Result<i64> {
        self.enter_dev("FLIGetFilterPos", handle)?;
        Ok(self.state.borrow().filter_pos)
    }

    fn filter_count(&self, handle: RawHandle) -> Result<i64> {
        self.enter_dev("FLIGetFilterCount", handle)?;
        Ok(5)
    }

    fn step_motor_async(&self, handle: RawHandle, steps: i64) -> Result<()> {
        self.record("FLIStepMotorAsync", handle, steps)?;
        self.state.borrow_mut().stepper += steps;
        Ok(())
    }

    fn stepper_position(&self, handle: RawHandle) -> Result<i64> {
        self.enter_dev("FLIGetStepperPosition", handle)?;
        Ok(self.state.borrow().stepper)
    }

    fn steps_remaining(&self, handle: RawHandle) -> Result<i64> {
        self.enter_dev("FLIGetStepsRemaining", handle)?;
        Ok(0)
    }

    fn home_focuser(&self, handle: RawHandle) -> Result<()> {
        self.enter_dev("FLIHomeFocuser", handle)?;
        self.state.borrow_mut().stepper = 0;
        Ok(())
    }

    fn create_list(&self, domain: DomainMask) -> Result<()> {
        self.enter("FLICreateList")?;
        let mut state = self.state.borrow_mut();
        state.list_open = true;
        state.cursor = None;
        state.settings.push(("FLICreateList", i64::from(domain.bits())));
        Ok(())
    }

    fn delete_list(&self) -> Result<()> {
        self.enter("FLIDeleteList")?;
        let mut state = self.state.borrow_mut();
        state.list_open = false;
        state.cursor = None;
        Ok(())
    }

    fn list_first(&self, filename: &mut [u8], name: &mut [u8]) -> Result<Option<DomainMask>> {
        self.enter("FLIListFirst")?;
        Ok(self.entry("FLIListFirst", 0, filename, name))
    }

    fn list_next(&self, filename: &mut [u8], name: &mut [u8]) -> Result<Option<DomainMask>> {
        self.enter("FLIListNext")?;
        let next = self.state.borrow().cursor.map_or(0, |cursor| cursor + 1);
        Ok(self.entry("FLIListNext", next, filename, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_open_close() {
        let lib = MockLibrary::new();
        let handle = lib.open("/dev/fliusb0", DomainMask::NONE).expect("open should succeed");
        assert_eq!(lib.open_handles(), 1);
        lib.close(handle).expect("close should succeed");
        assert_eq!(lib.open_handles(), 0);
        assert!(lib.close(handle).is_err());
    }

    #[test]
    fn test_mock_list_walk() {
        let lib = MockLibrary::new().with_cameras(2);
        let mut filename = [0u8; 32];
        let mut name = [0u8; 32];

        lib.create_list(DomainMask::NONE).expect("create_list");
        assert!(lib.list_first(&mut filename, &mut name).expect("first").is_some());
        assert!(lib.list_next(&mut filename, &mut name).expect("next").is_some());
        assert!(lib.list_next(&mut filename, &mut name).expect("next").is_none());
        lib.delete_list().expect("delete_list");
        assert!(!lib.list_open());
    }

    #[test]
    fn test_mock_failure_injection() {
        let lib = MockLibrary::new().failing("FLICreateList", 19);
        let err = lib.create_list(DomainMask::NONE).expect_err("should fail");
        assert_eq!(err.native_code(), Some(19));
    }

    #[test]
    fn test_copy_text_truncates_and_terminates() {
        let mut buf = [0xffu8; 4];
        copy_text("abcdef", &mut buf);
        assert_eq!(&buf, b"abc\0");
    }
}
