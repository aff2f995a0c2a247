//! [`FliApi`] backed by the vendor shared library, loaded at runtime.
//!
//! Every entry point is resolved once when the library is loaded; the
//! [`Library`] is kept alive for as long as the function pointers are.

#![allow(unsafe_code)]
// `c_long` is `i64` on some targets and `i32` on others
#![allow(clippy::useless_conversion)]

use std::ffi::{c_char, c_double, c_long, c_void, CString, OsStr};
use std::path::Path;
use std::ptr;

use libloading::{Library, Symbol};

use crate::domain::DomainMask;
use crate::traits::{
    check, text_from_c, Area, BitDepth, DebugLevel, FliApi, FliError, FrameType, PixelSize,
    RawHandle, ReadoutDimensions, Result, ShutterControl, EBADF,
};

/// Status returned by list iteration past the last entry.
const END_OF_LIST: i64 = -EBADF;

/// Capacity of the text buffers used for model and serial strings.
const TEXT_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Entry point signatures
// ---------------------------------------------------------------------------

type FnOpen = unsafe extern "C" fn(*mut c_long, *mut c_char, c_long) -> c_long;
type FnDev = unsafe extern "C" fn(c_long) -> c_long;
type FnDevLong = unsafe extern "C" fn(c_long, c_long) -> c_long;
type FnDevOutLong = unsafe extern "C" fn(c_long, *mut c_long) -> c_long;
type FnDevDouble = unsafe extern "C" fn(c_long, c_double) -> c_long;
type FnDevOutDouble = unsafe extern "C" fn(c_long, *mut c_double) -> c_long;
type FnDevText = unsafe extern "C" fn(c_long, *mut c_char, usize) -> c_long;
type FnDevOutArea =
    unsafe extern "C" fn(c_long, *mut c_long, *mut c_long, *mut c_long, *mut c_long) -> c_long;
type FnDevArea = unsafe extern "C" fn(c_long, c_long, c_long, c_long, c_long) -> c_long;
type FnPixelSize = unsafe extern "C" fn(c_long, *mut c_double, *mut c_double) -> c_long;
type FnReadoutDimensions = unsafe extern "C" fn(
    c_long,
    *mut c_long,
    *mut c_long,
    *mut c_long,
    *mut c_long,
    *mut c_long,
    *mut c_long,
) -> c_long;
type FnGrabRow = unsafe extern "C" fn(c_long, *mut c_void, usize) -> c_long;
type FnDebugLevel = unsafe extern "C" fn(*mut c_char, c_long) -> c_long;
type FnText = unsafe extern "C" fn(*mut c_char, usize) -> c_long;
type FnDomain = unsafe extern "C" fn(c_long) -> c_long;
type FnVoid = unsafe extern "C" fn() -> c_long;
type FnListEntry =
    unsafe extern "C" fn(*mut c_long, *mut c_char, usize, *mut c_char, usize) -> c_long;

/// The vendor library with every supported entry point resolved.
pub struct NativeLibrary {
    _library: Library,
    path: String,

    open: FnOpen,
    close: FnDev,
    set_debug_level: FnDebugLevel,
    get_lib_version: FnText,

    get_model: FnDevText,
    get_serial_string: FnDevText,
    get_hw_revision: FnDevOutLong,
    get_fw_revision: FnDevOutLong,
    get_device_status: FnDevOutLong,
    lock_device: FnDev,
    unlock_device: FnDev,

    get_pixel_size: FnPixelSize,
    get_array_area: FnDevOutArea,
    get_visible_area: FnDevOutArea,
    get_readout_dimensions: FnReadoutDimensions,
    set_image_area: FnDevArea,
    set_hbin: FnDevLong,
    set_vbin: FnDevLong,
    set_exposure_time: FnDevLong,
    set_frame_type: FnDevLong,
    set_bit_depth: FnDevLong,
    set_n_flushes: FnDevLong,
    expose_frame: FnDev,
    cancel_exposure: FnDev,
    get_exposure_status: FnDevOutLong,
    grab_row: FnGrabRow,
    control_shutter: FnDevLong,

    set_temperature: FnDevDouble,
    get_temperature: FnDevOutDouble,
    get_cooler_power: FnDevOutDouble,

    set_filter_pos: FnDevLong,
    get_filter_pos: FnDevOutLong,
    get_filter_count: FnDevOutLong,

    step_motor_async: FnDevLong,
    get_stepper_position: FnDevOutLong,
    get_steps_remaining: FnDevOutLong,
    home_focuser: FnDev,

    create_list: FnDomain,
    delete_list: FnVoid,
    list_first: FnListEntry,
    list_next: FnListEntry,
}

impl NativeLibrary {
    /// Load the library from `path` and resolve every entry point.
    ///
    /// # Errors
    ///
    /// [`FliError::LoadFailed`] if the library cannot be opened,
    /// [`FliError::SymbolNotFound`] if an entry point is missing.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_from(path.as_os_str())
    }

    /// Load the library by its platform default name (`libfli.so` etc.),
    /// searched along the loader's usual paths.
    pub fn load_default() -> Result<Self> {
        Self::load_from(&libloading::library_filename("fli"))
    }

    fn load_from(path: &OsStr) -> Result<Self> {
        let path_str = path.to_string_lossy().into_owned();

        // SAFETY: loading runs the library's initializers; the caller chose a
        // trusted vendor library.
        let library = unsafe { Library::new(path) }.map_err(|err| FliError::LoadFailed {
            path: path_str.clone(),
            cause: err.to_string(),
        })?;

        tracing::info!(path = %path_str, "loaded native library");

        Ok(Self {
            open: resolve(&library, "FLIOpen")?,
            close: resolve(&library, "FLIClose")?,
            set_debug_level: resolve(&library, "FLISetDebugLevel")?,
            get_lib_version: resolve(&library, "FLIGetLibVersion")?,
            get_model: resolve(&library, "FLIGetModel")?,
            get_serial_string: resolve(&library, "FLIGetSerialString")?,
            get_hw_revision: resolve(&library, "FLIGetHWRevision")?,
            get_fw_revision: resolve(&library, "FLIGetFWRevision")?,
            get_device_status: resolve(&library, "FLIGetDeviceStatus")?,
            lock_device: resolve(&library, "FLILockDevice")?,
            unlock_device: resolve(&library, "FLIUnlockDevice")?,
            get_pixel_size: resolve(&library, "FLIGetPixelSize")?,
            get_array_area: resolve(&library, "FLIGetArrayArea")?,
            get_visible_area: resolve(&library, "FLIGetVisibleArea")?,
            get_readout_dimensions: resolve(&library, "FLIGetReadoutDimensions")?,
            set_image_area: resolve(&library, "FLISetImageArea")?,
            set_hbin: resolve(&library, "FLISetHBin")?,
            set_vbin: resolve(&library, "FLISetVBin")?,
            set_exposure_time: resolve(&library, "FLISetExposureTime")?,
            set_frame_type: resolve(&library, "FLISetFrameType")?,
            set_bit_depth: resolve(&library, "FLISetBitDepth")?,
            set_n_flushes: resolve(&library, "FLISetNFlushes")?,
            expose_frame: resolve(&library, "FLIExposeFrame")?,
            cancel_exposure: resolve(&library, "FLICancelExposure")?,
            get_exposure_status: resolve(&library, "FLIGetExposureStatus")?,
            grab_row: resolve(&library, "FLIGrabRow")?,
            control_shutter: resolve(&library, "FLIControlShutter")?,
            set_temperature: resolve(&library, "FLISetTemperature")?,
            get_temperature: resolve(&library, "FLIGetTemperature")?,
            get_cooler_power: resolve(&library, "FLIGetCoolerPower")?,
            set_filter_pos: resolve(&library, "FLISetFilterPos")?,
            get_filter_pos: resolve(&library, "FLIGetFilterPos")?,
            get_filter_count: resolve(&library, "FLIGetFilterCount")?,
            step_motor_async: resolve(&library, "FLIStepMotorAsync")?,
            get_stepper_position: resolve(&library, "FLIGetStepperPosition")?,
            get_steps_remaining: resolve(&library, "FLIGetStepsRemaining")?,
            home_focuser: resolve(&library, "FLIHomeFocuser")?,
            create_list: resolve(&library, "FLICreateList")?,
            delete_list: resolve(&library, "FLIDeleteList")?,
            list_first: resolve(&library, "FLIListFirst")?,
            list_next: resolve(&library, "FLIListNext")?,
            _library: library,
            path: path_str,
        })
    }

    /// Path or name the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn out_long(call: &'static str, f: FnDevOutLong, handle: RawHandle) -> Result<i64> {
        let mut value: c_long = 0;
        // SAFETY: `value` outlives the call.
        let status = unsafe { f(long(handle)?, &mut value) };
        check(call, status.into())?;
        Ok(value.into())
    }

    fn out_double(call: &'static str, f: FnDevOutDouble, handle: RawHandle) -> Result<f64> {
        let mut value: c_double = 0.0;
        // SAFETY: `value` outlives the call.
        let status = unsafe { f(long(handle)?, &mut value) };
        check(call, status.into())?;
        Ok(value)
    }

    fn out_text(call: &'static str, f: FnDevText, handle: RawHandle) -> Result<String> {
        let mut buf = [0u8; TEXT_LEN];
        // SAFETY: the library writes at most `buf.len()` bytes, NUL included.
        let status = unsafe { f(long(handle)?, buf.as_mut_ptr().cast(), buf.len()) };
        check(call, status.into())?;
        Ok(text_from_c(&buf))
    }

    fn out_area(call: &'static str, f: FnDevOutArea, handle: RawHandle) -> Result<Area> {
        let (mut ul_x, mut ul_y, mut lr_x, mut lr_y): (c_long, c_long, c_long, c_long) =
            (0, 0, 0, 0);
        // SAFETY: all four out-pointers outlive the call.
        let status = unsafe { f(long(handle)?, &mut ul_x, &mut ul_y, &mut lr_x, &mut lr_y) };
        check(call, status.into())?;
        Ok(Area::new(ul_x.into(), ul_y.into(), lr_x.into(), lr_y.into()))
    }

    fn dev(call: &'static str, f: FnDev, handle: RawHandle) -> Result<()> {
        // SAFETY: plain value arguments.
        let status = unsafe { f(long(handle)?) };
        check(call, status.into()).map(drop)
    }

    fn dev_long(call: &'static str, f: FnDevLong, handle: RawHandle, arg: i64) -> Result<()> {
        // SAFETY: plain value arguments.
        let status = unsafe { f(long(handle)?, long(arg)?) };
        check(call, status.into()).map(drop)
    }

    fn list_entry(
        call: &'static str,
        f: FnListEntry,
        filename: &mut [u8],
        name: &mut [u8],
    ) -> Result<Option<DomainMask>> {
        let mut domain: c_long = 0;
        // SAFETY: both buffers are passed with their true lengths and outlive the call.
        let status = unsafe {
            f(
                &mut domain,
                filename.as_mut_ptr().cast(),
                filename.len(),
                name.as_mut_ptr().cast(),
                name.len(),
            )
        };
        list_status(call, status.into(), domain.into())
    }
}

impl FliApi for NativeLibrary {
    fn open(&self, name: &str, domain: DomainMask) -> Result<RawHandle> {
        let c_name = CString::new(name)
            .map_err(|_| FliError::InvalidArgument(format!("device name {name:?} contains NUL")))?;
        let mut handle: c_long = 0;
        // SAFETY: the library only reads `c_name`, which outlives the call.
        let status =
            unsafe { (self.open)(&mut handle, c_name.as_ptr().cast_mut(), domain.bits().into()) };
        check("FLIOpen", status.into())?;
        Ok(handle.into())
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        Self::dev("FLIClose", self.close, handle)
    }

    fn set_debug_level(&self, host: Option<&Path>, level: DebugLevel) -> Result<()> {
        let host = host
            .map(|path| CString::new(path.to_string_lossy().into_owned()))
            .transpose()
            .map_err(|_| FliError::InvalidArgument("debug host contains NUL".to_owned()))?;
        let host_ptr = host.as_ref().map_or(ptr::null_mut(), |h| h.as_ptr().cast_mut());
        // SAFETY: `host` outlives the call; NULL is accepted.
        let status = unsafe { (self.set_debug_level)(host_ptr, long(level.bits())?) };
        check("FLISetDebugLevel", status.into()).map(drop)
    }

    fn lib_version(&self) -> Result<String> {
        let mut buf = [0u8; TEXT_LEN];
        // SAFETY: the library writes at most `buf.len()` bytes.
        let status = unsafe { (self.get_lib_version)(buf.as_mut_ptr().cast(), buf.len()) };
        check("FLIGetLibVersion", status.into())?;
        Ok(text_from_c(&buf))
    }

    fn model(&self, handle: RawHandle) -> Result<String> {
        Self::out_text("FLIGetModel", self.get_model, handle)
    }

    fn serial_string(&self, handle: RawHandle) -> Result<String> {
        Self::out_text("FLIGetSerialString", self.get_serial_string, handle)
    }

    fn hw_revision(&self, handle: RawHandle) -> Result<i64> {
        Self::out_long("FLIGetHWRevision", self.get_hw_revision, handle)
    }

    fn fw_revision(&self, handle: RawHandle) -> Result<i64> {
        Self::out_long("FLIGetFWRevision", self.get_fw_revision, handle)
    }

    fn device_status(&self, handle: RawHandle) -> Result<i64> {
        Self::out_long("FLIGetDeviceStatus", self.get_device_status, handle)
    }

    fn lock_device(&self, handle: RawHandle) -> Result<()> {
        Self::dev("FLILockDevice", self.lock_device, handle)
    }

    fn unlock_device(&self, handle: RawHandle) -> Result<()> {
        Self::dev("FLIUnlockDevice", self.unlock_device, handle)
    }

    fn pixel_size(&self, handle: RawHandle) -> Result<PixelSize> {
        let (mut width, mut height): (c_double, c_double) = (0.0, 0.0);
        // SAFETY: both out-pointers outlive the call.
        let status = unsafe { (self.get_pixel_size)(long(handle)?, &mut width, &mut height) };
        check("FLIGetPixelSize", status.into())?;
        Ok(PixelSize { width, height })
    }

    fn array_area(&self, handle: RawHandle) -> Result<Area> {
        Self::out_area("FLIGetArrayArea", self.get_array_area, handle)
    }

    fn visible_area(&self, handle: RawHandle) -> Result<Area> {
        Self::out_area("FLIGetVisibleArea", self.get_visible_area, handle)
    }

    fn readout_dimensions(&self, handle: RawHandle) -> Result<ReadoutDimensions> {
        let mut out: [c_long; 6] = [0; 6];
        let [width, hoffset, hbin, height, voffset, vbin] = &mut out;
        // SAFETY: all six out-pointers outlive the call.
        let status = unsafe {
            (self.get_readout_dimensions)(
                long(handle)?,
                width,
                hoffset,
                hbin,
                height,
                voffset,
                vbin,
            )
        };
        check("FLIGetReadoutDimensions", status.into())?;
        let [width, hoffset, hbin, height, voffset, vbin] = out.map(i64::from);
        Ok(ReadoutDimensions {
            width,
            hoffset,
            hbin,
            height,
            voffset,
            vbin,
        })
    }

    fn set_image_area(&self, handle: RawHandle, area: Area) -> Result<()> {
        // SAFETY: plain value arguments.
        let status = unsafe {
            (self.set_image_area)(
                long(handle)?,
                long(area.ul_x)?,
                long(area.ul_y)?,
                long(area.lr_x)?,
                long(area.lr_y)?,
            )
        };
        check("FLISetImageArea", status.into()).map(drop)
    }

    fn set_hbin(&self, handle: RawHandle, bin: i64) -> Result<()> {
        Self::dev_long("FLISetHBin", self.set_hbin, handle, bin)
    }

    fn set_vbin(&self, handle: RawHandle, bin: i64) -> Result<()> {
        Self::dev_long("FLISetVBin", self.set_vbin, handle, bin)
    }

    fn set_exposure_time(&self, handle: RawHandle, millis: i64) -> Result<()> {
        Self::dev_long("FLISetExposureTime", self.set_exposure_time, handle, millis)
    }

    fn set_frame_type(&self, handle: RawHandle, frame_type: FrameType) -> Result<()> {
        Self::dev_long("FLISetFrameType", self.set_frame_type, handle, frame_type.bits())
    }

    fn set_bit_depth(&self, handle: RawHandle, depth: BitDepth) -> Result<()> {
        Self::dev_long("FLISetBitDepth", self.set_bit_depth, handle, depth.bits())
    }

    fn set_flushes(&self, handle: RawHandle, flushes: i64) -> Result<()> {
        Self::dev_long("FLISetNFlushes", self.set_n_flushes, handle, flushes)
    }

    fn expose_frame(&self, handle: RawHandle) -> Result<()> {
        Self::dev("FLIExposeFrame", self.expose_frame, handle)
    }

    fn cancel_exposure(&self, handle: RawHandle) -> Result<()> {
        Self::dev("FLICancelExposure", self.cancel_exposure, handle)
    }

    fn exposure_status(&self, handle: RawHandle) -> Result<i64> {
        Self::out_long("FLIGetExposureStatus", self.get_exposure_status, handle)
    }

    fn grab_row(&self, handle: RawHandle, row: &mut [u16]) -> Result<()> {
        // SAFETY: the library writes `row.len()` 16-bit samples into `row`.
        let status = unsafe { (self.grab_row)(long(handle)?, row.as_mut_ptr().cast(), row.len()) };
        check("FLIGrabRow", status.into()).map(drop)
    }

    fn control_shutter(&self, handle: RawHandle, shutter: ShutterControl) -> Result<()> {
        Self::dev_long("FLIControlShutter", self.control_shutter, handle, shutter.bits())
    }

    fn set_temperature(&self, handle: RawHandle, celsius: f64) -> Result<()> {
        // SAFETY: plain value arguments.
        let status = unsafe { (self.set_temperature)(long(handle)?, celsius) };
        check("FLISetTemperature", status.into()).map(drop)
    }

    fn temperature(&self, handle: RawHandle) -> Result<f64> {
        Self::out_double("FLIGetTemperature", self.get_temperature, handle)
    }

    fn cooler_power(&self, handle: RawHandle) -> Result<f64> {
        Self::out_double("FLIGetCoolerPower", self.get_cooler_power, handle)
    }

    fn set_filter_pos(&self, handle: RawHandle, position: i64) -> Result<()> {
        Self::dev_long("FLISetFilterPos", self.set_filter_pos, handle, position)
    }

    fn filter_pos(&self, handle: RawHandle) -> Result<i64> {
        Self::out_long("FLIGetFilterPos", self.get_filter_pos, handle)
    }

    fn filter_count(&self, handle: RawHandle) -> Result<i64> {
        Self::out_long("FLIGetFilterCount", self.get_filter_count, handle)
    }

    fn step_motor_async(&self, handle: RawHandle, steps: i64) -> Result<()> {
        Self::dev_long("FLIStepMotorAsync", self.step_motor_async, handle, steps)
    }

    fn stepper_position(&self, handle: RawHandle) -> Result<i64> {
        Self::out_long("FLIGetStepperPosition", self.get_stepper_position, handle)
    }

    fn steps_remaining(&self, handle: RawHandle) -> Result<i64> {
        Self::out_long("FLIGetStepsRemaining", self.get_steps_remaining, handle)
    }

    fn home_focuser(&self, handle: RawHandle) -> Result<()> {
        Self::dev("FLIHomeFocuser", self.home_focuser, handle)
    }

    fn create_list(&self, domain: DomainMask) -> Result<()> {
        // SAFETY: plain value argument.
        let status = unsafe { (self.create_list)(domain.bits().into()) };
        check("FLICreateList", status.into()).map(drop)
    }

    fn delete_list(&self) -> Result<()> {
        // SAFETY: no arguments.
        let status = unsafe { (self.delete_list)() };
        check("FLIDeleteList", status.into()).map(drop)
    }

    fn list_first(&self, filename: &mut [u8], name: &mut [u8]) -> Result<Option<DomainMask>> {
        Self::list_entry("FLIListFirst", self.list_first, filename, name)
    }

    fn list_next(&self, filename: &mut [u8], name: &mut [u8]) -> Result<Option<DomainMask>> {
        Self::list_entry("FLIListNext", self.list_next, filename, name)
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Resolve one entry point by name.
fn resolve<T: Copy>(library: &Library, symbol: &str) -> Result<T> {
    tracing::trace!(symbol, "resolving native symbol");

    // SAFETY: `T` is the declared C signature of `symbol`.
    unsafe {
        let sym: Symbol<T> =
            library
                .get(symbol.as_bytes())
                .map_err(|err| FliError::SymbolNotFound {
                    symbol: symbol.to_owned(),
                    cause: err.to_string(),
                })?;
        Ok(*sym)
    }
}

/// Interpret a list-first/list-next status and the domain it reported.
fn list_status(call: &'static str, status: i64, domain: i64) -> Result<Option<DomainMask>> {
    if status == END_OF_LIST {
        return Ok(None);
    }
    check(call, status)?;
    DomainMask::try_from(domain).map(Some)
}

fn long(value: i64) -> Result<c_long> {
    c_long::try_from(value)
        .map_err(|_| FliError::InvalidArgument(format!("{value} does not fit a native long")))
}
