//! Device discovery through the native create/iterate/delete list protocol.

use std::io::Write;

use crate::device::Device;
use crate::domain::{DeviceType, DomainMask};
use crate::traits::{text_from_c, FliApi, Result};

/// Capacity of each text buffer handed to the list calls.
const TEXT_LEN: usize = 1024;

/// One device found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Domain the device reports; pass it back to [`Device::open`].
    pub domain: DomainMask,
    /// Device file name.
    pub filename: String,
    /// Human-readable device name.
    pub name: String,
}

/// A created native device list. Deleting it is owed exactly once.
struct ListSession<'lib, L: FliApi + ?Sized> {
    lib: &'lib L,
    filename: [u8; TEXT_LEN],
    name: [u8; TEXT_LEN],
    started: bool,
    deleted: bool,
}

impl<'lib, L: FliApi + ?Sized> ListSession<'lib, L> {
    fn create(lib: &'lib L, domain: DomainMask) -> Result<Self> {
        lib.create_list(domain)?;
        tracing::debug!(%domain, "device list created");
        Ok(Self {
            lib,
            filename: [0; TEXT_LEN],
            name: [0; TEXT_LEN],
            started: false,
            deleted: false,
        })
    }

    fn next_entry(&mut self) -> Result<Option<DeviceEntry>> {
        let domain = if self.started {
            self.lib.list_next(&mut self.filename, &mut self.name)?
        } else {
            self.started = true;
            self.lib.list_first(&mut self.filename, &mut self.name)?
        };
        Ok(domain.map(|domain| DeviceEntry {
            domain,
            filename: text_from_c(&self.filename),
            name: text_from_c(&self.name),
        }))
    }

    fn delete(&mut self) -> Result<()> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;
        self.lib.delete_list()?;
        tracing::debug!("device list deleted");
        Ok(())
    }
}

impl<L: FliApi + ?Sized> Drop for ListSession<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.delete() {
            tracing::error!(error = %err, "failed to delete device list");
        }
    }
}

/// Call `visitor` for every device in `domain`, in list order.
///
/// The native list is always deleted before returning, including when the
/// visitor fails or a fetch fails. An error from the visitor or a fetch wins
/// over a delete failure, which is only logged; when iteration succeeds a
/// delete failure is returned.
///
/// The visitor may open and close devices through the same library.
pub fn for_each_device<L, F>(lib: &L, domain: DomainMask, mut visitor: F) -> Result<()>
where
    L: FliApi + ?Sized,
    F: FnMut(&DeviceEntry) -> Result<()>,
{
    let mut session = ListSession::create(lib, domain)?;
    while let Some(entry) = session.next_entry()? {
        tracing::trace!(filename = %entry.filename, name = %entry.name, "found device");
        visitor(&entry)?;
    }
    session.delete()
}

/// Collect every device in `domain`.
pub fn devices<L: FliApi + ?Sized>(lib: &L, domain: DomainMask) -> Result<Vec<DeviceEntry>> {
    let mut found = Vec::new();
    for_each_device(lib, domain, |entry| {
        found.push(entry.clone());
        Ok(())
    })?;
    Ok(found)
}

/// Write one line per device in `domain`, with camera details below each
/// camera.
///
/// A camera that cannot be opened or queried gets a note instead of its
/// details; the remaining devices are still listed. Only list failures and
/// write failures abort.
pub fn list_devices<L, W>(lib: &L, domain: DomainMask, out: &mut W) -> Result<()>
where
    L: FliApi + ?Sized,
    W: Write,
{
    for_each_device(lib, domain, |entry| {
        writeln!(out, "{}: {} ({})", entry.filename, entry.name, entry.domain)?;
        let is_camera = matches!(entry.domain.device_type(), Ok(DeviceType::Camera));
        if !is_camera {
            return Ok(());
        }
        if let Err(err) = describe_camera(lib, entry, out) {
            tracing::warn!(filename = %entry.filename, error = %err, "could not inspect camera");
            writeln!(out, "  (unavailable: {err})")?;
        }
        Ok(())
    })
}

fn describe_camera<L, W>(lib: &L, entry: &DeviceEntry, out: &mut W) -> Result<()>
where
    L: FliApi + ?Sized,
    W: Write,
{
    let mut camera = Device::open(lib, &entry.filename, entry.domain)?;
    let model = camera.model()?;
    let serial = camera.serial()?;
    let hw = camera.hw_revision()?;
    let fw = camera.fw_revision()?;
    let pixel = camera.pixel_size()?;
    let array = camera.array_area()?;
    let visible = camera.visible_area()?;
    camera.close()?;

    writeln!(out, "  model:        {model}")?;
    writeln!(out, "  serial:       {serial}")?;
    writeln!(out, "  hw/fw rev:    {hw}/{fw}")?;
    writeln!(
        out,
        "  pixel size:   {:.2} x {:.2} um",
        pixel.width * 1e6,
        pixel.height * 1e6
    )?;
    writeln!(
        out,
        "  array area:   ({}, {}) - ({}, {})",
        array.ul_x, array.ul_y, array.lr_x, array.lr_y
    )?;
    writeln!(
        out,
        "  visible area: ({}, {}) - ({}, {})",
        visible.ul_x, visible.ul_y, visible.lr_x, visible.lr_y
    )?;
    Ok(())
}
