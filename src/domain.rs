//! Domain identifiers: the interface × device-type bitmask used to open,
//! enumerate and filter devices.
//!
//! A [`DomainMask`] packs two independent byte fields into a `u16`:
//!
//! ```text
//!   15            8 7             0
//!  +---------------+---------------+
//!  |  device type  |   interface   |
//!  +---------------+---------------+
//! ```
//!
//! Both fields use `0` for "none", so the zero mask is always valid and means
//! "unrestricted".

use std::fmt;
use std::str::FromStr;

use crate::traits::{FliError, Result};

const INTERFACE_BITS: u16 = 0x00ff;
const DEVICE_TYPE_BITS: u16 = 0xff00;

/// Transport used to reach a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interface {
    /// No interface restriction.
    #[default]
    None,
    /// Parallel port.
    ParallelPort,
    /// USB.
    Usb,
    /// Serial port at the default rate.
    Serial,
    /// Network.
    Inet,
    /// Serial port at 19200 baud.
    Serial19200,
    /// Serial port at 1200 baud.
    Serial1200,
}

impl Interface {
    /// Every interface, in raw-value order.
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::ParallelPort,
        Self::Usb,
        Self::Serial,
        Self::Inet,
        Self::Serial19200,
        Self::Serial1200,
    ];

    /// Raw low-byte value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        match self {
            Self::None => 0x00,
            Self::ParallelPort => 0x01,
            Self::Usb => 0x02,
            Self::Serial => 0x03,
            Self::Inet => 0x04,
            Self::Serial19200 => 0x05,
            Self::Serial1200 => 0x06,
        }
    }

    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(Self::None),
            0x01 => Some(Self::ParallelPort),
            0x02 => Some(Self::Usb),
            0x03 => Some(Self::Serial),
            0x04 => Some(Self::Inet),
            0x05 => Some(Self::Serial19200),
            0x06 => Some(Self::Serial1200),
            _ => None,
        }
    }

    /// Symbolic name, as accepted by [`DomainSymbol::from_str`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ParallelPort => "parallel_port",
            Self::Usb => "usb",
            Self::Serial => "serial",
            Self::Inet => "inet",
            Self::Serial19200 => "serial_19200",
            Self::Serial1200 => "serial_1200",
        }
    }
}

/// Kind of instrument behind a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    /// No device-type restriction.
    #[default]
    None,
    /// CCD/CMOS camera.
    Camera,
    /// Filter wheel.
    FilterWheel,
    /// Focuser.
    Focuser,
    /// High-speed filter wheel.
    HsFilterWheel,
    /// Raw device access.
    Raw,
    /// Enumerate by physical connection rather than by device class.
    EnumerateByConnection,
}

impl DeviceType {
    /// Every device type, in raw-value order.
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::Camera,
        Self::FilterWheel,
        Self::Focuser,
        Self::HsFilterWheel,
        Self::Raw,
        Self::EnumerateByConnection,
    ];

    /// Raw value, already shifted into the high byte.
    #[must_use]
    pub const fn bits(self) -> u16 {
        let byte: u16 = match self {
            Self::None => 0x00,
            Self::Camera => 0x01,
            Self::FilterWheel => 0x02,
            Self::Focuser => 0x03,
            Self::HsFilterWheel => 0x04,
            Self::Raw => 0x0f,
            Self::EnumerateByConnection => 0x80,
        };
        byte << 8
    }

    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Camera),
            0x02 => Some(Self::FilterWheel),
            0x03 => Some(Self::Focuser),
            0x04 => Some(Self::HsFilterWheel),
            0x0f => Some(Self::Raw),
            0x80 => Some(Self::EnumerateByConnection),
            _ => None,
        }
    }

    /// Symbolic name, as accepted by [`DomainSymbol::from_str`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Camera => "camera",
            Self::FilterWheel => "filterwheel",
            Self::Focuser => "focuser",
            Self::HsFilterWheel => "hs_filterwheel",
            Self::Raw => "raw",
            Self::EnumerateByConnection => "enumerate_by_connection",
        }
    }
}

/// One symbolic name from the domain vocabulary.
///
/// `none` is its own symbol because it is valid in either field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainSymbol {
    /// Matches nothing in particular; contributes no bits.
    None,
    /// An interface-field symbol.
    Interface(Interface),
    /// A device-type-field symbol.
    DeviceType(DeviceType),
}

impl DomainSymbol {
    /// Raw value of the symbol within the 16-bit mask.
    #[must_use]
    pub const fn bits(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Interface(interface) => interface.bits(),
            Self::DeviceType(device_type) => device_type.bits(),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Interface(interface) => interface.name(),
            Self::DeviceType(device_type) => device_type.name(),
        }
    }
}

impl From<Interface> for DomainSymbol {
    fn from(interface: Interface) -> Self {
        Self::Interface(interface)
    }
}

impl From<DeviceType> for DomainSymbol {
    fn from(device_type: DeviceType) -> Self {
        Self::DeviceType(device_type)
    }
}

impl FromStr for DomainSymbol {
    type Err = FliError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        if name == "none" {
            return Ok(Self::None);
        }
        if let Some(interface) = Interface::ALL.into_iter().find(|i| i.name() == name) {
            return Ok(Self::Interface(interface));
        }
        if let Some(device_type) = DeviceType::ALL.into_iter().find(|d| d.name() == name) {
            return Ok(Self::DeviceType(device_type));
        }
        Err(FliError::UnknownDomainSymbol {
            symbol: s.to_owned(),
            reason: "not an interface or device type name",
        })
    }
}

impl fmt::Display for DomainSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Combined interface + device-type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DomainMask(u16);

impl DomainMask {
    /// The unrestricted mask.
    pub const NONE: Self = Self(0);

    /// Wrap a raw mask without validating it; see [`DomainMask::decode`].
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw 16-bit value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Build a mask from one interface and one device type.
    #[must_use]
    pub const fn new(interface: Interface, device_type: DeviceType) -> Self {
        Self(interface.bits() | device_type.bits())
    }

    /// Encode zero, one or two symbols into a mask.
    ///
    /// Each symbol is assigned to a field by the byte its raw value occupies:
    /// low byte means interface, high byte means device type. Symbols whose raw
    /// value is zero (`none`) occupy neither field and add nothing. Argument
    /// order does not matter.
    ///
    /// # Errors
    ///
    /// [`FliError::UnknownDomainSymbol`] when two symbols land in the same
    /// field, or when more than two symbols are given.
    pub fn encode(symbols: &[DomainSymbol]) -> Result<Self> {
        if symbols.len() > 2 {
            let names: Vec<&str> = symbols.iter().map(|s| s.name()).collect();
            return Err(FliError::UnknownDomainSymbol {
                symbol: names.join(" "),
                reason: "at most one interface and one device type",
            });
        }

        let mut mask = 0u16;
        for symbol in symbols {
            let bits = symbol.bits();
            let fields = [(INTERFACE_BITS, "interface"), (DEVICE_TYPE_BITS, "device type")];
            for (field, name) in fields {
                if bits & field != 0 && mask & field != 0 {
                    tracing::debug!(%symbol, field = name, "domain field given twice");
                    return Err(FliError::UnknownDomainSymbol {
                        symbol: symbol.to_string(),
                        reason: if field == INTERFACE_BITS {
                            "interface given twice"
                        } else {
                            "device type given twice"
                        },
                    });
                }
            }
            mask |= bits;
        }
        Ok(Self(mask))
    }

    /// Parse and encode symbol names, e.g. `["usb", "camera"]`.
    ///
    /// Each name is trimmed and matched case-insensitively.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let symbols = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<DomainSymbol>>>()?;
        Self::encode(&symbols)
    }

    /// Split the mask back into its interface and device type.
    ///
    /// # Errors
    ///
    /// [`FliError::InvalidDomainBits`] if either byte has no symbolic mapping.
    pub fn decode(self) -> Result<(Interface, DeviceType)> {
        Ok((self.interface()?, self.device_type()?))
    }

    /// The interface field.
    pub fn interface(self) -> Result<Interface> {
        let byte = self.interface_byte();
        Interface::from_bits(byte).ok_or(FliError::InvalidDomainBits {
            mask: self.0,
            field: "interface",
            value: byte,
        })
    }

    /// The device-type field.
    pub fn device_type(self) -> Result<DeviceType> {
        let byte = self.device_type_byte();
        DeviceType::from_bits(byte).ok_or(FliError::InvalidDomainBits {
            mask: self.0,
            field: "device type",
            value: byte,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn interface_byte(self) -> u8 {
        (self.0 & INTERFACE_BITS) as u8
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn device_type_byte(self) -> u8 {
        ((self.0 & DEVICE_TYPE_BITS) >> 8) as u8
    }
}

impl From<(Interface, DeviceType)> for DomainMask {
    fn from((interface, device_type): (Interface, DeviceType)) -> Self {
        Self::new(interface, device_type)
    }
}

impl TryFrom<i64> for DomainMask {
    type Error = FliError;

    fn try_from(raw: i64) -> Result<Self> {
        u16::try_from(raw)
            .map(Self)
            .map_err(|_| FliError::InvalidArgument(format!("domain value {raw} out of range")))
    }
}

impl fmt::Display for DomainMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok((interface, device_type)) => {
                write!(f, "{} {}", interface.name(), device_type.name())
            }
            Err(_) => write!(f, "{:#06x}", self.0),
        }
    }
}
