//! Device selection, identity, and lifecycle.

use std::time::Duration;

use rusb::UsbContext;

use crate::error::{Error, Result};
use crate::protocol::CommandChannel;
use crate::transport::{Transport, UsbTransport};

/// USB identity of the dongle. The firmware protocol in this driver was
/// reverse-engineered against a specific vendor/product pair; if your
/// hardware enumerates under a different pair, use
/// [`Device::open_with_ids`] instead of [`Device::open`].
pub const DEFAULT_VENDOR_ID: u16 = 0x1D50;
pub const DEFAULT_PRODUCT_ID: u16 = 0x6047;

/// How to pick one dongle out of however many are attached: empty
/// string/`None` is first-available, `#N` is by enumeration index,
/// `bus:addr` is by USB bus/address, anything else is matched against the
/// serial number.
///
/// Parsing the selector string itself belongs to a CLI layer outside this
/// crate's scope; [`DeviceSelector::parse`] is provided as the primitive a
/// CLI would call, not a CLI itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    FirstAvailable,
    Index(usize),
    BusAddress { bus: u8, address: u8 },
    Serial(String),
}

impl DeviceSelector {
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return Self::FirstAvailable;
        }
        if let Some(rest) = s.strip_prefix('#') {
            if let Ok(n) = rest.parse::<usize>() {
                return Self::Index(n);
            }
        }
        if let Some((bus, addr)) = s.split_once(':') {
            if let (Ok(bus), Ok(addr)) = (bus.parse::<u8>(), addr.parse::<u8>()) {
                return Self::BusAddress { bus, address: addr };
            }
        }
        Self::Serial(s.to_string())
    }
}

/// Manufacturer/product/serial identifier triple read from USB string
/// descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    pub bus: u8,
    pub address: u8,
}

/// Live handle to one transceiver: an owned USB transport plus the command
/// channel built on top of it.
pub struct Device<T = UsbTransport> {
    pub identity: DeviceIdentity,
    channel: CommandChannel<T>,
}

impl Device<UsbTransport> {
    pub fn open(selector: &DeviceSelector) -> Result<Self> {
        Self::open_with_ids(selector, DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID)
    }

    pub fn open_with_ids(selector: &DeviceSelector, vendor_id: u16, product_id: u16) -> Result<Self> {
        let context = rusb::Context::new()?;
        let candidates = matching_devices(&context, vendor_id, product_id)?;

        let chosen = select(&candidates, selector)?;
        let identity = read_identity(chosen)?;
        let transport = UsbTransport::claim(chosen)?;

        log::info!(
            "opened device {} ({}:{}) serial={}",
            identity.product, identity.bus, identity.address, identity.serial
        );

        Ok(Device {
            identity,
            channel: CommandChannel::new(transport),
        })
    }
}

impl<T: Transport> Device<T> {
    /// Build a `Device` around an already-constructed transport. Used by
    /// tests (and by callers who manage USB device selection themselves).
    pub fn from_transport(identity: DeviceIdentity, transport: T) -> Self {
        Device {
            identity,
            channel: CommandChannel::new(transport),
        }
    }

    pub fn send(&self, app: u8, cmd: u8, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.channel.send(app, cmd, payload, timeout)
    }

    #[cfg(test)]
    pub(crate) fn written_frames(&self) -> Vec<Vec<u8>> {
        self.channel.written_frames()
    }
}

fn matching_devices(
    context: &rusb::Context,
    vendor_id: u16,
    product_id: u16,
) -> Result<Vec<rusb::Device<rusb::Context>>> {
    let mut out = Vec::new();
    for device in context.devices()?.iter() {
        if let Ok(desc) = device.device_descriptor() {
            if desc.vendor_id() == vendor_id && desc.product_id() == product_id {
                out.push(device);
            }
        }
    }
    Ok(out)
}

fn select<'a>(
    candidates: &'a [rusb::Device<rusb::Context>],
    selector: &DeviceSelector,
) -> Result<&'a rusb::Device<rusb::Context>> {
    match selector {
        DeviceSelector::FirstAvailable => candidates
            .first()
            .ok_or_else(|| Error::Config("no matching device found".into())),
        DeviceSelector::Index(n) => candidates
            .get(*n)
            .ok_or_else(|| Error::Config(format!("no device at index {n}"))),
        DeviceSelector::BusAddress { bus, address } => candidates
            .iter()
            .find(|d| d.bus_number() == *bus && d.address() == *address)
            .ok_or_else(|| Error::Config(format!("no device at bus {bus} address {address}"))),
        DeviceSelector::Serial(serial) => {
            let mut matches = Vec::new();
            for device in candidates {
                if let (Ok(handle), Ok(desc)) = (device.open(), device.device_descriptor()) {
                    if let Ok(s) = handle.read_serial_number_string_ascii(&desc) {
                        if &s == serial {
                            matches.push(device);
                        }
                    }
                }
            }
            match matches.len() {
                0 => Err(Error::Config(format!("no device with serial {serial}"))),
                1 => Ok(matches[0]),
                n => Err(Error::Config(format!(
                    "ambiguous serial {serial}: {n} devices matched"
                ))),
            }
        }
    }
}

fn read_identity(device: &rusb::Device<rusb::Context>) -> Result<DeviceIdentity> {
    let desc = device.device_descriptor()?;
    let handle = device.open()?;
    let manufacturer = handle
        .read_manufacturer_string_ascii(&desc)
        .unwrap_or_default();
    let product = handle.read_product_string_ascii(&desc).unwrap_or_default();
    let serial = handle
        .read_serial_number_string_ascii(&desc)
        .unwrap_or_default();
    Ok(DeviceIdentity {
        manufacturer,
        product,
        serial,
        bus: device.bus_number(),
        address: device.address(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_as_first_available() {
        assert_eq!(DeviceSelector::parse(""), DeviceSelector::FirstAvailable);
    }

    #[test]
    fn parses_index_selector() {
        assert_eq!(DeviceSelector::parse("#2"), DeviceSelector::Index(2));
    }

    #[test]
    fn parses_bus_address_selector() {
        assert_eq!(
            DeviceSelector::parse("1:7"),
            DeviceSelector::BusAddress { bus: 1, address: 7 }
        );
    }

    #[test]
    fn parses_anything_else_as_serial() {
        assert_eq!(
            DeviceSelector::parse("ABC123"),
            DeviceSelector::Serial("ABC123".into())
        );
    }
}
