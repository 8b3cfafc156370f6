//! USB transport: bulk read/write framing and control-endpoint requests.
//!
//! [`Transport`] is the seam the rest of the driver is built against: a
//! generic bound over the bulk transport rather than a concrete USB type,
//! so the command channel and reassembler can be exercised against an
//! in-memory fake in tests instead of real hardware.

use std::time::Duration;

use crate::error::{Error, Result};

/// Bulk OUT / IN endpoint addresses used by the dongle.
pub const BULK_OUT_ENDPOINT: u8 = 0x05;
pub const BULK_IN_ENDPOINT: u8 = 0x85;
pub const MAX_PACKET_SIZE: usize = 64;

pub const USB_INTERFACE: u8 = 0;
pub const USB_CONFIGURATION: u8 = 1;

/// A bidirectional USB-like transport: bulk read/write plus control
/// transfers. Implemented for real hardware by [`UsbTransport`]; swapped
/// for an in-memory fake in unit tests.
pub trait Transport: Send {
    fn bulk_write(&mut self, bytes: &[u8]) -> Result<()>;
    fn bulk_read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>>;
    fn control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
    ) -> Result<usize>;

    /// Every `bulk_write` call this transport has seen, in order. Only
    /// meaningful for [`fake::FakeTransport`]; real hardware keeps no such
    /// log. Exists so tests can assert on the exact bytes a higher-level
    /// operation put on the wire.
    #[cfg(test)]
    fn written_frames(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }
}

/// Vendor control requests on EP0, per the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlRequest {
    GetDebugCodes = 0x00,
    PokeXdata = 0x01,
    PeekXdata = 0x02,
    PingOne = 0x03,
    PingTwo = 0x04,
    Wcid = 0xFE,
    Reset = 0xFF,
}

/// Live handle to the dongle's USB interface.
///
/// Claim sequence on construction: detach any kernel driver, select
/// configuration 1, claim interface 0 alternate 0, resolve endpoint 5 in
/// both directions. Released in reverse order on drop, even if an earlier
/// step in the sequence failed to keep the handle releasable.
pub struct UsbTransport {
    handle: rusb::DeviceHandle<rusb::Context>,
    claimed_interface: bool,
    active_config_set: bool,
}

impl UsbTransport {
    pub fn claim(device: &rusb::Device<rusb::Context>) -> Result<Self> {
        let mut handle = device.open()?;

        let had_kernel_driver = handle.kernel_driver_active(USB_INTERFACE).unwrap_or(false);
        if had_kernel_driver {
            // Best effort: some platforms don't support detach at all.
            let _ = handle.detach_kernel_driver(USB_INTERFACE);
        }

        handle.set_active_configuration(USB_CONFIGURATION)?;
        let active_config_set = true;

        handle.claim_interface(USB_INTERFACE)?;
        let claimed_interface = true;

        handle.set_alternate_setting(USB_INTERFACE, 0)?;

        Ok(Self {
            handle,
            claimed_interface,
            active_config_set,
        })
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if self.claimed_interface {
            let _ = self.handle.release_interface(USB_INTERFACE);
        }
        // Configuration and device handle release happen implicitly when
        // `rusb::DeviceHandle` drops; `active_config_set` is tracked so the
        // release ordering is explicit in the code even though rusb itself
        // doesn't expose a separate "unset configuration" call.
        let _ = self.active_config_set;
    }
}

impl Transport for UsbTransport {
    fn bulk_write(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self
            .handle
            .write_bulk(BULK_OUT_ENDPOINT, bytes, Duration::from_secs(1))?;
        if written != bytes.len() {
            return Err(Error::Framing(format!(
                "short write: wrote {written} of {} bytes",
                bytes.len()
            )));
        }
        Ok(())
    }

    fn bulk_read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        match self.handle.read_bulk(BULK_IN_ENDPOINT, &mut buf, timeout) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(rusb::Error::Timeout) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let direction_in = request_type & 0x80 != 0;
        let n = if direction_in {
            self.handle
                .read_control(request_type, request, value, index, buffer, Duration::from_secs(1))?
        } else {
            self.handle
                .write_control(request_type, request, value, index, buffer, Duration::from_secs(1))?
        };
        Ok(n)
    }
}
