//! Command channel: length-prefixed request/response framing over the bulk
//! endpoint, with stream reassembly for responses that arrive split across
//! multiple bulk reads and possibly interleaved with unrelated traffic.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::transport::{Transport, MAX_PACKET_SIZE};

/// Sentinel byte prefixing every device-to-host response frame.
pub const RESPONSE_SENTINEL: u8 = 0x40;

/// Application IDs.
pub mod app {
    pub const GENERIC: u8 = 0x01;
    pub const NIC: u8 = 0x42;
    pub const SPECAN: u8 = 0x43;
    pub const DEBUG: u8 = 0xFE;
    pub const SYSTEM: u8 = 0xFF;
}

/// Outcome of one reassembly pass: either the expected frame was found, or
/// it wasn't yet, and if it wasn't, whether at least one complete (but
/// mismatched) frame was seen along the way. That distinction is what lets
/// the command channel tell a plain timeout (nothing ever arrived) apart
/// from a protocol mismatch (something arrived, repeatedly, but never the
/// expected pair).
enum Extracted {
    Matched(Vec<u8>),
    Pending { saw_mismatched_frame: bool },
}

/// Attempt one pass of the reassembly algorithm against `buffer`.
///
/// On a mismatched `(app, cmd)`, only the sentinel byte is discarded before
/// retrying, not the whole mismatched frame. This is deliberate: it lets
/// an interleaved out-of-band message be skipped without resynchronizing
/// past real data, but it means a caller with the wrong expectation can
/// silently consume a response that was meant for a different in-flight
/// operation. Preserved as-is (see DESIGN.md).
fn try_extract(buffer: &mut Vec<u8>, expected_app: u8, expected_cmd: u8) -> Extracted {
    let mut saw_mismatched_frame = false;
    loop {
        let Some(sentinel_pos) = buffer.iter().position(|&b| b == RESPONSE_SENTINEL) else {
            return Extracted::Pending { saw_mismatched_frame };
        };
        buffer.drain(0..sentinel_pos);

        if buffer.len() < 5 {
            return Extracted::Pending { saw_mismatched_frame };
        }
        let resp_app = buffer[1];
        let resp_cmd = buffer[2];
        let resp_len = u16::from_le_bytes([buffer[3], buffer[4]]) as usize;

        if buffer.len() < 5 + resp_len {
            return Extracted::Pending { saw_mismatched_frame };
        }

        if resp_app == expected_app && resp_cmd == expected_cmd {
            let payload = buffer[5..5 + resp_len].to_vec();
            buffer.drain(0..5 + resp_len);
            return Extracted::Matched(payload);
        }

        saw_mismatched_frame = true;
        log::debug!(
            "reassembler: skipping stray response (app={resp_app:#04x}, cmd={resp_cmd:#04x}), \
             expected (app={expected_app:#04x}, cmd={expected_cmd:#04x})"
        );
        buffer.drain(0..1);
    }
}

/// Shared per-device state: the transport plus the reassembly buffer,
/// under one lock so at most one `send` is in flight at a time.
pub struct CommandChannel<T> {
    inner: Mutex<(T, Vec<u8>)>,
}

impl<T: Transport> CommandChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Mutex::new((transport, Vec::new())),
        }
    }

    /// Send one request and wait for its matching response.
    ///
    /// Builds `[app, cmd, len_lo, len_hi, payload...]`, writes it in one
    /// bulk write, then reassembles responses, possibly skipping stray
    /// traffic from other callers, until `(app, cmd)` matches or
    /// `timeout` elapses.
    pub fn send(&self, app: u8, cmd: u8, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        if payload.len() > u16::MAX as usize {
            return Err(Error::Framing(format!(
                "payload length {} exceeds u16 range",
                payload.len()
            )));
        }

        let mut guard = self.inner.lock();
        let (transport, buffer) = &mut *guard;

        let mut request = Vec::with_capacity(4 + payload.len());
        request.push(app);
        request.push(cmd);
        request.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        request.extend_from_slice(payload);
        transport.bulk_write(&request)?;

        let deadline = Instant::now() + timeout;
        let mut saw_any_mismatch = false;
        loop {
            match try_extract(buffer, app, cmd) {
                Extracted::Matched(response) => return Ok(response),
                Extracted::Pending { saw_mismatched_frame } => {
                    saw_any_mismatch |= saw_mismatched_frame;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(if saw_any_mismatch {
                    Error::ProtocolMismatch { expected_app: app, expected_cmd: cmd }
                } else {
                    Error::Timeout
                });
            }

            let read_timeout = remaining.min(Duration::from_millis(100));
            let chunk = transport.bulk_read(MAX_PACKET_SIZE, read_timeout)?;
            if !chunk.is_empty() {
                buffer.extend_from_slice(&chunk);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn written_frames(&self) -> Vec<Vec<u8>> {
        self.inner.lock().0.written_frames()
    }
}
