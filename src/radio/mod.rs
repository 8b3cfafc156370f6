//! Radio controller: mode transitions, strobes, and packet TX/RX, built on
//! top of the `System` and `NIC` application commands.
//!
//! A strobe here is a `poke` of [`RFST`](crate::registers::RFST), and mode
//! transitions are a firmware RF-mode command followed by polling
//! `MARCSTATE` until it settles, rather than a fixed delay.

use std::sync::Arc;
use std::time::{Duration, Instant};
use std::thread::sleep;

use crate::device::Device;
use crate::error::{DeviceErrorCode, Error, Result};
use crate::protocol::app;
use crate::registers::{
    check_poke_response, peek_payload, poke_payload, syscmd, RadioState, RegisterMap, Strobe,
    BLOCK0_ADDR, BLOCK0_SIZE, BLOCK1_ADDR, BLOCK1_SIZE, BLOCK2_ADDR, BLOCK2_SIZE, BLOCK3_ADDR,
    BLOCK3_SIZE, RFST,
};
use crate::transport::Transport;

/// `NIC` application command IDs.
pub mod nic {
    pub const RECV: u8 = 0x01;
    pub const XMIT: u8 = 0x02;
    pub const SET_RECV_LARGE: u8 = 0x05;
    pub const LONG_XMIT: u8 = 0x0C;
    pub const LONG_XMIT_MORE: u8 = 0x0D;
}

/// Firmware-level RF mode, set via the `System` app's `RF_MODE` command.
/// Distinct from [`RadioState`], which is the MARCSTATE the firmware
/// settles into once the mode change takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RfMode {
    Idle = 0,
    Rx = 1,
    Tx = 2,
}

/// Maximum payload the short `NIC_XMIT`/`NIC_RECV` path supports; anything
/// larger on transmit must go through the chunked long-packet path.
pub const SHORT_PACKET_MAX: usize = 255;
/// Chunk size used by the long-packet transmit path.
const LONG_XMIT_CHUNK: usize = 240;
/// Largest block size `NIC_SET_RECV_LARGE` accepts.
pub const MAX_RECV_BLOCK: u16 = 512;

const MARCSTATE_POLL_TIMEOUT: Duration = Duration::from_millis(10);
const MARCSTATE_POLL_INTERVAL: Duration = Duration::from_micros(200);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const BACKPRESSURE_BYTE: u8 = 0xFE;
const BACKPRESSURE_RETRIES: u32 = 100;
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(1);

/// Post-receive diagnostics decoded from the status register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxDiagnostics {
    pub rssi_raw: u8,
    pub lqi_raw: u8,
    pub crc_ok: bool,
    pub lqi: u8,
    pub marcstate: RadioState,
    pub pktstatus: u8,
}

/// Stateful view over one device's radio core. Holds a shared [`Device`]
/// handle (cheap to clone, since it's an `Arc`) so it can be moved into a
/// background thread by the scanner without fighting borrow lifetimes.
pub struct RadioController<T: Transport> {
    device: Arc<Device<T>>,
}

impl<T: Transport> RadioController<T> {
    pub fn new(device: Arc<Device<T>>) -> Self {
        Self { device }
    }

    /// Send a raw command over the device's command channel, using the
    /// controller's default timeout. Exposed so sibling modules (e.g. the
    /// scanner) can issue register pokes/peeks without duplicating the
    /// device plumbing.
    pub fn send(&self, app: u8, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
        self.device.send(app, cmd, payload, DEFAULT_TIMEOUT)
    }

    fn read_marcstate(&self) -> Result<RadioState> {
        let resp = self.send(app::SYSTEM, syscmd::PEEK, &peek_payload(0xDF3B, 1))?;
        let raw = *resp.first().ok_or_else(|| Error::Framing("empty MARCSTATE peek response".into()))?;
        Ok(RadioState::from_marcstate(raw))
    }

    /// Poll `MARCSTATE` until it reports a settled state, or until
    /// `MARCSTATE_POLL_TIMEOUT` elapses. A fixed sleep would either be too
    /// short on a slow crystal warm-up or waste time on a fast one; polling
    /// the actual state is both faster and more correct.
    fn await_settled(&self) -> Result<RadioState> {
        let deadline = Instant::now() + MARCSTATE_POLL_TIMEOUT;
        loop {
            let state = self.read_marcstate()?;
            if state.is_settled() {
                return Ok(state);
            }
            if Instant::now() >= deadline {
                return Err(Error::State(format!(
                    "radio did not settle within {:?}, last state {:?}",
                    MARCSTATE_POLL_TIMEOUT, state
                )));
            }
            sleep(MARCSTATE_POLL_INTERVAL);
        }
    }

    fn set_rf_mode(&self, mode: RfMode) -> Result<()> {
        self.send(app::SYSTEM, syscmd::RF_MODE, &[mode as u8])?;
        Ok(())
    }

    pub fn set_mode_idle(&self) -> Result<RadioState> {
        self.set_rf_mode(RfMode::Idle)?;
        self.await_settled()
    }

    pub fn set_mode_rx(&self) -> Result<RadioState> {
        self.set_rf_mode(RfMode::Rx)?;
        self.await_settled()
    }

    pub fn set_mode_tx(&self) -> Result<RadioState> {
        self.set_rf_mode(RfMode::Tx)?;
        self.await_settled()
    }

    pub fn strobe(&self, s: Strobe) -> Result<()> {
        let resp = self.send(
            app::SYSTEM,
            syscmd::POKE,
            &poke_payload(RFST, &[s as u8]),
        )?;
        check_poke_response(&resp)
    }

    pub fn strobe_idle(&self) -> Result<()> {
        self.strobe(Strobe::SIDLE)
    }

    pub fn strobe_rx(&self) -> Result<()> {
        self.strobe(Strobe::SRX)
    }

    pub fn strobe_tx(&self) -> Result<()> {
        self.strobe(Strobe::STX)
    }

    /// Echo `payload` off the device via the `System` app's ping command.
    /// A working link returns exactly what was sent, byte for byte.
    pub fn ping(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.send(app::SYSTEM, syscmd::PING, payload)
    }

    /// Read the full register map in four block peeks (sizes 32, 3, 11, 8)
    /// rather than one byte at a time, to minimize USB round-trips.
    pub fn read_all_registers(&self) -> Result<RegisterMap> {
        let block0: [u8; BLOCK0_SIZE] = self.peek_block(BLOCK0_ADDR, BLOCK0_SIZE)?;
        let mut r = RegisterMap::from_block0(&block0);

        let block1: [u8; BLOCK1_SIZE] = self.peek_block(BLOCK1_ADDR, BLOCK1_SIZE)?;
        r.merge_block1(&block1);

        let block2: [u8; BLOCK2_SIZE] = self.peek_block(BLOCK2_ADDR, BLOCK2_SIZE)?;
        r.merge_block2(&block2);

        let block3: [u8; BLOCK3_SIZE] = self.peek_block(BLOCK3_ADDR, BLOCK3_SIZE)?;
        r.merge_block3(&block3);

        Ok(r)
    }

    /// Write the register map in three block pokes (sizes 32, 3, 11);
    /// the read-only status block is never written.
    pub fn write_all_registers(&self, registers: &RegisterMap) -> Result<()> {
        self.poke_block(BLOCK0_ADDR, &registers.to_block0())?;
        self.poke_block(BLOCK1_ADDR, &registers.to_block1())?;
        self.poke_block(BLOCK2_ADDR, &registers.to_block2())?;
        Ok(())
    }

    fn peek_block<const N: usize>(&self, addr: u16, count: usize) -> Result<[u8; N]> {
        let resp = self.send(app::SYSTEM, syscmd::PEEK, &peek_payload(addr, count as u16))?;
        if resp.len() < count {
            return Err(Error::Framing(format!(
                "short peek response at {addr:#06x}: expected {count} bytes, got {}",
                resp.len()
            )));
        }
        resp[..count]
            .try_into()
            .map_err(|_| Error::Framing(format!("peek response at {addr:#06x} had unexpected length")))
    }

    fn poke_block(&self, addr: u16, data: &[u8]) -> Result<()> {
        let resp = self.send(app::SYSTEM, syscmd::POKE, &poke_payload(addr, data))?;
        check_poke_response(&resp)
    }

    /// Transmit `data`. Packets of 255 bytes or fewer go through the short
    /// `NIC_XMIT` path; longer packets require `repeat == 0 && offset == 0`
    /// and are chunked through `NIC_LONG_XMIT`/`NIC_LONG_XMIT_MORE`.
    pub fn rf_xmit(&self, data: &[u8], repeat: u16, offset: u16) -> Result<()> {
        if data.len() <= SHORT_PACKET_MAX {
            self.rf_xmit_short(data, repeat, offset)
        } else {
            if repeat != 0 || offset != 0 {
                return Err(Error::Config(
                    "repeat/offset are only supported for packets <= 255 bytes".into(),
                ));
            }
            self.rf_xmit_long(data)
        }
    }

    fn rf_xmit_short(&self, data: &[u8], repeat: u16, offset: u16) -> Result<()> {
        let mut payload = Vec::with_capacity(6 + data.len());
        payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
        payload.extend_from_slice(&repeat.to_le_bytes());
        payload.extend_from_slice(&offset.to_le_bytes());
        payload.extend_from_slice(data);

        // waitLen = len(data) + repeat * (len(data) - offset)
        let wait_len = data.len() as u64
            + repeat as u64 * (data.len() as u64 - offset.min(data.len() as u16) as u64);
        let timeout = Duration::from_millis((wait_len / 255 + 1) * 1000);
        let resp = self.device.send(app::NIC, nic::XMIT, &payload, timeout)?;
        match resp.first() {
            Some(0) | Some(1) | Some(0x30) => Ok(()),
            Some(&other) => Err(Error::Device(DeviceErrorCode::from_byte(other))),
            None => Err(Error::Framing("empty NIC_XMIT response".into())),
        }
    }

    fn rf_xmit_long(&self, data: &[u8]) -> Result<()> {
        let chunks: Vec<&[u8]> = data.chunks(LONG_XMIT_CHUNK).collect();
        // Firmware preloads this many chunks before it starts draining the
        // queue.
        let preload = (SHORT_PACKET_MAX / LONG_XMIT_CHUNK).max(1).min(chunks.len());
        log::debug!("long xmit: {} chunks, firmware preload {preload}", chunks.len());

        // First message: NIC_LONG_XMIT, [len_lo, len_hi, preload_count, preloaded_chunk(s)...].
        let mut first_payload = Vec::new();
        first_payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
        first_payload.push(preload as u8);
        for chunk in &chunks[..preload] {
            first_payload.extend_from_slice(chunk);
        }
        self.send_long_chunk(nic::LONG_XMIT, &first_payload)?;

        // Remaining chunks: NIC_LONG_XMIT_MORE, [chunk_len, chunk...].
        for chunk in &chunks[preload..] {
            let mut payload = Vec::with_capacity(1 + chunk.len());
            payload.push(chunk.len() as u8);
            payload.extend_from_slice(chunk);
            self.send_long_chunk(nic::LONG_XMIT_MORE, &payload)?;
        }

        // A chunk_len == 0 frame signals completion.
        self.send_long_chunk(nic::LONG_XMIT_MORE, &[0])?;
        Ok(())
    }

    fn send_long_chunk(&self, cmd: u8, chunk: &[u8]) -> Result<()> {
        let mut retries = 0;
        loop {
            let resp = self.send(app::NIC, cmd, chunk)?;
            match resp.first() {
                Some(&BACKPRESSURE_BYTE) => {
                    retries += 1;
                    if retries > BACKPRESSURE_RETRIES {
                        return Err(Error::BackpressureExhausted(retries));
                    }
                    sleep(BACKPRESSURE_SLEEP);
                }
                Some(0) | Some(1) | Some(0x30) => return Ok(()),
                Some(&other) => return Err(Error::Device(DeviceErrorCode::from_byte(other))),
                None => return Err(Error::Framing("empty long xmit response".into())),
            }
        }
    }

    /// Receive one packet, waiting up to `timeout`. `blocksize` beyond 255
    /// bytes (up to [`MAX_RECV_BLOCK`]) requires a `NIC_SET_RECV_LARGE` call
    /// first so the firmware allocates a large enough buffer.
    pub fn rf_recv(&self, timeout: Duration, blocksize: u16) -> Result<Vec<u8>> {
        if blocksize as usize > SHORT_PACKET_MAX {
            if blocksize > MAX_RECV_BLOCK {
                return Err(Error::Config(format!(
                    "receive blocksize {blocksize} exceeds max {MAX_RECV_BLOCK}"
                )));
            }
            self.send(app::NIC, nic::SET_RECV_LARGE, &blocksize.to_le_bytes())?;
        }

        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        match self.device.send(app::NIC, nic::RECV, &timeout_ms.to_le_bytes(), timeout + Duration::from_millis(500)) {
            Ok(resp) => Ok(resp),
            Err(Error::Timeout) => {
                log::debug!("rf_recv timed out after {timeout:?} with no packet");
                Err(Error::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    /// Read `RSSI`, `LQI`, `MARCSTATE`, and `PKTSTATUS` after a receive.
    /// The high bit of `LQI` is a CRC-OK flag, not part of the
    /// link-quality value.
    pub fn read_diagnostics(&self) -> Result<RxDiagnostics> {
        let resp = self.send(app::SYSTEM, syscmd::PEEK, &peek_payload(0xDF36, 8))?;
        if resp.len() < 8 {
            return Err(Error::Framing("short status block peek response".into()));
        }
        let lqi_raw = resp[3];
        let rssi_raw = resp[4];
        let marcstate = RadioState::from_marcstate(resp[5]);
        let pktstatus = resp[6];
        Ok(RxDiagnostics {
            rssi_raw,
            lqi_raw,
            crc_ok: lqi_raw & 0x80 != 0,
            lqi: lqi_raw & 0x7F,
            marcstate,
            pktstatus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::transport::fake::FakeTransport;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            manufacturer: "test".into(),
            product: "test".into(),
            serial: "0".into(),
            bus: 1,
            address: 1,
        }
    }

    fn response_frame(app: u8, cmd: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x40, app, cmd];
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn short_xmit_accepts_success_status_byte() {
        let mut fake = FakeTransport::default();
        fake.push_read(response_frame(app::NIC, nic::XMIT, &[0x00]));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device);
        radio.rf_xmit(&[1, 2, 3], 0, 0).unwrap();
    }

    #[test]
    fn short_xmit_wire_format_matches_16_byte_packet_scenario() {
        let data = [
            0xAA, 0x00, 0x01, 0x55, b'T', b'E', b'S', b'T', b'1', b'2', b'3', b'4', 0, 0, 0, 0,
        ];
        let mut fake = FakeTransport::default();
        fake.push_read(response_frame(app::NIC, nic::XMIT, &[0x00]));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device.clone());
        radio.rf_xmit(&data, 0, 0).unwrap();

        let writes = device.written_frames();
        // [app, cmd, len_lo, len_hi, len_lo, len_hi, repeat_lo, repeat_hi, offset_lo, offset_hi, data...]
        let mut expected = vec![app::NIC, nic::XMIT];
        let command_payload_len = (6 + data.len()) as u16;
        expected.extend_from_slice(&command_payload_len.to_le_bytes());
        expected.extend_from_slice(&[0x10, 0x00, 0x00, 0x00, 0x00, 0x00]);
        expected.extend_from_slice(&data);
        assert_eq!(writes[0], expected);
    }

    #[test]
    fn short_xmit_rejects_unknown_status_byte() {
        let mut fake = FakeTransport::default();
        fake.push_read(response_frame(app::NIC, nic::XMIT, &[0xAB]));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device);
        let err = radio.rf_xmit(&[1, 2, 3], 0, 0).unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[test]
    fn long_xmit_frames_preload_chunks_then_signals_completion() {
        let data = vec![0xABu8; 300];
        let mut fake = FakeTransport::default();
        // One response per message: first chunk, remaining chunk, completion frame.
        fake.push_read(response_frame(app::NIC, nic::LONG_XMIT, &[0x00]));
        fake.push_read(response_frame(app::NIC, nic::LONG_XMIT_MORE, &[0x00]));
        fake.push_read(response_frame(app::NIC, nic::LONG_XMIT_MORE, &[0x00]));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device.clone());
        radio.rf_xmit(&data, 0, 0).unwrap();

        let writes = device.written_frames();
        assert_eq!(writes.len(), 3);

        // First message: NIC_LONG_XMIT, [len_lo, len_hi, preload_count=1, chunk0 (240 bytes)].
        assert_eq!(writes[0][0], app::NIC);
        assert_eq!(writes[0][1], nic::LONG_XMIT);
        let first_payload = &writes[0][4..];
        assert_eq!(&first_payload[0..2], &300u16.to_le_bytes());
        assert_eq!(first_payload[2], 1);
        assert_eq!(first_payload.len(), 3 + 240);

        // Second message: NIC_LONG_XMIT_MORE, [chunk_len=60, chunk1 (60 bytes)].
        assert_eq!(writes[1][1], nic::LONG_XMIT_MORE);
        let second_payload = &writes[1][4..];
        assert_eq!(second_payload[0], 60);
        assert_eq!(second_payload.len(), 1 + 60);

        // Completion frame: NIC_LONG_XMIT_MORE, [chunk_len=0].
        assert_eq!(writes[2][1], nic::LONG_XMIT_MORE);
        assert_eq!(&writes[2][4..], &[0]);
    }

    #[test]
    fn long_xmit_rejects_nonzero_repeat_offset() {
        let fake = FakeTransport::default();
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device);
        let data = vec![0u8; 300];
        let err = radio.rf_xmit(&data, 1, 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn ping_echoes_payload_byte_for_byte() {
        let payload = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03];
        let mut fake = FakeTransport::default();
        fake.push_read(response_frame(app::SYSTEM, syscmd::PING, &payload));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device);
        let echoed = radio.ping(&payload).unwrap();
        assert_eq!(echoed, payload);
    }

    #[test]
    fn read_all_registers_assembles_four_blocks() {
        let mut fake = FakeTransport::default();
        let block0 = [0xAAu8; BLOCK0_SIZE];
        let block1 = [0x11, 0x22, 0x33];
        let block2 = [1, 2, 3, 4, 5, 6, 7, 8, 0x29, 0x2E, 0x06];
        let block3 = [0x11, 0x04, 0x00, 0xFA, 0x52, 0x0D, 0x01, 0x00];
        fake.push_read(response_frame(app::SYSTEM, syscmd::PEEK, &block0));
        fake.push_read(response_frame(app::SYSTEM, syscmd::PEEK, &block1));
        fake.push_read(response_frame(app::SYSTEM, syscmd::PEEK, &block2));
        fake.push_read(response_frame(app::SYSTEM, syscmd::PEEK, &block3));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device);

        let map = radio.read_all_registers().unwrap();
        assert_eq!(map.SYNC1, 0xAA);
        assert_eq!(map.TEST2, 0x11);
        assert_eq!(map.PA_TABLE, [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(map.IOCFG0, 0x06);
        assert_eq!(map.PARTNUM, 0x11);
        assert_eq!(map.MARCSTATE, 0x0D);
    }

    #[test]
    fn write_all_registers_skips_status_block() {
        let mut fake = FakeTransport::default();
        fake.push_read(response_frame(app::SYSTEM, syscmd::POKE, &[0, 0]));
        fake.push_read(response_frame(app::SYSTEM, syscmd::POKE, &[0, 0]));
        fake.push_read(response_frame(app::SYSTEM, syscmd::POKE, &[0, 0]));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device.clone());

        let map = RegisterMap::default();
        radio.write_all_registers(&map).unwrap();

        let writes = device.written_frames();
        assert_eq!(writes.len(), 3);
        assert_eq!(&writes[0][4..6], &BLOCK0_ADDR.to_le_bytes());
        assert_eq!(&writes[1][4..6], &BLOCK1_ADDR.to_le_bytes());
        assert_eq!(&writes[2][4..6], &BLOCK2_ADDR.to_le_bytes());
    }

    #[test]
    fn diagnostics_split_lqi_crc_bit() {
        let mut fake = FakeTransport::default();
        // PARTNUM, VERSION, FREQEST, LQI, RSSI, MARCSTATE, PKTSTATUS, VCO_VC_DAC
        fake.push_read(response_frame(
            app::SYSTEM,
            syscmd::PEEK,
            &[0x11, 0x04, 0x00, 0xFA, 0x52, 0x0D, 0x01, 0x00],
        ));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let radio = RadioController::new(device);
        let diag = radio.read_diagnostics().unwrap();
        assert!(diag.crc_ok);
        assert_eq!(diag.lqi, 0x7A);
        assert_eq!(diag.rssi_raw, 0x52);
        assert_eq!(diag.marcstate, RadioState::Rx);
    }
}
