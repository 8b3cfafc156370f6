//! Frequency-hopping MAC controller, layered over the `NIC` application's
//! FHSS command family.

use std::sync::Arc;
use std::time::Duration;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::protocol::app;
use crate::transport::Transport;

/// FHSS command IDs within the `NIC` app, `0x10..=0x25`.
mod cmd {
    pub const SET_CHANNELS: u8 = 0x10;
    pub const NEXT_CHANNEL: u8 = 0x11;
    pub const CHANGE_CHANNEL: u8 = 0x12;
    pub const START_HOPPING: u8 = 0x13;
    pub const STOP_HOPPING: u8 = 0x14;
    pub const GET_STATE: u8 = 0x15;
    pub const SET_STATE: u8 = 0x16;
    pub const START_SYNC: u8 = 0x17;
    pub const GET_MAC_DATA: u8 = 0x18;
    pub const SET_MAC_THRESHOLD: u8 = 0x19;
    pub const SET_MAC_PERIOD: u8 = 0x1A;
    pub const XMIT: u8 = 0x1B;
}

/// Largest channel list `set_channels` accepts.
pub const MAX_CHANNELS: usize = 880;
/// Largest payload `xmit` accepts.
pub const MAX_XMIT_LEN: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MACState {
    NonHopping = 0,
    SyncMaster = 1,
    Synching = 2,
    Synched = 3,
}

impl MACState {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::NonHopping),
            1 => Ok(Self::SyncMaster),
            2 => Ok(Self::Synching),
            3 => Ok(Self::Synched),
            other => Err(Error::Framing(format!("unrecognized MAC state byte {other:#04x}"))),
        }
    }
}

/// Snapshot of the firmware's FHSS bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MACData {
    pub mac_state: MACState,
    pub tx_index_current: u16,
    pub tx_index_last_completed: u16,
    pub channel_index: u16,
    pub channel_count: u16,
    pub hop_count: u32,
    pub timer_at_last_hop: u32,
    pub scheduler_period: u16,
    pub scheduler_threshold: u32,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct FhssController<T: Transport> {
    device: Arc<Device<T>>,
}

impl<T: Transport> FhssController<T> {
    pub fn new(device: Arc<Device<T>>) -> Self {
        Self { device }
    }

    fn send(&self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
        self.device.send(app::NIC, cmd, payload, DEFAULT_TIMEOUT)
    }

    /// Program the hop set. `channels` is sent as
    /// `[count_lo, count_hi, channels...]`.
    pub fn set_channels(&self, channels: &[u8]) -> Result<()> {
        if channels.len() > MAX_CHANNELS {
            return Err(Error::Config(format!(
                "channel list of {} exceeds max {MAX_CHANNELS}",
                channels.len()
            )));
        }
        let mut payload = Vec::with_capacity(2 + channels.len());
        payload.extend_from_slice(&(channels.len() as u16).to_le_bytes());
        payload.extend_from_slice(channels);
        self.send(cmd::SET_CHANNELS, &payload)?;
        Ok(())
    }

    pub fn start_hopping(&self) -> Result<()> {
        self.send(cmd::START_HOPPING, &[])?;
        Ok(())
    }

    pub fn stop_hopping(&self) -> Result<()> {
        self.send(cmd::STOP_HOPPING, &[])?;
        Ok(())
    }

    /// Advance to the next channel in the hop sequence, returning the new
    /// channel index.
    pub fn next_channel(&self) -> Result<u16> {
        let resp = self.send(cmd::NEXT_CHANNEL, &[])?;
        read_u16(&resp, 0)
    }

    pub fn change_channel(&self, channel_index: u16) -> Result<()> {
        self.send(cmd::CHANGE_CHANNEL, &channel_index.to_le_bytes())?;
        Ok(())
    }

    pub fn get_state(&self) -> Result<MACState> {
        let resp = self.send(cmd::GET_STATE, &[])?;
        let byte = *resp.first().ok_or_else(|| Error::Framing("empty MAC state response".into()))?;
        MACState::from_byte(byte)
    }

    pub fn set_state(&self, state: MACState) -> Result<()> {
        self.send(cmd::SET_STATE, &[state as u8])?;
        Ok(())
    }

    pub fn start_sync(&self, cell_id: u16) -> Result<()> {
        self.send(cmd::START_SYNC, &cell_id.to_le_bytes())?;
        Ok(())
    }

    pub fn get_mac_data(&self) -> Result<MACData> {
        let resp = self.send(cmd::GET_MAC_DATA, &[])?;
        if resp.len() < 23 {
            return Err(Error::Framing(format!(
                "MAC data response too short: {} bytes",
                resp.len()
            )));
        }
        Ok(MACData {
            mac_state: MACState::from_byte(resp[0])?,
            tx_index_current: u16::from_le_bytes([resp[1], resp[2]]),
            tx_index_last_completed: u16::from_le_bytes([resp[3], resp[4]]),
            channel_index: u16::from_le_bytes([resp[5], resp[6]]),
            channel_count: u16::from_le_bytes([resp[7], resp[8]]),
            hop_count: u32::from_le_bytes([resp[9], resp[10], resp[11], resp[12]]),
            timer_at_last_hop: u32::from_le_bytes([resp[13], resp[14], resp[15], resp[16]]),
            scheduler_period: u16::from_le_bytes([resp[17], resp[18]]),
            scheduler_threshold: u32::from_le_bytes([resp[19], resp[20], resp[21], resp[22]]),
        })
    }

    pub fn set_mac_threshold(&self, threshold: u32) -> Result<()> {
        self.send(cmd::SET_MAC_THRESHOLD, &threshold.to_le_bytes())?;
        Ok(())
    }

    pub fn set_mac_period(&self, period: u16) -> Result<()> {
        self.send(cmd::SET_MAC_PERIOD, &period.to_le_bytes())?;
        Ok(())
    }

    /// Transmit one MAC-layer packet. Length-prefixed, max
    /// [`MAX_XMIT_LEN`] bytes.
    pub fn xmit(&self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_XMIT_LEN {
            return Err(Error::Config(format!(
                "FHSS xmit payload of {} exceeds max {MAX_XMIT_LEN}",
                data.len()
            )));
        }
        let mut payload = Vec::with_capacity(1 + data.len());
        payload.push(data.len() as u8);
        payload.extend_from_slice(data);
        self.send(cmd::XMIT, &payload)?;
        Ok(())
    }
}

fn read_u16(resp: &[u8], offset: usize) -> Result<u16> {
    let bytes = resp
        .get(offset..offset + 2)
        .ok_or_else(|| Error::Framing("response too short for u16 field".into()))?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::transport::fake::FakeTransport;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            manufacturer: "t".into(),
            product: "t".into(),
            serial: "0".into(),
            bus: 1,
            address: 1,
        }
    }

    fn response_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x40, app::NIC, cmd];
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn set_channels_rejects_oversized_list() {
        let device = Arc::new(Device::from_transport(identity(), FakeTransport::default()));
        let fhss = FhssController::new(device);
        let channels = vec![0u8; MAX_CHANNELS + 1];
        assert!(matches!(fhss.set_channels(&channels), Err(Error::Config(_))));
    }

    #[test]
    fn xmit_rejects_oversized_payload() {
        let device = Arc::new(Device::from_transport(identity(), FakeTransport::default()));
        let fhss = FhssController::new(device);
        let data = vec![0u8; MAX_XMIT_LEN + 1];
        assert!(matches!(fhss.xmit(&data), Err(Error::Config(_))));
    }

    #[test]
    fn get_state_decodes_synched() {
        let mut fake = FakeTransport::default();
        fake.push_read(response_frame(cmd::GET_STATE, &[3]));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let fhss = FhssController::new(device);
        assert_eq!(fhss.get_state().unwrap(), MACState::Synched);
    }

    #[test]
    fn next_channel_reads_new_index() {
        let mut fake = FakeTransport::default();
        fake.push_read(response_frame(cmd::NEXT_CHANNEL, &7u16.to_le_bytes()));
        let device = Arc::new(Device::from_transport(identity(), fake));
        let fhss = FhssController::new(device);
        assert_eq!(fhss.next_channel().unwrap(), 7);
    }
}
