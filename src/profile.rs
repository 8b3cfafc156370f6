//! High-level radio parameters and the pure `Profile -> RegisterMap`
//! synthesizer.

use crate::error::{Error, Result};
use crate::registers::convert::{chanbw_to_reg, deviation_to_reg, drate_to_reg, freq_to_reg};
use crate::registers::RegisterMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Modulation {
    Fsk2,
    Gfsk,
    AskOok,
    Fsk4,
    Msk,
}

impl Modulation {
    fn mod_format_bits(self) -> u8 {
        match self {
            Self::Fsk2 => 0x00,
            Self::Gfsk => 0x01,
            Self::AskOok => 0x03,
            Self::Fsk4 => 0x04,
            Self::Msk => 0x07,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncMode {
    None,
    Check15of16,
    Check16of16,
    Check30of32,
    CarrierSenseOnly,
    CarrierAnd15of16,
    CarrierAnd16of16,
    CarrierAnd30of32,
}

impl SyncMode {
    fn bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Check15of16 => 1,
            Self::Check16of16 => 2,
            Self::Check30of32 => 3,
            Self::CarrierSenseOnly => 4,
            Self::CarrierAnd15of16 => 5,
            Self::CarrierAnd16of16 => 6,
            Self::CarrierAnd30of32 => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PacketLengthMode {
    Fixed,
    Variable,
    Infinite,
}

impl PacketLengthMode {
    fn bits(self) -> u8 {
        match self {
            Self::Fixed => 0,
            Self::Variable => 1,
            Self::Infinite => 2,
        }
    }
}

/// 3-bit preamble-count code. Unrecognized byte counts map
/// to the code for 8 bytes.
fn preamble_code(bytes: u8) -> u8 {
    match bytes {
        2 => 0,
        3 => 1,
        4 => 2,
        6 => 3,
        8 => 4,
        12 => 5,
        16 => 6,
        24 => 7,
        _ => 4,
    }
}

/// High-level radio configuration. Synthesized into a
/// [`RegisterMap`] by [`synthesize`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Profile {
    pub frequency_hz: u64,
    pub modulation: Modulation,
    pub data_rate_baud: f64,
    pub fsk_deviation_hz: Option<f64>,
    pub channel_bandwidth_hz: f64,
    pub manchester: bool,
    pub whitening: bool,
    pub sync_word: u16,
    pub sync_mode: SyncMode,
    pub packet_length_mode: PacketLengthMode,
    pub packet_length_byte: u8,
    pub preamble_bytes: u8,
    pub crc: bool,
    pub fec: bool,
    pub tx_power_dbm: i8,
}

impl Profile {
    fn validate(&self) -> Result<()> {
        if self.manchester && self.modulation == Modulation::Fsk4 {
            return Err(Error::Config(
                "Manchester encoding is incompatible with 4-FSK".into(),
            ));
        }
        if self.channel_bandwidth_hz <= 0.0 {
            return Err(Error::Config("channel bandwidth must be positive".into()));
        }
        if self.data_rate_baud <= 0.0 {
            return Err(Error::Config("data rate must be positive".into()));
        }
        if self.packet_length_mode == PacketLengthMode::Infinite && self.crc {
            log::warn!("infinite packet length mode typically disables CRC, but crc=true was requested");
        }
        Ok(())
    }
}

/// Crystal frequency used to derive register encodings; callers pick this
/// from the part number read off the device.
pub fn synthesize(profile: &Profile, fxtal: u32) -> Result<RegisterMap> {
    profile.validate()?;

    let mut r = RegisterMap {
        // Fixed defaults.
        FSCTRL1: 0x06,
        FSCTRL0: 0x00,
        FSCAL3: 0xE9,
        FSCAL1: 0x00,
        FSCAL0: 0x1F,
        AGCCTRL2: 0x03,
        AGCCTRL1: 0x40,
        AGCCTRL0: 0x91,
        FOCCFG: 0x16,
        BSCFG: 0x6C,
        MCSM0: 0x18,
        MCSM1: 0x00,
        MCSM2: 0x07,
        IOCFG2: 0x29,
        IOCFG1: 0x2E,
        IOCFG0: 0x06,
        ADDR: 0,
        CHANNR: 0,
        MDMCFG0: 0xF8,
        ..RegisterMap::default()
    };

    let (freq2, freq1, freq0) = freq_to_reg(profile.frequency_hz, fxtal);
    r.FREQ2 = freq2;
    r.FREQ1 = freq1;
    r.FREQ0 = freq0;

    let (drate_m, drate_e) = drate_to_reg(profile.data_rate_baud, fxtal)
        .ok_or_else(|| Error::Config(format!("data rate {} out of range", profile.data_rate_baud)))?;
    r.MDMCFG3 = drate_m;

    let (chanbw_m, chanbw_e) = chanbw_to_reg(profile.channel_bandwidth_hz, fxtal).ok_or_else(|| {
        Error::Config(format!(
            "channel bandwidth {} out of range",
            profile.channel_bandwidth_hz
        ))
    })?;
    r.MDMCFG4 = (chanbw_e << 6) | (chanbw_m << 4) | drate_e;

    r.SYNC1 = ((profile.sync_word >> 8) & 0xFF) as u8;
    r.SYNC0 = (profile.sync_word & 0xFF) as u8;

    r.MDMCFG2 = (profile.modulation.mod_format_bits() << 4)
        | profile.sync_mode.bits()
        | if profile.manchester { 0x08 } else { 0 };

    r.MDMCFG1 = (preamble_code(profile.preamble_bytes) << 4) | if profile.fec { 0x80 } else { 0 };

    // MSK's deviation is implicit from the data rate; the firmware derives
    // it internally, so DEVIATN is left at its reset value.
    if profile.modulation != Modulation::Msk {
        let deviation_hz = profile.fsk_deviation_hz.unwrap_or(0.0);
        r.DEVIATN = deviation_to_reg(deviation_hz, fxtal).unwrap_or(0);
    }

    let (length_mode_bits, pktlen) = match profile.packet_length_mode {
        PacketLengthMode::Infinite => (PacketLengthMode::Infinite.bits(), 0),
        mode => (mode.bits(), profile.packet_length_byte),
    };
    r.PKTLEN = pktlen;
    r.PKTCTRL0 = length_mode_bits
        | if profile.crc { 0x04 } else { 0 }
        | if profile.whitening { 0x40 } else { 0 };
    r.PKTCTRL1 = 0x04;

    let max_power = if profile.frequency_hz >= 464_000_000 { 0xC0 } else { 0xC2 };
    if profile.modulation == Modulation::AskOok {
        r.PA_TABLE[0] = 0x00;
        r.PA_TABLE[1] = max_power;
        r.FREND0 = 0x11;
    } else {
        r.PA_TABLE[0] = max_power;
        r.PA_TABLE[1] = 0x00;
        r.FREND0 = 0x10;
    }

    r.FREND1 = if profile.channel_bandwidth_hz > 102_000.0 { 0xB6 } else { 0x56 };

    let (test2, test1) = if profile.channel_bandwidth_hz > 325_000.0 {
        (0x88, 0x31)
    } else {
        (0x81, 0x35)
    };
    r.TEST2 = test2;
    r.TEST1 = test1;
    r.TEST0 = 0x09;

    let low_vco = profile.frequency_hz < 318_000_000
        || (391_000_000..424_000_000).contains(&profile.frequency_hz)
        || (782_000_000..848_000_000).contains(&profile.frequency_hz);
    r.FSCAL2 = if low_vco { 0x0A } else { 0x2A };

    Ok(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_profile() -> Profile {
        Profile {
            frequency_hz: 433_000_000,
            modulation: Modulation::Gfsk,
            data_rate_baud: 19_200.0,
            fsk_deviation_hz: Some(10_000.0),
            channel_bandwidth_hz: 100_000.0,
            manchester: false,
            whitening: false,
            sync_word: 0xD391,
            sync_mode: SyncMode::Check16of16,
            packet_length_mode: PacketLengthMode::Variable,
            packet_length_byte: 60,
            preamble_bytes: 4,
            crc: true,
            fec: false,
            tx_power_dbm: 10,
        }
    }

    #[test]
    fn scenario_433mhz_gfsk_19200_baud() {
        let r = synthesize(&base_profile(), 24_000_000).unwrap();
        assert_eq!(r.MDMCFG2, 0x12);
        assert_eq!(r.PKTCTRL0, 0x05);
        assert_eq!(r.PKTCTRL1, 0x04);
        assert_eq!(r.FREND1, 0x56);
        assert_eq!(r.TEST2, 0x81);
        assert_eq!(r.TEST1, 0x35);
        assert_eq!(r.TEST0, 0x09);
        assert_eq!(r.FSCAL2, 0x2A);
    }

    #[test]
    fn manchester_rejects_4fsk() {
        let mut p = base_profile();
        p.modulation = Modulation::Fsk4;
        p.manchester = true;
        assert!(matches!(synthesize(&p, 24_000_000), Err(Error::Config(_))));
    }

    #[test]
    fn infinite_mode_forces_pktlen_zero() {
        let mut p = base_profile();
        p.packet_length_mode = PacketLengthMode::Infinite;
        p.crc = false;
        let r = synthesize(&p, 24_000_000).unwrap();
        assert_eq!(r.PKTLEN, 0);
    }

    #[test]
    fn ask_ook_uses_inverted_pa_table_slots() {
        let mut p = base_profile();
        p.modulation = Modulation::AskOok;
        let r = synthesize(&p, 24_000_000).unwrap();
        assert_eq!(r.PA_TABLE[1], 0xC2);
        assert_eq!(r.PA_TABLE[0], 0x00);
        assert_eq!(r.FREND0, 0x11);
    }

    #[test]
    fn high_band_selects_low_power_byte() {
        let mut p = base_profile();
        p.frequency_hz = 868_000_000;
        let r = synthesize(&p, 24_000_000).unwrap();
        assert_eq!(r.PA_TABLE[0], 0xC0);
    }
}
