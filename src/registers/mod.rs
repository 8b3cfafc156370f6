//! Typed view of the memory-mapped radio registers, strobe commands, and
//! the bit-exact unit conversions between physical units (Hz, baud, dBm)
//! and their register encodings.
//!
//! Register naming and the strobe set follow the CC1101/CC1111 radio
//! core's own layout: the CC1111's radio is the same family as the
//! CC1101, just addressed over USB peek/poke commands here instead of
//! SPI transfers.

pub mod convert;

use crate::error::{Error, Result};

/// Base address of the memory-mapped register window.
pub const REGISTER_BASE: u16 = 0xDF00;
/// Strobe target register.
pub const RFST: u16 = 0xDFE1;

/// Crystal frequency in Hz for the two supported part families.
pub const FXTAL_CC11XX: u32 = 24_000_000;
pub const FXTAL_CC25XX: u32 = 26_000_000;

/// Command strobes, written to [`RFST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Strobe {
    SFSTXON = 0,
    SCAL = 1,
    SRX = 2,
    STX = 3,
    SIDLE = 4,
    SNOP = 5,
}

/// Radio part number, read from the `PARTNUM` status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartNumber {
    Cc1110,
    Cc1111,
    Cc2510,
    Cc2511,
    Unknown(u8),
}

impl PartNumber {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Self::Cc1110,
            0x11 => Self::Cc1111,
            0x81 => Self::Cc2510,
            0x91 => Self::Cc2511,
            other => Self::Unknown(other),
        }
    }

    /// Crystal frequency for this part family.
    pub fn fxtal(self) -> u32 {
        match self {
            Self::Cc1110 | Self::Cc1111 => FXTAL_CC11XX,
            Self::Cc2510 | Self::Cc2511 => FXTAL_CC25XX,
            Self::Unknown(_) => FXTAL_CC11XX,
        }
    }
}

/// Radio state machine, decoded from the low 5 bits of `MARCSTATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Sleep,
    Idle,
    Xoff,
    VcoonMc,
    RegonMc,
    Mancal,
    Vcoon,
    Regon,
    Startcal,
    Bwboost,
    FsLock,
    Ifadcon,
    Endcal,
    Rx,
    RxEnd,
    RxRst,
    TxrxSwitch,
    RxfifoOverflow,
    Fstxon,
    Tx,
    TxEnd,
    RxtxSwitch,
    TxfifoUnderflow,
}

impl RadioState {
    /// Decode the low 5 bits of a `MARCSTATE` read. Any value in
    /// `0x00..=0x16` is defined; bits 5+ are masked off first, so higher
    /// raw byte values still decode sensibly.
    pub fn from_marcstate(raw: u8) -> Self {
        match raw & 0x1F {
            0x00 => Self::Sleep,
            0x01 => Self::Idle,
            0x02 => Self::Xoff,
            0x03 => Self::VcoonMc,
            0x04 => Self::RegonMc,
            0x05 => Self::Mancal,
            0x06 => Self::Vcoon,
            0x07 => Self::Regon,
            0x08 => Self::Startcal,
            0x09 => Self::Bwboost,
            0x0A => Self::FsLock,
            0x0B => Self::Ifadcon,
            0x0C => Self::Endcal,
            0x0D => Self::Rx,
            0x0E => Self::RxEnd,
            0x0F => Self::RxRst,
            0x10 => Self::TxrxSwitch,
            0x11 => Self::RxfifoOverflow,
            0x12 => Self::Fstxon,
            0x13 => Self::Tx,
            0x14 => Self::TxEnd,
            0x15 => Self::RxtxSwitch,
            0x16 => Self::TxfifoUnderflow,
            // 0x17..=0x1F are unassigned in the datasheet; treat as Sleep
            // rather than panicking, since a caller polling MARCSTATE must
            // never crash on a transient/reserved value.
            _ => Self::Sleep,
        }
    }

    /// True for the three settled states; all others are transient.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Rx | Self::Tx)
    }
}

/// The full register map, addresses `0xDF00..=0xDF1F`, `0xDF23..=0xDF25`,
/// `0xDF27..=0xDF31`, and the status block `0xDF36..=0xDF3D`.
///
/// Field order here is logical (datasheet mnemonic order, PA table ascending
/// by index), not on-wire address order. [`RegisterMap::to_block0`] and
/// friends handle the translation, including the PA table's reversed
/// on-device storage.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[allow(non_snake_case)]
pub struct RegisterMap {
    pub SYNC1: u8,
    pub SYNC0: u8,
    pub PKTLEN: u8,
    pub PKTCTRL1: u8,
    pub PKTCTRL0: u8,
    pub ADDR: u8,
    pub CHANNR: u8,
    pub FSCTRL1: u8,
    pub FSCTRL0: u8,
    pub FREQ2: u8,
    pub FREQ1: u8,
    pub FREQ0: u8,
    pub MDMCFG4: u8,
    pub MDMCFG3: u8,
    pub MDMCFG2: u8,
    pub MDMCFG1: u8,
    pub MDMCFG0: u8,
    pub DEVIATN: u8,
    pub MCSM2: u8,
    pub MCSM1: u8,
    pub MCSM0: u8,
    pub FOCCFG: u8,
    pub BSCFG: u8,
    pub AGCCTRL2: u8,
    pub AGCCTRL1: u8,
    pub AGCCTRL0: u8,
    pub FREND1: u8,
    pub FREND0: u8,
    pub FSCAL3: u8,
    pub FSCAL2: u8,
    pub FSCAL1: u8,
    pub FSCAL0: u8,

    pub TEST2: u8,
    pub TEST1: u8,
    pub TEST0: u8,

    /// Power-amplifier table, logical index order: index 0 is the
    /// lowest-address register (`0xDF2E`), index 7 is `0xDF27`.
    pub PA_TABLE: [u8; 8],
    pub IOCFG2: u8,
    pub IOCFG1: u8,
    pub IOCFG0: u8,

    // Status registers (read-only; see `is_status_register`).
    pub PARTNUM: u8,
    pub VERSION: u8,
    pub FREQEST: u8,
    pub LQI: u8,
    pub RSSI: u8,
    pub MARCSTATE: u8,
    pub PKTSTATUS: u8,
    pub VCO_VC_DAC: u8,
}

/// Block start addresses and sizes used by `read_all_registers` /
/// `write_all_registers` to minimize USB round-trips.
pub const BLOCK0_ADDR: u16 = REGISTER_BASE; // 0xDF00, size 32
pub const BLOCK0_SIZE: usize = 32;
pub const BLOCK1_ADDR: u16 = 0xDF23; // size 3 (TEST2..TEST0)
pub const BLOCK1_SIZE: usize = 3;
pub const BLOCK2_ADDR: u16 = 0xDF27; // size 11 (PA table + GPIO cfg)
pub const BLOCK2_SIZE: usize = 11;
pub const BLOCK3_ADDR: u16 = 0xDF36; // size 8, status registers
pub const BLOCK3_SIZE: usize = 8;

/// True for addresses in the read-only status block; writes to these
/// must be skipped by `write_all_registers`.
pub fn is_status_address(addr: u16) -> bool {
    (BLOCK3_ADDR..BLOCK3_ADDR + BLOCK3_SIZE as u16).contains(&addr)
}

impl RegisterMap {
    pub fn to_block0(self) -> [u8; BLOCK0_SIZE] {
        [
            self.SYNC1, self.SYNC0, self.PKTLEN, self.PKTCTRL1, self.PKTCTRL0, self.ADDR,
            self.CHANNR, self.FSCTRL1, self.FSCTRL0, self.FREQ2, self.FREQ1, self.FREQ0,
            self.MDMCFG4, self.MDMCFG3, self.MDMCFG2, self.MDMCFG1, self.MDMCFG0, self.DEVIATN,
            self.MCSM2, self.MCSM1, self.MCSM0, self.FOCCFG, self.BSCFG, self.AGCCTRL2,
            self.AGCCTRL1, self.AGCCTRL0, self.FREND1, self.FREND0, self.FSCAL3, self.FSCAL2,
            self.FSCAL1, self.FSCAL0,
        ]
    }

    pub fn from_block0(bytes: &[u8; BLOCK0_SIZE]) -> Self {
        let mut r = RegisterMap::default();
        r.SYNC1 = bytes[0];
        r.SYNC0 = bytes[1];
        r.PKTLEN = bytes[2];
        r.PKTCTRL1 = bytes[3];
        r.PKTCTRL0 = bytes[4];
        r.ADDR = bytes[5];
        r.CHANNR = bytes[6];
        r.FSCTRL1 = bytes[7];
        r.FSCTRL0 = bytes[8];
        r.FREQ2 = bytes[9];
        r.FREQ1 = bytes[10];
        r.FREQ0 = bytes[11];
        r.MDMCFG4 = bytes[12];
        r.MDMCFG3 = bytes[13];
        r.MDMCFG2 = bytes[14];
        r.MDMCFG1 = bytes[15];
        r.MDMCFG0 = bytes[16];
        r.DEVIATN = bytes[17];
        r.MCSM2 = bytes[18];
        r.MCSM1 = bytes[19];
        r.MCSM0 = bytes[20];
        r.FOCCFG = bytes[21];
        r.BSCFG = bytes[22];
        r.AGCCTRL2 = bytes[23];
        r.AGCCTRL1 = bytes[24];
        r.AGCCTRL0 = bytes[25];
        r.FREND1 = bytes[26];
        r.FREND0 = bytes[27];
        r.FSCAL3 = bytes[28];
        r.FSCAL2 = bytes[29];
        r.FSCAL1 = bytes[30];
        r.FSCAL0 = bytes[31];
        r
    }

    pub fn to_block1(self) -> [u8; BLOCK1_SIZE] {
        [self.TEST2, self.TEST1, self.TEST0]
    }

    pub fn merge_block1(&mut self, bytes: &[u8; BLOCK1_SIZE]) {
        self.TEST2 = bytes[0];
        self.TEST1 = bytes[1];
        self.TEST0 = bytes[2];
    }

    /// PA table is stored on-device in address-descending order: byte 0 of
    /// this block (address `0xDF27`) is logical index 7, byte 7 (address
    /// `0xDF2E`) is logical index 0.
    pub fn to_block2(self) -> [u8; BLOCK2_SIZE] {
        let mut out = [0u8; BLOCK2_SIZE];
        for i in 0..8 {
            out[i] = self.PA_TABLE[7 - i];
        }
        out[8] = self.IOCFG2;
        out[9] = self.IOCFG1;
        out[10] = self.IOCFG0;
        out
    }

    pub fn merge_block2(&mut self, bytes: &[u8; BLOCK2_SIZE]) {
        for i in 0..8 {
            self.PA_TABLE[7 - i] = bytes[i];
        }
        self.IOCFG2 = bytes[8];
        self.IOCFG1 = bytes[9];
        self.IOCFG0 = bytes[10];
    }

    pub fn merge_block3(&mut self, bytes: &[u8; BLOCK3_SIZE]) {
        self.PARTNUM = bytes[0];
        self.VERSION = bytes[1];
        self.FREQEST = bytes[2];
        self.LQI = bytes[3];
        self.RSSI = bytes[4];
        self.MARCSTATE = bytes[5];
        self.PKTSTATUS = bytes[6];
        self.VCO_VC_DAC = bytes[7];
    }
}

/// `System` application peek/poke command IDs.
pub mod syscmd {
    pub const PEEK: u8 = 0x80;
    pub const POKE: u8 = 0x81;
    pub const PING: u8 = 0x82;
    pub const STATUS: u8 = 0x83;
    pub const POKE_REG: u8 = 0x84;
    pub const GET_CLOCK: u8 = 0x85;
    pub const BUILD_TYPE: u8 = 0x86;
    pub const BOOTLOADER: u8 = 0x87;
    pub const RF_MODE: u8 = 0x88;
    pub const COMPILER: u8 = 0x89;
    pub const PART_NUM: u8 = 0x8E;
    pub const RESET: u8 = 0x8F;
    pub const CLEAR_CODES: u8 = 0x90;
    pub const SERIAL_NUMBER: u8 = 0x91;
    pub const LED_MODE: u8 = 0x93;
}

/// Peek `count` bytes starting at `addr` via the `System` app's peek
/// command: payload is `[len:u16 LE][addr:u16 LE]`.
pub fn peek_payload(addr: u16, count: u16) -> Vec<u8> {
    let mut p = Vec::with_capacity(4);
    p.extend_from_slice(&count.to_le_bytes());
    p.extend_from_slice(&addr.to_le_bytes());
    p
}

/// Poke `data` starting at `addr`: payload is `[addr:u16 LE][data...]`.
/// The response's first two bytes are a "bytes left" count; non-zero means
/// the write did not fully complete.
pub fn poke_payload(addr: u16, data: &[u8]) -> Vec<u8> {
    let mut p = Vec::with_capacity(2 + data.len());
    p.extend_from_slice(&addr.to_le_bytes());
    p.extend_from_slice(data);
    p
}

pub fn check_poke_response(response: &[u8]) -> Result<()> {
    if response.len() < 2 {
        return Err(Error::Framing("poke response shorter than 2 bytes".into()));
    }
    let bytes_left = u16::from_le_bytes([response[0], response[1]]);
    if bytes_left != 0 {
        return Err(Error::Framing(format!(
            "incomplete poke: {bytes_left} bytes left unwritten"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marcstate_masks_high_bits() {
        assert_eq!(RadioState::from_marcstate(0x01), RadioState::Idle);
        assert_eq!(RadioState::from_marcstate(0x01 | 0x20), RadioState::Idle);
        assert_eq!(RadioState::from_marcstate(0x0D | 0xE0), RadioState::Rx);
    }

    #[test]
    fn settled_states() {
        assert!(RadioState::Idle.is_settled());
        assert!(RadioState::Rx.is_settled());
        assert!(RadioState::Tx.is_settled());
        assert!(!RadioState::Vcoon.is_settled());
    }

    #[test]
    fn pa_table_round_trips_through_reversed_block() {
        let mut map = RegisterMap::default();
        map.PA_TABLE = [1, 2, 3, 4, 5, 6, 7, 8];
        map.IOCFG2 = 0x29;
        map.IOCFG1 = 0x2E;
        map.IOCFG0 = 0x06;

        let block = map.to_block2();
        // index 7 (value 8) is stored first, at the lowest offset (0xDF27).
        assert_eq!(block[0], 8);
        assert_eq!(block[7], 1);
        assert_eq!(&block[8..11], &[0x29, 0x2E, 0x06]);

        let mut round_tripped = RegisterMap::default();
        round_tripped.merge_block2(&block);
        assert_eq!(round_tripped.PA_TABLE, map.PA_TABLE);
        assert_eq!(round_tripped.IOCFG2, map.IOCFG2);
    }

    #[test]
    fn block0_round_trips() {
        let mut map = RegisterMap::default();
        map.SYNC1 = 0xD3;
        map.SYNC0 = 0x91;
        map.FREQ2 = 0x12;
        map.FREQ1 = 0x16;
        map.FREQ0 = 0x14;
        let block = map.to_block0();
        let round_tripped = RegisterMap::from_block0(&block);
        assert_eq!(round_tripped, map);
    }

    #[test]
    fn status_block_is_read_only() {
        assert!(is_status_address(0xDF39));
        assert!(!is_status_address(0xDF1F));
    }
}
