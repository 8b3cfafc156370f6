//! Persisted device configuration: a saved [`Profile`] alongside the exact
//! register bytes it synthesized to, loaded and saved as JSON.
//!
//! On load, the register bytes are authoritative and the profile is kept
//! only as a human-readable hint of intent. A register written directly
//! by a caller (or hand-edited in the file) always wins over re-deriving
//! it from the profile.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::registers::RegisterMap;

/// One named register value, keyed by its datasheet mnemonic so the JSON
/// file reads the same way a register dump from the device would.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedConfig {
    pub profile: Profile,
    pub registers: RegisterMap,
    /// Unix timestamp (seconds) the configuration was saved at. Supplied
    /// by the caller at save time; this crate has no clock dependency of
    /// its own.
    pub saved_at: u64,
}

impl SavedConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref()).map_err(|e| Error::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Config(format!("parsing {}: {e}", path.as_ref().display())))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| Error::Config(format!("serializing config: {e}")))?;
        fs::write(path.as_ref(), bytes).map_err(|e| Error::Config(format!("writing {}: {e}", path.as_ref().display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Modulation, PacketLengthMode, SyncMode};

    fn sample_profile() -> Profile {
        Profile {
            frequency_hz: 433_920_000,
            modulation: Modulation::Gfsk,
            data_rate_baud: 38_400.0,
            fsk_deviation_hz: Some(20_000.0),
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
    fn round_trips_through_json() {
        let config = SavedConfig {
            profile: sample_profile(),
            registers: RegisterMap::default(),
            saved_at: 1_700_000_000,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SavedConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.profile, config.profile);
        assert_eq!(back.registers, config.registers);
        assert_eq!(back.saved_at, config.saved_at);
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = SavedConfig::load("/nonexistent/path/config.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
