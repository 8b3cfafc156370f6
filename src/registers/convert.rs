//! Pure, bit-exact unit conversions between physical radio parameters and
//! their register encodings. No I/O, no state. Every function here
//! round-trips to within its documented tolerance.

/// `FREQ = round(freq_hz * 65536 / Fxtal)`, split big-endian.
pub fn freq_to_reg(freq_hz: u64, fxtal: u32) -> (u8, u8, u8) {
    let raw = ((freq_hz as f64 * 65536.0) / fxtal as f64).round() as u32;
    let freq2 = ((raw >> 16) & 0xFF) as u8;
    let freq1 = ((raw >> 8) & 0xFF) as u8;
    let freq0 = (raw & 0xFF) as u8;
    (freq2, freq1, freq0)
}

/// Inverse of [`freq_to_reg`], to within one LSB of the original Hz value.
pub fn reg_to_freq(freq2: u8, freq1: u8, freq0: u8, fxtal: u32) -> u64 {
    let raw = ((freq2 as u32) << 16) | ((freq1 as u32) << 8) | freq0 as u32;
    ((raw as f64 * fxtal as f64) / 65536.0).round() as u64
}

/// Data rate: smallest `E` in `[0,15]` such that
/// `M = round(rate * 2^28 / (2^E * Fxtal) - 256)` lies in `[0,255]`.
/// Returns `(mantissa, exponent)`; mantissa goes in `MDMCFG3`, exponent in
/// `MDMCFG4[3:0]`.
pub fn drate_to_reg(rate: f64, fxtal: u32) -> Option<(u8, u8)> {
    for e in 0u32..=15 {
        let raw = (rate * 2f64.powi(28)) / (2f64.powi(e as i32) * fxtal as f64) - 256.0;
        let m = raw.round();
        if (0.0..=255.0).contains(&m) {
            return Some((m as u8, e as u8));
        }
    }
    None
}

pub fn drate_from_reg(mantissa: u8, exponent: u8, fxtal: u32) -> f64 {
    (256.0 + mantissa as f64) * 2f64.powi(exponent as i32) * fxtal as f64 / 2f64.powi(28)
}

/// Channel bandwidth: smallest `E` in `[0,3]` such that
/// `M = round(Fxtal / (bw * 2^E * 8) - 4)` lies in `[0,3]`.
/// Exponent goes in `MDMCFG4[7:6]`, mantissa in `MDMCFG4[5:4]`.
pub fn chanbw_to_reg(bandwidth_hz: f64, fxtal: u32) -> Option<(u8, u8)> {
    for e in 0u32..=3 {
        let raw = (fxtal as f64) / (bandwidth_hz * 2f64.powi(e as i32) * 8.0) - 4.0;
        let m = raw.round();
        if (0.0..=3.0).contains(&m) {
            return Some((m as u8, e as u8));
        }
    }
    None
}

pub fn chanbw_from_reg(mantissa: u8, exponent: u8, fxtal: u32) -> f64 {
    fxtal as f64 / ((4.0 + mantissa as f64) * 2f64.powi(exponent as i32) * 8.0)
}

/// FSK deviation: smallest `E` in `[0,7]` such that
/// `M = round(dev * 2^17 / (2^E * Fxtal) - 8)` lies in `[0,7]`.
/// Encoded into `DEVIATN = (E << 4) | M`.
pub fn deviation_to_reg(deviation_hz: f64, fxtal: u32) -> Option<u8> {
    for e in 0u32..=7 {
        let raw = (deviation_hz * 2f64.powi(17)) / (2f64.powi(e as i32) * fxtal as f64) - 8.0;
        let m = raw.round();
        if (0.0..=7.0).contains(&m) {
            return Some(((e as u8) << 4) | (m as u8));
        }
    }
    None
}

pub fn deviation_from_reg(deviatn: u8, fxtal: u32) -> f64 {
    let e = (deviatn >> 4) & 0x07;
    let m = deviatn & 0x0F;
    (8.0 + m as f64) * 2f64.powi(e as i32) * fxtal as f64 / 2f64.powi(17)
}

/// Channel spacing: brute-force search over `E` in `MDMCFG1[1:0]`
/// (`[0,3]`) and `M` in `MDMCFG0` (`[0,255]`), picking the pair that
/// minimizes absolute error to the target spacing. Unlike the other
/// conversions, this is an error-minimizing search, not a
/// smallest-exponent search.
pub fn chanspc_to_reg(spacing_hz: f64, fxtal: u32) -> (u8, u8) {
    let mut best = (0u8, 0u8);
    let mut best_err = f64::INFINITY;
    for e in 0u32..=3 {
        for m in 0u32..=255 {
            let candidate = chanspc_from_reg(m as u8, e as u8, fxtal);
            let err = (candidate - spacing_hz).abs();
            if err < best_err {
                best_err = err;
                best = (m as u8, e as u8);
            }
        }
    }
    best
}

pub fn chanspc_from_reg(mantissa: u8, exponent: u8, fxtal: u32) -> f64 {
    (fxtal as f64 / 2f64.powi(18)) * (256.0 + mantissa as f64) * 2f64.powi(exponent as i32)
}

/// RSSI raw byte to dBm. The sentinel `0x80` ("not valid")
/// is handled by the caller, which maps it to the universal invalid-RSSI
/// value used by the scanner. This function only implements the
/// two-sided signed conversion.
pub fn rssi_to_dbm(raw: u8) -> i16 {
    if raw >= 128 {
        raw as i16 - 256 - 74
    } else {
        raw as i16 - 74
    }
}

/// Sentinel raw RSSI value meaning "not valid".
pub const RSSI_INVALID_RAW: u8 = 0x80;
/// Value the scanner reports for an invalid RSSI reading.
pub const RSSI_INVALID_DBM: i16 = -200;

pub fn rssi_to_dbm_checked(raw: u8) -> i16 {
    if raw == RSSI_INVALID_RAW {
        RSSI_INVALID_DBM
    } else {
        rssi_to_dbm(raw)
    }
}
