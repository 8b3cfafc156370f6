//! Error taxonomy for the driver.
//!
//! Mirrors the failure modes a caller actually needs to distinguish:
//! transport/framing failures are fatal for the in-flight operation,
//! timeouts and device error codes carry data a caller may act on, and
//! config errors are raised before any I/O is attempted.

use std::fmt;

/// Device-reported error codes returned in TX/RX response payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    /// `0xEC`: packet dropped.
    Dropped,
    /// `0xED`: generic device error.
    Error,
    /// `0xEE`: requested blocksize incompatible with current mode.
    BlocksizeIncompatible,
    /// `0xEF`: requested mode incompatible with current state.
    ModeIncompatible,
    /// `0xFF`: buffer size exceeded.
    BufferExceeded,
    /// Any other non-success byte the firmware returned.
    Unknown(u8),
}

impl DeviceErrorCode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0xEC => Self::Dropped,
            0xED => Self::Error,
            0xEE => Self::BlocksizeIncompatible,
            0xEF => Self::ModeIncompatible,
            0xFF => Self::BufferExceeded,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dropped => write!(f, "packet dropped (0xEC)"),
            Self::Error => write!(f, "device error (0xED)"),
            Self::BlocksizeIncompatible => write!(f, "blocksize incompatible (0xEE)"),
            Self::ModeIncompatible => write!(f, "mode incompatible (0xEF)"),
            Self::BufferExceeded => write!(f, "buffer exceeded (0xFF)"),
            Self::Unknown(b) => write!(f, "unknown device error code (0x{b:02X})"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bulk or control transfer I/O failure. Fatal for the current
    /// operation; the device handle itself remains usable.
    #[error("USB transport error: {0}")]
    Transport(#[from] rusb::Error),

    /// Short write, length overrun, or response-header underrun.
    /// Indicates the firmware protocol drifted from what this driver
    /// expects.
    #[error("framing error: {0}")]
    Framing(String),

    /// No matching response arrived before the deadline.
    #[error("timed out waiting for response")]
    Timeout,

    /// A response's `(app, cmd)` never matched the expected pair before
    /// the deadline elapsed.
    #[error("protocol mismatch: no response matched (app={expected_app:#04x}, cmd={expected_cmd:#04x})")]
    ProtocolMismatch { expected_app: u8, expected_cmd: u8 },

    /// The device returned one of the documented TX/RX error codes.
    #[error("device reported error: {0}")]
    Device(DeviceErrorCode),

    /// Long-TX backpressure (`0xFE`) was retried past its limit.
    #[error("long-transmit backpressure exhausted after {0} retries")]
    BackpressureExhausted(u32),

    /// Invalid parameter in a profile or scan config, raised before any
    /// I/O is attempted.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation issued in a state that disallows it.
    #[error("invalid state: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, Error>;
