//! Host driver and application library for a CC1111-class sub-GHz USB RF
//! transceiver dongle.
//!
//! The dongle exposes its radio core (shared with the CC1101/CC1110/CC2510
//! family) over a small USB command protocol instead of SPI. This crate
//! layers a typed register map, a profile synthesizer, a radio controller,
//! a frequency scanner, a firmware-driven spectrum analyzer, and an FHSS
//! MAC controller on top of that protocol.
//!
//! ```no_run
//! use cc1111::{Device, DeviceSelector, RadioController};
//! use std::sync::Arc;
//!
//! # fn main() -> cc1111::Result<()> {
//! let device = Arc::new(Device::open(&DeviceSelector::FirstAvailable)?);
//! let radio = RadioController::new(device);
//! radio.set_mode_idle()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod fhss;
pub mod profile;
pub mod protocol;
pub mod radio;
pub mod registers;
pub mod scanner;
pub mod spectrum;
pub mod transport;

pub use config::SavedConfig;
pub use device::{Device, DeviceIdentity, DeviceSelector};
pub use error::{DeviceErrorCode, Error, Result};
pub use fhss::{FhssController, MACData, MACState};
pub use profile::{Modulation, PacketLengthMode, Profile, SyncMode};
pub use radio::{RadioController, RfMode, RxDiagnostics};
pub use registers::{PartNumber, RadioState, RegisterMap};
pub use scanner::{
    AdaptiveSmoother, ScanConfig, ScanResult, Scanner, SignalInfo, SignalTracker, TrackerEvent,
};
pub use spectrum::{Frame as SpectrumFrame, SpecAn, SpecAnConfig};
pub use transport::{Transport, UsbTransport};
