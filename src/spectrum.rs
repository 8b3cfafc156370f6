//! Firmware-driven spectrum analyzer: the dongle sweeps a channel bank in
//! hardware and streams RSSI frames back over a dedicated queue, rather
//! than the host driving one frequency at a time the way [`crate::scanner`]
//! does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::protocol::app;
use crate::transport::Transport;

/// Start/stop are `NIC` (`app=0x42`) commands; only the streamed frame
/// data itself comes back on the `SpecAn` application (`app=0x43`, queue
/// `0x01`). See spec §6's NIC/SpecAn command tables.
mod cmd {
    pub const SPECAN_START: u8 = 0x40;
    pub const SPECAN_STOP: u8 = 0x41;
    pub const GET_FRAME: u8 = 0x01;
}

/// One sweep's worth of RSSI samples across the configured channel bank.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp: Duration,
    pub base_freq_hz: u64,
    pub chan_spacing_hz: u64,
    pub rssi_dbm: Vec<f64>,
}

/// Converts one raw spectrum-analyzer byte to dBm. The firmware XORs the
/// sign bit before transmitting so the wire value sorts the same way as
/// signed RSSI bytes elsewhere in the protocol.
pub fn byte_to_dbm(raw: u8) -> f64 {
    (((raw ^ 0x80) as i8) as f64 / 2.0) - 88.0
}

#[derive(Debug, Clone, Copy)]
pub struct SpecAnConfig {
    pub center_hz: u64,
    pub bandwidth_hz: u64,
    pub num_channels: u8,
}

impl SpecAnConfig {
    fn base_freq_hz(&self) -> u64 {
        self.center_hz.saturating_sub(self.bandwidth_hz / 2)
    }

    fn chan_spacing_hz(&self) -> u64 {
        self.bandwidth_hz / self.num_channels as u64
    }
}

/// Handle to a running spectrum-analyzer sweep. Dropping this does not stop
/// the background thread; call [`SpecAn::stop`] explicitly.
pub struct SpecAn<T: Transport> {
    device: Arc<Device<T>>,
    config: SpecAnConfig,
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl<T: Transport> SpecAn<T>
where
    T: 'static,
{
    /// Validate and store a channel-bank configuration. `configure` does
    /// not talk to the device; [`SpecAn::start`] does.
    pub fn configure(device: Arc<Device<T>>, center_hz: u64, bandwidth_hz: u64, num_channels: u8) -> Result<Self> {
        if num_channels == 0 {
            return Err(Error::Config("spectrum analyzer needs at least one channel".into()));
        }
        Ok(Self {
            device,
            config: SpecAnConfig {
                center_hz,
                bandwidth_hz,
                num_channels,
            },
            running: None,
        })
    }

    /// Issue `SPECAN_START` and begin polling for frames on a background
    /// thread, publishing each decoded [`Frame`] to `sender`. Drops frames
    /// instead of blocking when `sender`'s channel is full.
    pub fn start(&mut self, sender: Sender<Frame>) -> Result<()>
    where
        T: Send,
    {
        self.device.send(
            app::NIC,
            cmd::SPECAN_START,
            &[self.config.num_channels],
            Duration::from_secs(1),
        )?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let config = self.config;
        let device = self.device.clone();

        let handle = std::thread::spawn(move || {
            let mut elapsed = Duration::ZERO;
            let tick = Duration::from_millis(20);
            while !stop_for_thread.load(Ordering::Relaxed) {
                match device.send(app::SPECAN, cmd::GET_FRAME, &[], tick) {
                    Ok(payload) if !payload.is_empty() => {
                        let rssi_dbm = payload.iter().map(|&b| byte_to_dbm(b)).collect();
                        let frame = Frame {
                            timestamp: elapsed,
                            base_freq_hz: config.base_freq_hz(),
                            chan_spacing_hz: config.chan_spacing_hz(),
                            rssi_dbm,
                        };
                        let _ = sender.try_send(frame);
                    }
                    Ok(_) => {}
                    Err(Error::Timeout) => {}
                    Err(e) => log::warn!("spectrum analyzer poll failed: {e}"),
                }
                elapsed += tick;
            }
        });

        self.running = Some((stop, handle));
        Ok(())
    }

    /// Issue `SPECAN_STOP` and join the background polling thread.
    pub fn stop(&mut self) -> Result<()> {
        if let Some((stop, handle)) = self.running.take() {
            stop.store(true, Ordering::Relaxed);
            let _ = handle.join();
        }
        self.device
            .send(app::NIC, cmd::SPECAN_STOP, &[], Duration::from_secs(1))?;
        Ok(())
    }
}
