//! Live libpcap session feeding parsed frames into a bounded channel

use super::parser::{parse_frame, ParsedFrame};
use crate::config::CaptureConfig;
use crate::error::{Result, WardenError};
use pcap::{Capture, Device};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read timeout so the capture thread notices cancellation while idle
const READ_TIMEOUT_MS: i32 = 500;

pub(super) fn start(
    config: &CaptureConfig,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ParsedFrame>> {
    let device = match &config.interface {
        Some(name) => Device::from(name.as_str()),
        None => Device::lookup()
            .map_err(|e| WardenError::Capture(format!("device lookup failed: {e}")))?
            .ok_or_else(|| WardenError::Capture("no default capture device".to_string()))?,
    };
    let name = device.name.clone();

    let mut cap = Capture::from_device(device)
        .map_err(|e| WardenError::Capture(format!("cannot open {name}: {e}")))?
        .promisc(true)
        .immediate_mode(true)
        .timeout(READ_TIMEOUT_MS)
        .open()
        .map_err(|e| WardenError::Capture(format!("cannot activate {name}: {e}")))?;

    cap.filter(&config.filter, true)
        .map_err(|e| WardenError::Capture(format!("bad filter {:?}: {e}", config.filter)))?;

    let (tx, rx) = mpsc::channel(config.channel_capacity);

    std::thread::Builder::new()
        .name("pcap-capture".to_string())
        .spawn(move || {
            info!("Capturing on {}", name);
            let mut dropped: u64 = 0;
            while !cancel.is_cancelled() {
                match cap.next_packet() {
                    Ok(packet) => match tx.try_send(parse_frame(packet.data)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            dropped += 1;
                            if dropped % 1000 == 1 {
                                debug!("Capture channel full, {} frames dropped so far", dropped);
                            }
                        }
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Err(pcap::Error::TimeoutExpired) => {}
                    Err(e) => {
                        warn!("Capture on {} stopped: {}", name, e);
                        break;
                    }
                }
            }
            info!("Capture on {} finished ({} frames dropped)", name, dropped);
        })?;

    Ok(rx)
}
