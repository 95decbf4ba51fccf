//! Passive packet capture
//!
//! Live capture needs libpcap and is compiled only with the `pcap` cargo
//! feature. Frame parsing and the decision pipeline are always available.

#[cfg(feature = "pcap")]
mod live;
pub mod parser;
pub mod pipeline;

pub use parser::{extract_host_header, parse_frame, ParsedFrame};
pub use pipeline::PassivePipeline;

use crate::config::CaptureConfig;
use crate::error::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Start capturing on a dedicated thread. Frames that do not fit in the
/// channel are dropped so capture never backs up into the caller.
#[cfg(feature = "pcap")]
pub fn start_capture(
    config: &CaptureConfig,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ParsedFrame>> {
    live::start(config, cancel)
}

#[cfg(not(feature = "pcap"))]
pub fn start_capture(
    _config: &CaptureConfig,
    _cancel: CancellationToken,
) -> Result<mpsc::Receiver<ParsedFrame>> {
    Err(crate::error::WardenError::CaptureUnavailable(
        "built without the `pcap` feature".to_string(),
    ))
}
