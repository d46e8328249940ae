pub mod iface;
pub mod parse;
pub mod record;
pub mod stats;

#[cfg(feature = "pcap")]
pub mod pcap;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::CaptureConfig;
use crate::exchange::Producer;
use crate::lifecycle::{Lifecycle, LifecycleError};

use self::iface::NetworkInterface;
use self::parse::parse_frame;
use self::record::{LinkType, PacketRecord};
use self::stats::CaptureStats;

/// How often the capture layer's drop counter is refreshed while frames flow.
const DROP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum spacing between two logged read errors.
const READ_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Errors raised by capture sources.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no capture interface found")]
    NoInterface,

    #[error("opening interface {name}: {reason}")]
    Open { name: String, reason: String },

    #[error("unsupported link type {dlt} on {name}")]
    UnsupportedLink { name: String, dlt: i32 },

    #[error("listing interfaces: {0}")]
    List(String),

    #[error("reading frame: {0}")]
    Read(String),

    #[error("capture source exhausted")]
    Exhausted,

    #[error("live capture is not available in this build (enable the `pcap` feature)")]
    Unsupported,
}

/// One frame as handed over by a capture source.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Captured bytes, at most the snap length.
    pub data: &'a [u8],
    /// Original frame length on the wire.
    pub wire_len: u32,
}

/// A source of raw link-layer frames.
pub trait FrameSource: Send {
    /// Framing of every frame this source yields.
    fn link_type(&self) -> LinkType;

    /// Returns the next frame, `Ok(None)` when the poll timed out, or
    /// [`CaptureError::Exhausted`] when no more frames will arrive.
    fn next_frame(&mut self) -> Result<Option<RawFrame<'_>>, CaptureError>;

    /// Cumulative frames dropped by the capture layer, if it reports them.
    fn dropped(&mut self) -> Option<u64> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn link_type(&self) -> LinkType {
        (**self).link_type()
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame<'_>>, CaptureError> {
        (**self).next_frame()
    }

    fn dropped(&mut self) -> Option<u64> {
        (**self).dropped()
    }
}

/// Lists the interfaces available for capture.
pub fn list_interfaces() -> Result<Vec<NetworkInterface>, CaptureError> {
    #[cfg(feature = "pcap")]
    {
        self::pcap::list_interfaces()
    }

    #[cfg(not(feature = "pcap"))]
    {
        Err(CaptureError::Unsupported)
    }
}

/// Returns `requested` if set, otherwise auto-selects an interface.
pub fn resolve_interface(requested: &str) -> Result<String, CaptureError> {
    if !requested.is_empty() {
        return Ok(requested.to_string());
    }

    let interfaces = list_interfaces()?;
    iface::select_interface(&interfaces)
        .map(|i| i.name.clone())
        .ok_or(CaptureError::NoInterface)
}

/// Opens a live capture on `name`.
pub fn open_live(name: &str, cfg: &CaptureConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    #[cfg(feature = "pcap")]
    {
        Ok(Box::new(self::pcap::LiveSource::open(name, cfg)?))
    }

    #[cfg(not(feature = "pcap"))]
    {
        let _ = (name, cfg);
        Err(CaptureError::Unsupported)
    }
}

enum Polled {
    Frame,
    Timeout,
    Failed(CaptureError),
}

/// Packet pump: reads frames from a source, parses them, and pushes the
/// records into the exchange buffer.
///
/// Cloning yields another handle onto the same pump, which is how the
/// orchestrator stops a pump running on another thread.
#[derive(Clone)]
pub struct CaptureEngine {
    lifecycle: Arc<Lifecycle>,
    stats: Arc<CaptureStats>,
    read_timeout: Duration,
}

impl CaptureEngine {
    pub fn new() -> Self {
        Self::with_read_timeout(CaptureConfig::default().read_timeout)
    }

    /// Creates a pump that backs off for `read_timeout` after a failed read.
    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new("capture")),
            stats: Arc::new(CaptureStats::new()),
            read_timeout,
        }
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Asks the pump to exit. It notices within one read timeout; a pump
    /// that has not started yet exits as soon as it does.
    pub fn stop(&self) -> bool {
        self.lifecycle.request_stop()
    }

    /// Forgets a stop request no pump consumed.
    pub fn withdraw_stop(&self) {
        self.lifecycle.withdraw_stop();
    }

    /// Runs the pump on the calling thread until stopped or the source is
    /// exhausted. Read errors are logged and the pump keeps polling after
    /// one read timeout.
    pub fn run<S: FrameSource>(
        &self,
        mut source: S,
        mut producer: Producer<PacketRecord>,
    ) -> Result<(), LifecycleError> {
        self.lifecycle.start()?;

        let link = source.link_type();
        tracing::info!(link = %link, "capture started");

        let mut last_drop_poll = Instant::now();
        let mut last_error_log: Option<Instant> = None;
        let mut suppressed_errors = 0u64;

        while self.lifecycle.is_running() {
            let polled = match source.next_frame() {
                Ok(Some(frame)) => {
                    let (record, outcome) =
                        parse_frame(link, frame.data, frame.wire_len, Instant::now());
                    producer.push(record);
                    self.stats.record_frame(outcome);
                    Polled::Frame
                }
                Ok(None) => Polled::Timeout,
                Err(e) => Polled::Failed(e),
            };

            match polled {
                Polled::Frame => {
                    if last_drop_poll.elapsed() >= DROP_POLL_INTERVAL {
                        self.refresh_dropped(&mut source);
                        last_drop_poll = Instant::now();
                    }
                }
                Polled::Timeout => {
                    self.refresh_dropped(&mut source);
                    last_drop_poll = Instant::now();
                }
                Polled::Failed(CaptureError::Exhausted) => {
                    tracing::info!("capture source exhausted");
                    break;
                }
                Polled::Failed(e) => {
                    self.stats.record_read_error();
                    let due = last_error_log.map_or(true, |t| t.elapsed() >= READ_ERROR_LOG_INTERVAL);
                    if due {
                        tracing::warn!(
                            error = %e,
                            suppressed = suppressed_errors,
                            "capture read failed",
                        );
                        last_error_log = Some(Instant::now());
                        suppressed_errors = 0;
                    } else {
                        suppressed_errors += 1;
                    }
                    std::thread::sleep(self.read_timeout);
                }
            }
        }

        self.refresh_dropped(&mut source);
        self.lifecycle.finish();

        let snap = self.stats.snapshot();
        tracing::info!(
            captured = snap.captured,
            partial = snap.partial,
            dropped = snap.dropped,
            "capture stopped",
        );

        Ok(())
    }

    fn refresh_dropped<S: FrameSource>(&self, source: &mut S) {
        if let Some(dropped) = source.dropped() {
            self.stats.set_dropped(dropped);
        }
    }
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::new()
    }
}
