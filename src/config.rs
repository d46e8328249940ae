use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::aggregator::frame::MAX_TOP_FLOWS;

/// Top-level configuration for the sniffer.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Interface to capture on. Empty selects one automatically.
    #[serde(default)]
    pub interface: String,

    /// Packet capture configuration.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Window aggregation configuration.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Telemetry publisher configuration.
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,

    /// How often a status line is logged. Default: 10s.
    #[serde(default = "default_status_interval", with = "humantime_serde")]
    pub status_interval: Duration,
}

/// Packet capture configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Bytes captured per frame. Only headers are needed. Default: 96.
    #[serde(default = "default_snaplen")]
    pub snaplen: u16,

    /// Put the interface in promiscuous mode. Default: false.
    #[serde(default)]
    pub promiscuous: bool,

    /// Per-read poll timeout; bounds how long a stop request waits. Default: 10ms.
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Exchange buffer slots between capture and aggregation. Must be a
    /// power of two, at least 2. Default: 8192.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

/// Window aggregation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Window length, one frame per window. Default: 16666us (~60 per second).
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Idle time after which a flow is evicted. Default: 30s.
    #[serde(default = "default_flow_timeout", with = "humantime_serde")]
    pub flow_timeout: Duration,

    /// How often idle flows are swept. Default: 5s.
    #[serde(default = "default_expire_interval", with = "humantime_serde")]
    pub expire_interval: Duration,

    /// How often the exchange buffer fill ratio is sampled. Default: 1s.
    #[serde(default = "default_fill_sample_interval", with = "humantime_serde")]
    pub fill_sample_interval: Duration,

    /// Records drained from the exchange buffer per loop iteration. Default: 4096.
    #[serde(default = "default_max_drain_batch")]
    pub max_drain_batch: usize,

    /// Smoothing factor of the latency moving average. Default: 0.2.
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,

    /// Ceiling applied to the per-window latency sample. Default: 500.
    #[serde(default = "default_latency_ceiling_ms")]
    pub latency_ceiling_ms: f64,

    /// UDP frames at or below this wire length count as small. Default: 128.
    #[serde(default = "default_small_packet_threshold")]
    pub small_packet_threshold: u32,

    /// Throughput above which a flow counts as heavy. Default: 12.0.
    #[serde(default = "default_heavy_throughput_mbps")]
    pub heavy_throughput_mbps: f64,

    /// Ranked flows per frame, 1 to 8. Default: 8.
    #[serde(default = "default_top_flows")]
    pub top_flows: usize,
}

/// Telemetry publisher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// WebSocket listen address. Default: 127.0.0.1:9770.
    #[serde(default = "default_publisher_addr")]
    pub addr: SocketAddr,

    /// Server name announced in the session hello.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Frames queued per subscriber before new frames are dropped. Default: 64.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    /// Longest a single socket write may take before the session is closed.
    /// Default: 1s.
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics and /healthz. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address, ":port" binds all interfaces. Default: "127.0.0.1:9771".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_status_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_snaplen() -> u16 {
    96
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(10)
}

fn default_buffer_capacity() -> usize {
    crate::exchange::DEFAULT_CAPACITY
}

fn default_window() -> Duration {
    Duration::from_micros(16_666)
}

fn default_flow_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_expire_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_fill_sample_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_drain_batch() -> usize {
    4096
}

fn default_ewma_alpha() -> f64 {
    0.2
}

fn default_latency_ceiling_ms() -> f64 {
    500.0
}

fn default_small_packet_threshold() -> u32 {
    128
}

fn default_heavy_throughput_mbps() -> f64 {
    12.0
}

fn default_top_flows() -> usize {
    MAX_TOP_FLOWS
}

fn default_publisher_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9770))
}

fn default_server_name() -> String {
    "abyss-sniffer".to_string()
}

fn default_subscriber_queue() -> usize {
    64
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

fn default_health_addr() -> String {
    "127.0.0.1:9771".to_string()
}

// --- Default trait implementations ---

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: String::new(),
            capture: CaptureConfig::default(),
            aggregation: AggregationConfig::default(),
            publisher: PublisherConfig::default(),
            health: HealthConfig::default(),
            status_interval: default_status_interval(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: default_snaplen(),
            promiscuous: false,
            read_timeout: default_read_timeout(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            flow_timeout: default_flow_timeout(),
            expire_interval: default_expire_interval(),
            fill_sample_interval: default_fill_sample_interval(),
            max_drain_batch: default_max_drain_batch(),
            ewma_alpha: default_ewma_alpha(),
            latency_ceiling_ms: default_latency_ceiling_ms(),
            small_packet_threshold: default_small_packet_threshold(),
            heavy_throughput_mbps: default_heavy_throughput_mbps(),
            top_flows: default_top_flows(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            addr: default_publisher_addr(),
            server_name: default_server_name(),
            subscriber_queue: default_subscriber_queue(),
            send_timeout: default_send_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg = Self::from_yaml(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        // An empty document deserializes to unit, not an empty mapping.
        let cfg: Config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(data)?
        };

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        let cap = self.capture.buffer_capacity;
        if cap < 2 || !cap.is_power_of_two() {
            bail!("capture.buffer_capacity must be a power of two of at least 2, got {cap}");
        }

        if self.capture.snaplen < 64 {
            bail!(
                "capture.snaplen must be at least 64, got {}",
                self.capture.snaplen
            );
        }

        if self.capture.read_timeout.is_zero() {
            bail!("capture.read_timeout must be positive");
        }

        let agg = &self.aggregation;
        if agg.window.is_zero() {
            bail!("aggregation.window must be positive");
        }

        if agg.expire_interval.is_zero() {
            bail!("aggregation.expire_interval must be positive");
        }

        if agg.fill_sample_interval.is_zero() {
            bail!("aggregation.fill_sample_interval must be positive");
        }

        if agg.max_drain_batch == 0 {
            bail!("aggregation.max_drain_batch must be positive");
        }

        if !(agg.ewma_alpha > 0.0 && agg.ewma_alpha <= 1.0) {
            bail!(
                "aggregation.ewma_alpha must be in (0, 1], got {}",
                agg.ewma_alpha
            );
        }

        if !(agg.latency_ceiling_ms.is_finite() && agg.latency_ceiling_ms > 0.0) {
            bail!("aggregation.latency_ceiling_ms must be positive");
        }

        if !(agg.heavy_throughput_mbps.is_finite() && agg.heavy_throughput_mbps > 0.0) {
            bail!("aggregation.heavy_throughput_mbps must be positive");
        }

        if agg.top_flows == 0 || agg.top_flows > MAX_TOP_FLOWS {
            bail!(
                "aggregation.top_flows must be between 1 and {MAX_TOP_FLOWS}, got {}",
                agg.top_flows
            );
        }

        if self.publisher.addr.port() == 0 {
            bail!("publisher.addr must name a port between 1 and 65535");
        }

        if self.publisher.subscriber_queue == 0 {
            bail!("publisher.subscriber_queue must be positive");
        }

        if self.publisher.send_timeout.is_zero() {
            bail!("publisher.send_timeout must be positive");
        }

        if self.status_interval.is_zero() {
            bail!("status_interval must be positive");
        }

        Ok(())
    }
}
