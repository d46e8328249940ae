//! Per-flow accounting keyed by the 5-tuple.
//!
//! A flow and its reverse share one entry: the table looks for the reverse
//! key before the forward key, so replies fold into the entry created by the
//! first packet of the conversation.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::capture::record::PacketRecord;

const HTTPS_PORT: u16 = 443;

/// Identity of a flow as seen on its first packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl FlowKey {
    pub fn from_record(record: &PacketRecord) -> Self {
        Self {
            src_ip: record.src_ip,
            dst_ip: record.dst_ip,
            src_port: record.src_port,
            dst_port: record.dst_port,
            protocol: record.protocol,
        }
    }

    /// The same conversation seen from the other end.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

/// Formats as `src:dst:dport`, the opaque key published to subscribers.
impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            Ipv4Addr::from(self.src_ip),
            Ipv4Addr::from(self.dst_ip),
            self.dst_port
        )
    }
}

/// Direction heuristic attached to a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename = "down")]
    Unknown,
    #[serde(rename = "up")]
    Outbound,
    #[serde(rename = "bidi")]
    Bidirectional,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "down",
            Self::Outbound => "up",
            Self::Bidirectional => "bidi",
        }
    }
}

/// Counters and metadata for one flow.
#[derive(Debug, Clone)]
pub struct FlowState {
    pub key: FlowKey,
    pub bytes_total: u64,
    pub packets_total: u64,
    pub bytes_window: u64,
    pub packets_window: u64,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub direction: Direction,
    pub is_https: bool,
}

impl FlowState {
    fn new(key: FlowKey, now: Instant) -> Self {
        let direction = if key.src_port < key.dst_port {
            Direction::Outbound
        } else {
            Direction::Unknown
        };

        Self {
            key,
            bytes_total: 0,
            packets_total: 0,
            bytes_window: 0,
            packets_window: 0,
            first_seen: now,
            last_seen: now,
            direction,
            is_https: key.src_port == HTTPS_PORT || key.dst_port == HTTPS_PORT,
        }
    }

    fn add(&mut self, bytes: u64, now: Instant) {
        self.bytes_total += bytes;
        self.packets_total += 1;
        self.bytes_window += bytes;
        self.packets_window += 1;
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}

/// Summary of one ranked flow, serialized into `top_flows`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    pub key: String,
    pub bps: u64,
    /// Placeholder: no handshake timing exists in the capture path.
    #[serde(rename = "rtt")]
    pub rtt_ms: f32,
    /// Placeholder, see `rtt_ms`.
    #[serde(rename = "jitter")]
    pub jitter_ms: f32,
    #[serde(rename = "dir")]
    pub direction: Direction,
}

/// In-memory table of active flows.
pub struct FlowTable {
    flows: HashMap<FlowKey, FlowState>,
    idle_timeout: Duration,
    heavy_throughput_mbps: f64,
}

impl FlowTable {
    pub fn new(idle_timeout: Duration, heavy_throughput_mbps: f64) -> Self {
        Self {
            flows: HashMap::new(),
            idle_timeout,
            heavy_throughput_mbps,
        }
    }

    /// Folds one packet into its flow, creating the flow if needed.
    /// Records that carry no protocol and no classifier are ignored.
    pub fn update(&mut self, record: &PacketRecord) {
        if !record.is_classified() {
            return;
        }

        let key = FlowKey::from_record(record);
        let bytes = u64::from(record.wire_len);
        let now = record.timestamp;

        if let Some(flow) = self.flows.get_mut(&key.reversed()) {
            flow.add(bytes, now);
            // A self-addressed flow is its own reverse; that is not a reply.
            if key.reversed() != key {
                flow.direction = Direction::Bidirectional;
            }
            return;
        }

        self.flows
            .entry(key)
            .or_insert_with(|| FlowState::new(key, now))
            .add(bytes, now);
    }

    /// Removes flows idle for longer than the timeout. Returns how many.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.flows.len();
        let timeout = self.idle_timeout;
        self.flows
            .retain(|_, flow| now.saturating_duration_since(flow.last_seen) <= timeout);
        before - self.flows.len()
    }

    /// Up to `n` flows with traffic this window, highest byte count first.
    pub fn top_flows(&self, n: usize, window_seconds: f64) -> Vec<FlowSummary> {
        if n == 0 || !valid_window(window_seconds) {
            return Vec::new();
        }

        let mut candidates: Vec<&FlowState> = self
            .flows
            .values()
            .filter(|flow| flow.bytes_window > 0)
            .collect();

        let by_bytes_desc = |a: &&FlowState, b: &&FlowState| b.bytes_window.cmp(&a.bytes_window);
        if candidates.len() > n {
            candidates.select_nth_unstable_by(n - 1, by_bytes_desc);
            candidates.truncate(n);
        }
        candidates.sort_unstable_by(by_bytes_desc);

        candidates
            .into_iter()
            .map(|flow| FlowSummary {
                key: flow.key.to_string(),
                bps: (flow.bytes_window as f64 * 8.0 / window_seconds) as u64,
                rtt_ms: 0.0,
                jitter_ms: 0.0,
                direction: flow.direction,
            })
            .collect()
    }

    /// Windowed bits per second across all flows.
    pub fn total_bps(&self, window_seconds: f64) -> u64 {
        if !valid_window(window_seconds) {
            return 0;
        }
        let bytes: u64 = self.flows.values().map(|f| f.bytes_window).sum();
        (bytes as f64 * 8.0 / window_seconds) as u64
    }

    /// Windowed packets per second across all flows.
    pub fn total_pps(&self, window_seconds: f64) -> u32 {
        if !valid_window(window_seconds) {
            return 0;
        }
        let packets: u64 = self.flows.values().map(|f| f.packets_window).sum();
        (packets as f64 / window_seconds) as u32
    }

    /// Zeroes windowed counters, leaving lifetime counters and entries alone.
    pub fn reset_window_counters(&mut self) {
        for flow in self.flows.values_mut() {
            flow.bytes_window = 0;
            flow.packets_window = 0;
        }
    }

    /// Flows touching port 443 on either side.
    pub fn count_https(&self) -> u32 {
        self.flows.values().filter(|f| f.is_https).count() as u32
    }

    /// Flows whose window bytes exceed the heavy throughput threshold
    /// scaled to the window length.
    pub fn count_heavy_streams(&self, window_seconds: f64) -> u32 {
        if !valid_window(window_seconds) {
            return 0;
        }
        let threshold = self.heavy_throughput_mbps * 1_000_000.0 / 8.0 * window_seconds;
        self.flows
            .values()
            .filter(|f| f.bytes_window as f64 > threshold)
            .count() as u32
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.get(key)
    }

    /// Finds the entry for `key` under either orientation.
    pub fn lookup(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows
            .get(key)
            .or_else(|| self.flows.get(&key.reversed()))
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

fn valid_window(window_seconds: f64) -> bool {
    window_seconds.is_finite() && window_seconds > 0.0
}
