//! Telemetry frame and its wire serialization.

use serde::Serialize;

use crate::flow::FlowSummary;

/// Version stamped into every frame and announced in the session hello.
pub const SCHEMA_VERSION: u32 = 1;

/// Upper bound on ranked flows carried by one frame.
pub const MAX_TOP_FLOWS: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetMetrics {
    pub bps: u64,
    pub pps: u32,
    pub active_flows: u32,
    pub latency_ms: f32,
    pub packet_loss: f32,
    pub error_rate: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtoCounters {
    pub arp: u32,
    pub dns: u32,
    pub udp_small: u32,
    pub https_flows: u32,
    pub heavy_streams: u32,
    pub rst: u32,
    pub icmp_unreach: u32,
    pub firewall_blocks: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthFields {
    pub capture_drop: u64,
    pub queue_fill: f32,
    pub sniffer_fps: f32,
}

/// Ranked flows, never more than [`MAX_TOP_FLOWS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TopFlows(Vec<FlowSummary>);

impl TopFlows {
    pub fn new() -> Self {
        Self(Vec::with_capacity(MAX_TOP_FLOWS))
    }

    /// Appends a flow, handing it back if the collection is full.
    pub fn push(&mut self, flow: FlowSummary) -> Result<(), FlowSummary> {
        if self.0.len() >= MAX_TOP_FLOWS {
            return Err(flow);
        }
        self.0.push(flow);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[FlowSummary] {
        &self.0
    }

    fn iter_mut(&mut self) -> std::slice::IterMut<'_, FlowSummary> {
        self.0.iter_mut()
    }
}

/// Keeps the first [`MAX_TOP_FLOWS`] items and discards the rest.
impl FromIterator<FlowSummary> for TopFlows {
    fn from_iter<I: IntoIterator<Item = FlowSummary>>(iter: I) -> Self {
        Self(iter.into_iter().take(MAX_TOP_FLOWS).collect())
    }
}

/// One snapshot per aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryFrame {
    #[serde(rename = "schema")]
    pub schema_version: u32,
    /// Seconds since the aggregator started.
    #[serde(rename = "t")]
    pub elapsed_seconds: f64,
    pub net: NetMetrics,
    pub proto: ProtoCounters,
    pub top_flows: TopFlows,
    pub health: HealthFields,
}

impl TelemetryFrame {
    pub fn new(elapsed_seconds: f64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            elapsed_seconds,
            net: NetMetrics::default(),
            proto: ProtoCounters::default(),
            top_flows: TopFlows::new(),
            health: HealthFields::default(),
        }
    }

    /// Replaces every NaN or infinite value with zero.
    pub fn sanitize(&mut self) {
        zero_if_non_finite64(&mut self.elapsed_seconds);
        zero_if_non_finite(&mut self.net.latency_ms);
        zero_if_non_finite(&mut self.net.packet_loss);
        zero_if_non_finite(&mut self.net.error_rate);
        zero_if_non_finite(&mut self.health.queue_fill);
        zero_if_non_finite(&mut self.health.sniffer_fps);
        for flow in self.top_flows.iter_mut() {
            zero_if_non_finite(&mut flow.rtt_ms);
            zero_if_non_finite(&mut flow.jitter_ms);
        }
    }

    /// Serializes to the single-line JSON text message sent to subscribers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn zero_if_non_finite(v: &mut f32) {
    if !v.is_finite() {
        *v = 0.0;
    }
}

fn zero_if_non_finite64(v: &mut f64) {
    if !v.is_finite() {
        *v = 0.0;
    }
}
