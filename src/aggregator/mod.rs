//! Window aggregation: drains the exchange buffer, feeds the flow table,
//! and emits one [`TelemetryFrame`] per window.

pub mod frame;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::record::{PacketRecord, IPPROTO_UDP};
use crate::config::AggregationConfig;
use crate::exchange::Consumer;
use crate::flow::FlowTable;
use crate::lifecycle::{Lifecycle, LifecycleError};

use self::frame::{TelemetryFrame, TopFlows, MAX_TOP_FLOWS};

const MIN_IDLE_SLEEP: Duration = Duration::from_millis(1);
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(8);

/// Callback invoked with every completed frame, on the aggregator thread.
pub type FrameHandler = Box<dyn FnMut(&TelemetryFrame) + Send>;

/// Protocol counters accumulated over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounters {
    pub packets: u64,
    pub bytes: u64,
    pub arp: u32,
    pub dns: u32,
    pub udp_small: u32,
    pub rst: u32,
    pub icmp_unreach: u32,
}

impl WindowCounters {
    fn record(&mut self, record: &PacketRecord, small_packet_threshold: u32) {
        self.packets += 1;
        self.bytes += u64::from(record.wire_len);

        if record.is_arp {
            self.arp += 1;
        }
        if record.is_dns {
            self.dns += 1;
        }
        // Every ICMP message counts; the type byte is not parsed.
        if record.is_icmp {
            self.icmp_unreach += 1;
        }
        if record.protocol == IPPROTO_UDP && record.wire_len <= small_packet_threshold {
            self.udp_small += 1;
        }
        if record.is_rst() {
            self.rst += 1;
        }
    }
}

/// Health inputs written by the orchestrator and read at frame build time.
#[derive(Debug, Default)]
pub struct HealthFeed {
    capture_drops: AtomicU64,
    queue_fill_bits: AtomicU32,
}

impl HealthFeed {
    pub fn update(&self, capture_drops: u64, queue_fill: f32) {
        self.capture_drops.store(capture_drops, Ordering::Relaxed);
        self.set_queue_fill(queue_fill);
    }

    fn set_queue_fill(&self, queue_fill: f32) {
        self.queue_fill_bits
            .store(queue_fill.to_bits(), Ordering::Relaxed);
    }

    pub fn capture_drops(&self) -> u64 {
        self.capture_drops.load(Ordering::Relaxed)
    }

    pub fn queue_fill(&self) -> f32 {
        f32::from_bits(self.queue_fill_bits.load(Ordering::Relaxed))
    }
}

/// Counters the aggregator publishes for status logs and metrics.
#[derive(Debug, Default)]
pub struct AggregatorStats {
    frames_produced: AtomicU64,
    packets_processed: AtomicU64,
    flows_expired: AtomicU64,
    active_flows: AtomicU64,
    last_window_micros: AtomicU64,
}

/// Point-in-time copy of [`AggregatorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorSnapshot {
    pub frames_produced: u64,
    pub packets_processed: u64,
    pub flows_expired: u64,
    pub active_flows: u64,
    pub last_window: Duration,
}

impl AggregatorStats {
    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            frames_produced: self.frames_produced.load(Ordering::Relaxed),
            packets_processed: self.packets_processed.load(Ordering::Relaxed),
            flows_expired: self.flows_expired.load(Ordering::Relaxed),
            active_flows: self.active_flows.load(Ordering::Relaxed),
            last_window: Duration::from_micros(self.last_window_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Cloneable control surface for an aggregator running on another thread.
#[derive(Clone)]
pub struct AggregatorHandle {
    lifecycle: Arc<Lifecycle>,
    health: Arc<HealthFeed>,
    stats: Arc<AggregatorStats>,
}

impl AggregatorHandle {
    /// Asks the loop to exit at its next iteration boundary.
    pub fn stop(&self) -> bool {
        self.lifecycle.request_stop()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Feeds the latest capture-drop count and buffer fill ratio.
    pub fn update_health(&self, capture_drops: u64, queue_fill: f32) {
        self.health.update(capture_drops, queue_fill);
    }

    pub fn stats(&self) -> AggregatorSnapshot {
        self.stats.snapshot()
    }
}

/// The windowed aggregation loop and its state.
pub struct Aggregator {
    cfg: AggregationConfig,
    consumer: Consumer<PacketRecord>,
    flows: FlowTable,
    window: WindowCounters,
    latency_ewma_ms: f64,
    started_at: Instant,
    window_start: Instant,
    last_expire: Instant,
    last_fill_sample: Instant,
    handlers: Vec<FrameHandler>,
    lifecycle: Arc<Lifecycle>,
    health: Arc<HealthFeed>,
    stats: Arc<AggregatorStats>,
}

impl Aggregator {
    pub fn new(cfg: AggregationConfig, consumer: Consumer<PacketRecord>) -> Self {
        let now = Instant::now();
        let flows = FlowTable::new(cfg.flow_timeout, cfg.heavy_throughput_mbps);

        Self {
            cfg,
            consumer,
            flows,
            window: WindowCounters::default(),
            latency_ewma_ms: 0.0,
            started_at: now,
            window_start: now,
            last_expire: now,
            last_fill_sample: now,
            handlers: Vec::new(),
            lifecycle: Arc::new(Lifecycle::new("aggregator")),
            health: Arc::new(HealthFeed::default()),
            stats: Arc::new(AggregatorStats::default()),
        }
    }

    /// Register a handler for completed frames.
    pub fn on_frame(&mut self, handler: FrameHandler) {
        self.handlers.push(handler);
    }

    pub fn handle(&self) -> AggregatorHandle {
        AggregatorHandle {
            lifecycle: Arc::clone(&self.lifecycle),
            health: Arc::clone(&self.health),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn flows(&self) -> &FlowTable {
        &self.flows
    }

    pub fn window_counters(&self) -> &WindowCounters {
        &self.window
    }

    /// Restarts the engine clock and every periodic timer at `now`.
    pub fn begin(&mut self, now: Instant) {
        self.started_at = now;
        self.window_start = now;
        self.last_expire = now;
        self.last_fill_sample = now;
    }

    /// Runs the loop on the calling thread until stopped.
    pub fn run(mut self) -> Result<(), LifecycleError> {
        self.lifecycle.start()?;
        self.begin(Instant::now());

        let idle = (self.cfg.window / 4).clamp(MIN_IDLE_SLEEP, MAX_IDLE_SLEEP);
        tracing::info!(
            window_us = self.cfg.window.as_micros() as u64,
            idle_us = idle.as_micros() as u64,
            "aggregator started",
        );

        while self.lifecycle.is_running() {
            self.tick(Instant::now());
            std::thread::sleep(idle);
        }

        self.lifecycle.finish();

        let snap = self.stats.snapshot();
        tracing::info!(
            frames = snap.frames_produced,
            packets = snap.packets_processed,
            "aggregator stopped",
        );

        Ok(())
    }

    /// One loop iteration at time `now`. Returns the frame if a window closed.
    pub fn tick(&mut self, now: Instant) -> Option<TelemetryFrame> {
        self.drain();

        let elapsed = now.saturating_duration_since(self.window_start);
        let frame = if elapsed >= self.cfg.window {
            Some(self.close_window(now, elapsed))
        } else {
            None
        };

        if now.saturating_duration_since(self.last_expire) >= self.cfg.expire_interval {
            let removed = self.flows.expire(now);
            if removed > 0 {
                self.stats
                    .flows_expired
                    .fetch_add(removed as u64, Ordering::Relaxed);
                tracing::debug!(removed, remaining = self.flows.len(), "expired idle flows");
            }
            self.last_expire = now;
        }

        if now.saturating_duration_since(self.last_fill_sample) >= self.cfg.fill_sample_interval {
            self.health
                .set_queue_fill(self.consumer.monitor().fill_ratio());
            self.last_fill_sample = now;
        }

        self.stats
            .active_flows
            .store(self.flows.len() as u64, Ordering::Relaxed);

        frame
    }

    /// Moves up to one batch of records from the exchange buffer into the
    /// flow table and window counters.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while drained < self.cfg.max_drain_batch {
            let Some(record) = self.consumer.pop() else {
                break;
            };
            self.flows.update(&record);
            self.window
                .record(&record, self.cfg.small_packet_threshold);
            drained += 1;
        }

        if drained > 0 {
            self.stats
                .packets_processed
                .fetch_add(drained as u64, Ordering::Relaxed);
        }
        drained
    }

    fn close_window(&mut self, now: Instant, elapsed: Duration) -> TelemetryFrame {
        let frame = self.build_frame(now, elapsed.as_secs_f64());
        self.stats
            .last_window_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);

        for handler in &mut self.handlers {
            handler(&frame);
        }

        self.flows.reset_window_counters();
        self.window = WindowCounters::default();
        self.window_start = now;

        self.stats.frames_produced.fetch_add(1, Ordering::Relaxed);

        frame
    }

    /// Assembles the frame for the current window. Updates the latency
    /// average as a side effect.
    pub fn build_frame(&mut self, now: Instant, window_seconds: f64) -> TelemetryFrame {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let mut frame = TelemetryFrame::new(elapsed);
        let packets = self.window.packets;

        frame.net.bps = self.flows.total_bps(window_seconds);
        frame.net.pps = self.flows.total_pps(window_seconds);
        frame.net.active_flows = u32::try_from(self.flows.len()).unwrap_or(u32::MAX);

        // Mean spacing between packets is a load proxy, not a round trip.
        if packets > 1 && window_seconds > 0.0 {
            let spacing_ms =
                (window_seconds * 1000.0 / packets as f64).min(self.cfg.latency_ceiling_ms);
            let alpha = self.cfg.ewma_alpha;
            self.latency_ewma_ms = alpha * spacing_ms + (1.0 - alpha) * self.latency_ewma_ms;
        }
        frame.net.latency_ms = self.latency_ewma_ms as f32;

        if packets > 0 {
            let rst = f64::from(self.window.rst);
            let icmp = f64::from(self.window.icmp_unreach);
            frame.net.packet_loss = (rst / packets as f64).min(1.0) as f32;
            frame.net.error_rate = ((rst + icmp) / packets as f64).min(1.0) as f32;
        }

        frame.proto.arp = self.window.arp;
        frame.proto.dns = self.window.dns;
        frame.proto.udp_small = self.window.udp_small;
        frame.proto.https_flows = self.flows.count_https();
        frame.proto.heavy_streams = self.flows.count_heavy_streams(window_seconds);
        frame.proto.rst = self.window.rst;
        frame.proto.icmp_unreach = self.window.icmp_unreach;
        frame.proto.firewall_blocks = 0;

        frame.top_flows = self
            .flows
            .top_flows(self.cfg.top_flows.min(MAX_TOP_FLOWS), window_seconds)
            .into_iter()
            .collect::<TopFlows>();

        frame.health.capture_drop = self.health.capture_drops();
        frame.health.queue_fill = self.health.queue_fill();
        frame.health.sniffer_fps = if window_seconds > 0.0 {
            (1.0 / window_seconds) as f32
        } else {
            0.0
        };

        frame.sanitize();
        frame
    }
}
