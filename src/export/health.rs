use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "abyss";

/// Cumulative pipeline counters sampled by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineSample {
    pub packets_captured: u64,
    pub capture_dropped: u64,
    pub exchange_dropped: u64,
    pub exchange_fill_ratio: f32,
    pub flows_active: u64,
    pub frames_produced: u64,
    pub frames_sent: u64,
    pub subscriber_frames_dropped: u64,
    pub subscribers: usize,
}

/// Prometheus metrics for the capture pipeline, served on /metrics.
///
/// All metrics use the "abyss" namespace. Counters are fed from cumulative
/// samples, so only the increase since the previous sample is applied.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
    last: parking_lot::Mutex<PipelineSample>,

    /// Frames read from the capture source.
    pub packets_captured: Counter,
    /// Frames the capture layer reported as dropped.
    pub capture_dropped: Counter,
    /// Records overwritten in the exchange buffer.
    pub exchange_dropped: Counter,
    /// Occupied fraction of the exchange buffer.
    pub exchange_fill_ratio: Gauge,
    /// Flows currently tracked.
    pub flows_active: Gauge,
    /// Telemetry frames built by the aggregator.
    pub frames_produced: Counter,
    /// Frames written to subscriber sockets.
    pub frames_sent: Counter,
    /// Frames skipped for subscribers with a full queue.
    pub subscriber_frames_dropped: Counter,
    /// Connected subscribers.
    pub subscribers: Gauge,
    /// Measured length of each closed window.
    pub window_duration: Histogram,
}

fn counter(name: &str, help: &str) -> Result<Counter> {
    Ok(Counter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?)
}

fn gauge(name: &str, help: &str) -> Result<Gauge> {
    Ok(Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?)
}

fn advance(metric: &Counter, previous: u64, current: u64) {
    // A reopened source may restart its count.
    if current > previous {
        metric.inc_by((current - previous) as f64);
    }
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let packets_captured = counter(
            "packets_captured_total",
            "Total frames read from the capture source.",
        )?;
        let capture_dropped = counter(
            "capture_dropped_total",
            "Total frames dropped by the capture layer.",
        )?;
        let exchange_dropped = counter(
            "exchange_dropped_total",
            "Total packet records overwritten in the exchange buffer.",
        )?;
        let exchange_fill_ratio = gauge(
            "exchange_fill_ratio",
            "Fraction of the exchange buffer holding unread records.",
        )?;
        let flows_active = gauge("flows_active", "Number of flows currently tracked.")?;
        let frames_produced = counter(
            "frames_produced_total",
            "Total telemetry frames built by the aggregator.",
        )?;
        let frames_sent = counter(
            "frames_sent_total",
            "Total telemetry frames delivered to subscribers.",
        )?;
        let subscriber_frames_dropped = counter(
            "subscriber_frames_dropped_total",
            "Total frames skipped because a subscriber queue was full.",
        )?;
        let subscribers = gauge("subscribers", "Number of connected subscribers.")?;
        let window_duration = Histogram::with_opts(
            HistogramOpts::new(
                "window_duration_seconds",
                "Measured duration of each aggregation window.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.010, 0.015, 0.017, 0.020, 0.025, 0.050, 0.100, 0.500]),
        )?;

        registry.register(Box::new(packets_captured.clone()))?;
        registry.register(Box::new(capture_dropped.clone()))?;
        registry.register(Box::new(exchange_dropped.clone()))?;
        registry.register(Box::new(exchange_fill_ratio.clone()))?;
        registry.register(Box::new(flows_active.clone()))?;
        registry.register(Box::new(frames_produced.clone()))?;
        registry.register(Box::new(frames_sent.clone()))?;
        registry.register(Box::new(subscriber_frames_dropped.clone()))?;
        registry.register(Box::new(subscribers.clone()))?;
        registry.register(Box::new(window_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            last: parking_lot::Mutex::new(PipelineSample::default()),
            packets_captured,
            capture_dropped,
            exchange_dropped,
            exchange_fill_ratio,
            flows_active,
            frames_produced,
            frames_sent,
            subscriber_frames_dropped,
            subscribers,
            window_duration,
        })
    }

    /// Applies a fresh cumulative sample.
    pub fn record(&self, sample: &PipelineSample) {
        let mut last = self.last.lock();

        advance(&self.packets_captured, last.packets_captured, sample.packets_captured);
        advance(&self.capture_dropped, last.capture_dropped, sample.capture_dropped);
        advance(&self.exchange_dropped, last.exchange_dropped, sample.exchange_dropped);
        advance(&self.frames_produced, last.frames_produced, sample.frames_produced);
        advance(&self.frames_sent, last.frames_sent, sample.frames_sent);
        advance(
            &self.subscriber_frames_dropped,
            last.subscriber_frames_dropped,
            sample.subscriber_frames_dropped,
        );

        self.exchange_fill_ratio
            .set(f64::from(sample.exchange_fill_ratio));
        self.flows_active.set(sample.flows_active as f64);
        self.subscribers.set(sample.subscribers as f64);

        *last = *sample;
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<SocketAddr> {
        // Accept ":port" shorthand.
        let bind_addr = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_applies_deltas() {
        let metrics = HealthMetrics::new("127.0.0.1:0").unwrap();

        metrics.record(&PipelineSample {
            packets_captured: 10,
            frames_produced: 2,
            subscribers: 1,
            exchange_fill_ratio: 0.25,
            ..Default::default()
        });
        metrics.record(&PipelineSample {
            packets_captured: 25,
            frames_produced: 3,
            subscribers: 0,
            exchange_fill_ratio: 0.5,
            ..Default::default()
        });

        assert_eq!(metrics.packets_captured.get(), 25.0);
        assert_eq!(metrics.frames_produced.get(), 3.0);
        assert_eq!(metrics.subscribers.get(), 0.0);
        assert_eq!(metrics.exchange_fill_ratio.get(), 0.5);
    }

    #[test]
    fn test_record_ignores_counter_regression() {
        let metrics = HealthMetrics::new("127.0.0.1:0").unwrap();
        metrics.record(&PipelineSample {
            capture_dropped: 7,
            ..Default::default()
        });
        metrics.record(&PipelineSample {
            capture_dropped: 3,
            ..Default::default()
        });
        assert_eq!(metrics.capture_dropped.get(), 7.0);
    }

    #[test]
    fn test_render_uses_namespace() {
        let metrics = HealthMetrics::new("127.0.0.1:0").unwrap();
        metrics.window_duration.observe(0.0167);

        let text = metrics.render().unwrap();
        assert!(text.contains("abyss_packets_captured_total"));
        assert!(text.contains("abyss_subscriber_frames_dropped_total"));
        assert!(text.contains("abyss_window_duration_seconds_count 1"));
    }

    #[tokio::test]
    async fn test_serves_metrics_and_healthz() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let metrics = HealthMetrics::new("127.0.0.1:0").unwrap();
        let addr = metrics.start().await.unwrap();

        for (path, needle) in [("/healthz", "ok"), ("/metrics", "abyss_flows_active")] {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            let request =
                format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
            stream.write_all(request.as_bytes()).await.unwrap();

            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            assert!(response.starts_with("HTTP/1.1 200"), "{path}: {response}");
            assert!(response.contains(needle), "{path}: {response}");
        }

        metrics.stop().await.unwrap();
    }
}
