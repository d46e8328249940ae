use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::{Aggregator, AggregatorHandle};
use crate::capture::record::PacketRecord;
use crate::capture::{self, CaptureEngine, FrameSource};
use crate::config::Config;
use crate::exchange::{self, BufferMonitor};
use crate::export::health::{HealthMetrics, PipelineSample};
use crate::lifecycle::LifecycleError;
use crate::publish::Publisher;

/// How often capture drops and buffer fill are fed back to the aggregator.
const HEALTH_FEED_INTERVAL: Duration = Duration::from_secs(1);

type Worker = JoinHandle<Result<(), LifecycleError>>;

/// Agent wires capture, exchange buffer, aggregator, publisher and health
/// server together and owns their shutdown order.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    publisher: Arc<Publisher>,
    capture: CaptureEngine,
    aggregator: Option<AggregatorHandle>,
    capture_thread: Option<Worker>,
    aggregator_thread: Option<Worker>,
    health_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        let publisher = Arc::new(Publisher::new(&cfg.publisher));
        let capture = CaptureEngine::with_read_timeout(cfg.capture.read_timeout);

        Ok(Self {
            cfg,
            health,
            publisher,
            capture,
            aggregator: None,
            capture_thread: None,
            aggregator_thread: None,
            health_addr: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Opens the configured (or auto-selected) interface and starts the
    /// pipeline on it.
    pub async fn start(&mut self) -> Result<()> {
        let interface =
            capture::resolve_interface(&self.cfg.interface).context("selecting capture interface")?;

        let source = capture::open_live(&interface, &self.cfg.capture)
            .with_context(|| format!("opening capture on {interface}"))?;

        info!(
            interface = %interface,
            link = %source.link_type(),
            snaplen = self.cfg.capture.snaplen,
            promiscuous = self.cfg.capture.promiscuous,
            "capture opened",
        );

        self.start_with_source(source).await
    }

    /// Starts the pipeline reading from `source`.
    pub async fn start_with_source<S>(&mut self, source: S) -> Result<()>
    where
        S: FrameSource + 'static,
    {
        // 1. Publisher first: failing to bind is a startup error.
        let addr = self
            .publisher
            .start()
            .await
            .context("starting telemetry publisher")?;
        info!(addr = %addr, "telemetry publisher listening");

        // 2. Health metrics server.
        if self.cfg.health.enabled {
            let addr = self
                .health
                .start()
                .await
                .context("starting health metrics server")?;
            self.health_addr = Some(addr);
        }

        // 3. Exchange buffer between the two loops.
        let (producer, consumer) = exchange::bounded::<PacketRecord>(self.cfg.capture.buffer_capacity)
            .context("creating exchange buffer")?;
        let monitor = producer.monitor();

        // 4. Aggregator with the publisher as its frame sink.
        let mut aggregator = Aggregator::new(self.cfg.aggregation.clone(), consumer);
        let handle = aggregator.handle();
        {
            let publisher = Arc::clone(&self.publisher);
            let health = Arc::clone(&self.health);
            let stats = handle.clone();
            aggregator.on_frame(Box::new(move |frame| {
                health
                    .window_duration
                    .observe(stats.stats().last_window.as_secs_f64());
                publisher.broadcast(frame);
            }));
        }

        self.aggregator_thread = Some(
            std::thread::Builder::new()
                .name("abyss-aggregator".to_string())
                .spawn(move || aggregator.run())
                .context("spawning aggregator thread")?,
        );
        self.aggregator = Some(handle.clone());

        // 5. Capture pump.
        let engine = self.capture.clone();
        self.capture_thread = Some(
            std::thread::Builder::new()
                .name("abyss-capture".to_string())
                .spawn(move || engine.run(source, producer))
                .context("spawning capture thread")?,
        );

        // 6. Health feedback and status logging.
        self.spawn_monitor(handle, monitor);

        info!("agent fully started");

        Ok(())
    }

    /// Stops every component in pipeline order.
    ///
    /// Safe to call right after start: a loop thread that has not reached
    /// its first iteration exits as soon as it does.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        self.capture.stop();
        if let Some(aggregator) = &self.aggregator {
            aggregator.stop();
        }

        join_worker("capture", self.capture_thread.take()).await;
        join_worker("aggregator", self.aggregator_thread.take()).await;

        // The pump may have exited on its own, or never been spawned.
        self.capture.withdraw_stop();

        if let Err(e) = self.publisher.stop().await {
            error!(error = %e, "error stopping telemetry publisher");
        }

        self.health.stop().await?;

        info!("agent stopped");

        Ok(())
    }

    pub fn publisher(&self) -> Arc<Publisher> {
        Arc::clone(&self.publisher)
    }

    /// Address the publisher is listening on, once started.
    pub fn publisher_addr(&self) -> Option<SocketAddr> {
        self.publisher.local_addr()
    }

    /// Address the health server is listening on, once started.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    pub fn health(&self) -> Arc<HealthMetrics> {
        Arc::clone(&self.health)
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }

    pub fn aggregator(&self) -> Option<&AggregatorHandle> {
        self.aggregator.as_ref()
    }

    /// Spawn the background task feeding health inputs to the aggregator,
    /// refreshing metrics and logging the periodic status line.
    fn spawn_monitor(&self, aggregator: AggregatorHandle, buffer: BufferMonitor<PacketRecord>) {
        let cancel = self.cancel.clone();
        let health = Arc::clone(&self.health);
        let publisher = Arc::clone(&self.publisher);
        let capture = self.capture.stats();
        let status_interval = self.cfg.status_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_FEED_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_status = Instant::now();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let captured = capture.snapshot();
                        let fill = buffer.fill_ratio();
                        aggregator.update_health(captured.dropped, fill);

                        let agg = aggregator.stats();
                        let published = publisher.stats();
                        let sample = PipelineSample {
                            packets_captured: captured.captured,
                            capture_dropped: captured.dropped,
                            exchange_dropped: buffer.drops(),
                            exchange_fill_ratio: fill,
                            flows_active: agg.active_flows,
                            frames_produced: agg.frames_produced,
                            frames_sent: published.frames_sent,
                            subscriber_frames_dropped: published.frames_dropped,
                            subscribers: published.subscribers,
                        };
                        health.record(&sample);

                        if last_status.elapsed() >= status_interval {
                            last_status = Instant::now();
                            info!(
                                captured = sample.packets_captured,
                                capture_dropped = sample.capture_dropped,
                                buffer_dropped = sample.exchange_dropped,
                                fill = f64::from(fill),
                                flows = sample.flows_active,
                                frames = sample.frames_produced,
                                sent = sample.frames_sent,
                                subscribers = sample.subscribers,
                                "status",
                            );
                        }
                    }
                }
            }
        });
    }
}

/// Joins a loop thread without blocking the runtime.
async fn join_worker(name: &'static str, worker: Option<Worker>) {
    let Some(worker) = worker else {
        return;
    };

    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(unit = name, error = %e, "loop refused to start"),
        Ok(Err(_)) => error!(unit = name, "loop thread panicked"),
        Err(e) => error!(unit = name, error = %e, "joining loop thread"),
    }
}
