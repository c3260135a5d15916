//! Capture loop, stats timer and result delivery on one event queue
//!
//! A single actor task owns every piece of mutable state and multiplexes the
//! capture interval, the one-second stats interval (alive only while
//! streaming), the result receiver and control commands. Readers get
//! snapshots through a watch channel and lock-free slots.

pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use image::RgbImage;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::capture::FrameSource;
use crate::display::DisplaySink;
use crate::normalize::Normalizer;
use crate::stream::{ResultPayload, StreamingChannel};
use crate::Config;

pub use stats::{PipelineState, StatsTracker};

const STATS_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub tick_interval: Duration,
    pub start_enabled: bool,
    /// Skip displaying results that arrive while streaming is off.
    pub suppress_late_results: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(16),
            start_enabled: false,
            suppress_late_results: false,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.pipeline.tick_interval(),
            start_enabled: config.pipeline.start_enabled,
            suppress_late_results: config.display.suppress_late_results,
        }
    }
}

#[derive(Debug)]
enum Command {
    SetEnabled(bool),
    Toggle,
    Shutdown,
}

/// Handle to a running pipeline. Dropping it cancels both timers.
pub struct Pipeline {
    commands: flume::Sender<Command>,
    state: watch::Receiver<PipelineState>,
    preview: Arc<ArcSwapOption<RgbImage>>,
    display: Arc<DisplaySink>,
    task: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the pipeline actor on the current Tokio runtime.
    pub fn spawn(
        source: Arc<dyn FrameSource>,
        normalizer: Normalizer,
        channel: Arc<dyn StreamingChannel>,
        options: PipelineOptions,
    ) -> Self {
        let (commands, command_rx) = flume::unbounded();
        let (state_tx, state) = watch::channel(PipelineState::default());
        let preview = Arc::new(ArcSwapOption::empty());
        let display = Arc::new(DisplaySink::new());

        let actor = Actor {
            source,
            normalizer,
            results: channel.results(),
            channel,
            display: display.clone(),
            preview: preview.clone(),
            stats: StatsTracker::default(),
            state_tx,
            options,
        };
        let task = tokio::spawn(actor.run(command_rx));

        Self {
            commands,
            state,
            preview,
            display,
            task: Some(task),
        }
    }

    pub fn start(&self) {
        self.set_enabled(true);
    }

    pub fn stop(&self) {
        self.set_enabled(false);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.command(Command::SetEnabled(enabled));
    }

    pub fn toggle(&self) {
        self.command(Command::Toggle);
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Latest normalized square, updated on every tick regardless of streaming.
    pub fn preview(&self) -> Option<Arc<RgbImage>> {
        self.preview.load_full()
    }

    pub fn display(&self) -> &Arc<DisplaySink> {
        &self.display
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop both timers and wait for the actor to exit. In-flight results are abandoned.
    pub async fn shutdown(mut self) {
        self.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "pipeline task ended abnormally");
            }
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("pipeline already stopped, command ignored");
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Actor {
    source: Arc<dyn FrameSource>,
    normalizer: Normalizer,
    channel: Arc<dyn StreamingChannel>,
    results: flume::Receiver<ResultPayload>,
    display: Arc<DisplaySink>,
    preview: Arc<ArcSwapOption<RgbImage>>,
    stats: StatsTracker,
    state_tx: watch::Sender<PipelineState>,
    options: PipelineOptions,
}

impl Actor {
    async fn run(mut self, commands: flume::Receiver<Command>) {
        let mut capture = interval(self.options.tick_interval);
        capture.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut seconds: Option<Interval> = None;
        let results = self.results.clone();
        let mut results_open = true;

        if self.options.start_enabled {
            self.set_enabled(true, &mut seconds);
        }
        info!(
            tick_ms = self.options.tick_interval.as_millis() as u64,
            enabled = self.stats.enabled(),
            "pipeline running"
        );

        loop {
            tokio::select! {
                _ = capture.tick() => self.on_tick(),
                _ = next_second(&mut seconds) => {
                    self.stats.on_second();
                    self.publish();
                }
                result = results.recv_async(), if results_open => match result {
                    Ok(result) => self.on_result(result),
                    Err(_) => {
                        warn!("result channel closed");
                        results_open = false;
                    }
                },
                command = commands.recv_async() => match command {
                    Ok(Command::SetEnabled(enabled)) => self.set_enabled(enabled, &mut seconds),
                    Ok(Command::Toggle) => {
                        let enabled = !self.stats.enabled();
                        self.set_enabled(enabled, &mut seconds);
                    }
                    Ok(Command::Shutdown) | Err(_) => break,
                },
            }
        }
        info!("pipeline stopped");
    }

    fn set_enabled(&mut self, enabled: bool, seconds: &mut Option<Interval>) {
        if !self.stats.set_enabled(enabled) {
            return;
        }
        *seconds = enabled.then(|| interval_at(Instant::now() + STATS_PERIOD, STATS_PERIOD));
        info!(enabled, "streaming toggled");
        self.publish();
    }

    /// Read, normalize, preview, and send only while enabled.
    #[instrument(skip(self), level = "trace")]
    fn on_tick(&mut self) {
        let Some(frame) = self.source.current_frame() else {
            return;
        };
        let normalized = match self.normalizer.normalize(&frame) {
            Ok(Some(normalized)) => normalized,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, sequence = frame.sequence, "normalize failed");
                return;
            }
        };

        self.preview.store(Some(normalized.preview.clone()));
        self.stats.on_capture();
        metrics::counter!("frames_normalized").increment(1);

        if self.stats.enabled() {
            let sequence = normalized.sequence;
            match self.channel.send(normalized) {
                Ok(()) => self.stats.on_sent(),
                Err(e) => {
                    metrics::counter!("send_failures").increment(1);
                    debug!(error = %e, sequence, "frame not sent");
                }
            }
        }
        self.publish();
    }

    fn on_result(&mut self, result: ResultPayload) {
        self.stats.on_result();
        metrics::counter!("results_received").increment(1);

        if self.options.suppress_late_results && !self.stats.enabled() {
            debug!("late result suppressed");
        } else if let Err(e) = self.display.show(&result) {
            metrics::counter!("malformed_results").increment(1);
            warn!(error = %e, bytes = result.content.len(), "result not displayed");
        }
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.stats.snapshot());
    }
}

async fn next_second(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
