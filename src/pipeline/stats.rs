use crate::utils::format_rate;

/// Values the presentation layer reads: toggle state, counters, timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineState {
    pub enabled: bool,
    /// Results delivered by the channel. Never reset.
    pub frames_received: u64,
    /// Whole seconds streamed since the last toggle.
    pub elapsed_seconds: u64,
    /// Ticks that produced a normalized frame, sent or not.
    pub frames_captured: u64,
    /// Frames the channel accepted.
    pub frames_sent: u64,
}

impl PipelineState {
    /// `frames_received / elapsed_seconds`. Not finite while the timer reads zero.
    pub fn frame_rate(&self) -> f64 {
        self.frames_received as f64 / self.elapsed_seconds as f64
    }

    pub fn frame_rate_label(&self) -> String {
        format_rate(self.frame_rate())
    }
}

/// Counting rules for [`PipelineState`]. Owned by the pipeline actor.
#[derive(Debug, Default)]
pub struct StatsTracker {
    state: PipelineState,
}

impl StatsTracker {
    pub fn snapshot(&self) -> PipelineState {
        self.state
    }

    pub fn enabled(&self) -> bool {
        self.state.enabled
    }

    /// Apply a toggle. The timer restarts from zero on every transition;
    /// `frames_received` is left alone. Returns whether anything changed.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.state.enabled == enabled {
            return false;
        }
        self.state.enabled = enabled;
        self.state.elapsed_seconds = 0;
        true
    }

    pub fn on_result(&mut self) {
        self.state.frames_received += 1;
    }

    /// One stats-timer tick. Ignored while disabled.
    pub fn on_second(&mut self) {
        if self.state.enabled {
            self.state.elapsed_seconds += 1;
        }
    }

    pub fn on_capture(&mut self) {
        self.state.frames_captured += 1;
    }

    pub fn on_sent(&mut self) {
        self.state.frames_sent += 1;
    }
}
