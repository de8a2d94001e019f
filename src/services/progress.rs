//! Progress reporting service
//!
//! Segmentation models report raw `(phase, current, total)` triples. This
//! module turns them into user-facing [`ProgressEvent`]s and hands those to a
//! [`ProgressReporter`], so each frontend can render progress its own way.

use crate::types::ProgressEvent;
use instant::Instant;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

/// Message of the first event of every cutout run
pub const LOADING_MESSAGE: &str = "Loading AI model...";

/// Phase keys a segmentation model may report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoutPhase {
    /// Fetching or loading model weights
    FetchModel,
    /// Running the network
    Inference,
    /// Mask upscaling and compositing
    Postprocess,
    /// Any key this crate does not know
    Other,
}

impl CutoutPhase {
    pub const FETCH_MODEL_KEY: &'static str = "fetch:model";
    pub const INFERENCE_KEY: &'static str = "compute:inference";
    pub const POSTPROCESS_KEY: &'static str = "compute:postprocess";

    /// Classify a phase key; unknown keys map to [`CutoutPhase::Other`]
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        if key == Self::FETCH_MODEL_KEY {
            Self::FetchModel
        } else if key == Self::INFERENCE_KEY {
            Self::Inference
        } else if key == Self::POSTPROCESS_KEY {
            Self::Postprocess
        } else {
            Self::Other
        }
    }

    /// Share of the overall bar this phase covers, as `(start, end)` percent
    ///
    /// [`CutoutPhase::Other`] has no share and never moves the bar.
    #[must_use]
    pub fn band(self) -> Option<(u8, u8)> {
        match self {
            Self::FetchModel => Some((0, 30)),
            Self::Inference => Some((30, 90)),
            Self::Postprocess => Some((90, 100)),
            Self::Other => None,
        }
    }

    /// Overall percentage for `current` of `total` within this phase
    #[must_use]
    pub fn overall_percentage(self, current: u64, total: u64) -> Option<u8> {
        let (start, end) = self.band()?;
        if total == 0 {
            return None;
        }
        let within = f64::from(percentage_of(current, total)) / 100.0;
        let span = f64::from(end - start);
        Some(start + (within * span).round() as u8)
    }

    /// Message shown to the user while this phase runs
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::FetchModel => "Loading AI model (about 80MB on first run)...",
            Self::Inference => "Processing image...",
            Self::Postprocess => "Refining result...",
            Self::Other => "Processing...",
        }
    }
}

/// Trait for reporting progress during a cutout run
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, event: ProgressEvent);

    /// Report that the run finished successfully
    fn report_completion(&self, _elapsed_ms: u64) {}

    /// Report a failed run
    fn report_error(&self, _error: &str) {}
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _event: ProgressEvent) {
        // Intentionally empty - discards progress updates
    }
}

/// Console progress reporter that logs progress through `log`
#[derive(Debug, Default)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether completion timing is logged too
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, event: ProgressEvent) {
        log::info!("[{}%] {}", event.percentage, event.message);
    }

    fn report_completion(&self, elapsed_ms: u64) {
        if self.verbose {
            log::info!("Background removed in {}ms", elapsed_ms);
        } else {
            log::info!("Background removed");
        }
    }

    fn report_error(&self, error: &str) {
        log::error!("Background removal failed: {}", error);
    }
}

/// Forwards progress events into a tokio channel
///
/// Sends after the receiver is dropped are ignored.
#[derive(Debug, Clone)]
pub struct ChannelProgressReporter {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelProgressReporter {
    #[must_use]
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report_progress(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

#[derive(Debug)]
struct TrackerState {
    highest: u8,
    message: &'static str,
}

/// Converts model phase reports into monotonic progress events
///
/// Each phase fills its own band of the bar (fetch 0-30, inference 30-90,
/// postprocess 90-100). A late report from an earlier phase never moves the
/// bar back; it is raised to the highest percentage seen so far. Events are
/// forwarded while the
/// internal lock is held to keep their order intact.
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    start_time: Instant,
    state: Mutex<TrackerState>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("start_time", &self.start_time)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            state: Mutex::new(TrackerState {
                highest: 0,
                message: CutoutPhase::FetchModel.message(),
            }),
        }
    }

    /// Emit the initial model-loading event at 0%
    pub fn begin(&self) {
        let state = self.lock_state();
        self.reporter
            .report_progress(ProgressEvent::new(state.highest, LOADING_MESSAGE));
    }

    /// Translate one model report and forward it
    pub fn report_phase(&self, key: &str, current: u64, total: u64) {
        let phase = CutoutPhase::from_key(key);
        self.emit(phase, phase.overall_percentage(current, total));
    }

    /// Emit the final 100% event
    pub fn finish(&self) {
        let mut state = self.lock_state();
        state.highest = 100;
        self.reporter
            .report_progress(ProgressEvent::new(100, state.message));
        drop(state);
        self.reporter.report_completion(self.elapsed_ms());
    }

    /// Report an error during processing
    pub fn report_error(&self, error: &str) {
        self.reporter.report_error(error);
    }

    /// Highest percentage reported so far
    #[must_use]
    pub fn current_percentage(&self) -> u8 {
        self.lock_state().highest
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn emit(&self, phase: CutoutPhase, percentage: Option<u8>) {
        let mut state = self.lock_state();
        if let Some(percentage) = percentage {
            state.highest = state.highest.max(percentage);
        }
        state.message = phase.message();
        self.reporter
            .report_progress(ProgressEvent::new(state.highest, state.message));
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `round(current / total * 100)` clamped to 0-100
fn percentage_of(current: u64, total: u64) -> u8 {
    let ratio = current as f64 / total as f64;
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}
