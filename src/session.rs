//! Session lifecycle: upload, cutout, preview, export and reset
//!
//! A [`Session`] owns at most one source/cutout pair at a time and is only
//! mutated through `&mut self`. Every new upload and every reset bumps a
//! generation counter; results and progress carrying an older generation are
//! discarded instead of overwriting newer state.

use crate::{
    cutout::CutoutStage,
    error::{NobgError, Result},
    export::ExportStage,
    services::progress::{ProgressReporter, LOADING_MESSAGE},
    telemetry::{NoOpTelemetry, Telemetry, TelemetryEvent},
    types::{
        CutoutResult, ExportFormat, ExportResult, MediaType, ProgressEvent, SizeSpec, SourceImage,
    },
};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::TempPath;

/// Temporary file backing the source preview
///
/// The file is deleted on [`PreviewHandle::release`] or when the handle is
/// dropped.
#[derive(Debug)]
pub struct PreviewHandle {
    path: TempPath,
}

impl PreviewHandle {
    /// Write the source bytes to a fresh temporary file
    ///
    /// # Errors
    /// - The temporary file cannot be created or written
    pub fn create(source: &SourceImage) -> Result<Self> {
        let extension = match source.media_type {
            MediaType::Jpeg => ".jpg",
            MediaType::Png => ".png",
            MediaType::WebP => ".webp",
        };
        let mut file = tempfile::Builder::new()
            .prefix("nobg-preview-")
            .suffix(extension)
            .tempfile()?;
        file.write_all(&source.bytes)?;
        file.flush()?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the backing file now
    pub fn release(self) {
        let display = self.path.display().to_string();
        if let Err(e) = self.path.close() {
            log::warn!("Failed to remove preview {}: {}", display, e);
        } else {
            log::trace!("Released preview {}", display);
        }
    }
}

/// Where the session is in its lifecycle
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Processing {
        generation: u64,
        source: Arc<SourceImage>,
        preview: PreviewHandle,
        progress: Arc<Mutex<ProgressEvent>>,
    },
    Done {
        source: Arc<SourceImage>,
        cutout: Arc<CutoutResult>,
        preview: PreviewHandle,
    },
    Error {
        message: String,
    },
}

impl SessionState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing { .. } => "processing",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    fn release_preview(self) {
        match self {
            Self::Processing { preview, .. } | Self::Done { preview, .. } => preview.release(),
            Self::Idle | Self::Error { .. } => {},
        }
    }
}

/// Proof of which upload a cutout run belongs to
#[derive(Debug, Clone)]
pub struct CutoutTicket {
    generation: u64,
    source: Arc<SourceImage>,
}

impl CutoutTicket {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn source(&self) -> &Arc<SourceImage> {
        &self.source
    }
}

/// Stores every event of one run in the session before forwarding it
struct SessionProgressReporter {
    slot: Arc<Mutex<ProgressEvent>>,
    inner: Arc<dyn ProgressReporter>,
}

impl ProgressReporter for SessionProgressReporter {
    fn report_progress(&self, event: ProgressEvent) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = event.clone();
        self.inner.report_progress(event);
    }

    fn report_completion(&self, elapsed_ms: u64) {
        self.inner.report_completion(elapsed_ms);
    }

    fn report_error(&self, error: &str) {
        self.inner.report_error(error);
    }
}

/// What [`Session::finish`] did with a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The result became the session state
    Applied,
    /// The result belonged to a superseded run and was dropped
    Discarded,
}

/// One user's upload-to-reset lifetime
pub struct Session {
    state: SessionState,
    generation: u64,
    telemetry: Arc<dyn Telemetry>,
    export_stage: ExportStage,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state.name())
            .field("generation", &self.generation)
            .field("export_stage", &self.export_stage)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Arc::new(NoOpTelemetry), ExportStage::default())
    }
}

impl Session {
    #[must_use]
    pub fn new(telemetry: Arc<dyn Telemetry>, export_stage: ExportStage) -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            telemetry,
            export_stage,
        }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Latest progress of the running cutout
    #[must_use]
    pub fn progress(&self) -> Option<ProgressEvent> {
        match &self.state {
            SessionState::Processing { progress, .. } => Some(
                progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            _ => None,
        }
    }

    #[must_use]
    pub fn cutout(&self) -> Option<&Arc<CutoutResult>> {
        match &self.state {
            SessionState::Done { cutout, .. } => Some(cutout),
            _ => None,
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<&Arc<SourceImage>> {
        match &self.state {
            SessionState::Processing { source, .. } | SessionState::Done { source, .. } => {
                Some(source)
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn preview_path(&self) -> Option<&Path> {
        match &self.state {
            SessionState::Processing { preview, .. } | SessionState::Done { preview, .. } => {
                Some(preview.path())
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            SessionState::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Start processing a validated source, superseding any earlier run
    ///
    /// # Errors
    /// - The preview file cannot be written; the session moves to `Error`
    pub fn begin(&mut self, source: SourceImage) -> Result<CutoutTicket> {
        self.generation += 1;
        std::mem::take(&mut self.state).release_preview();

        let preview = match PreviewHandle::create(&source) {
            Ok(preview) => preview,
            Err(e) => {
                log::error!("Could not create preview for {}: {}", source.file_name, e);
                self.state = SessionState::Error {
                    message: e.user_message(),
                };
                return Err(e);
            },
        };

        self.telemetry.track(TelemetryEvent::ImageUpload {
            name: source.file_name.clone(),
            size: source.size(),
            media_type: source.media_type.mime().to_string(),
        });

        let source = Arc::new(source);
        log::debug!(
            "Session generation {} processing {}",
            self.generation,
            source.file_name
        );
        self.state = SessionState::Processing {
            generation: self.generation,
            source: Arc::clone(&source),
            preview,
            progress: Arc::new(Mutex::new(ProgressEvent::new(0, LOADING_MESSAGE))),
        };

        Ok(CutoutTicket {
            generation: self.generation,
            source,
        })
    }

    /// Store a progress event if `ticket` is still current
    pub fn record_progress(&mut self, ticket: &CutoutTicket, event: ProgressEvent) -> bool {
        match &mut self.state {
            SessionState::Processing {
                generation,
                progress,
                ..
            } if *generation == ticket.generation && ticket.generation == self.generation => {
                *progress.lock().unwrap_or_else(PoisonError::into_inner) = event;
                true
            },
            _ => false,
        }
    }

    /// Wrap `inner` so the events of `ticket`'s run also update
    /// [`Session::progress`]
    ///
    /// Once the ticket is superseded its events only reach `inner`.
    #[must_use]
    pub fn progress_reporter(
        &self,
        ticket: &CutoutTicket,
        inner: Arc<dyn ProgressReporter>,
    ) -> Arc<dyn ProgressReporter> {
        match &self.state {
            SessionState::Processing {
                generation,
                progress,
                ..
            } if *generation == ticket.generation => Arc::new(SessionProgressReporter {
                slot: Arc::clone(progress),
                inner,
            }),
            _ => inner,
        }
    }

    /// Apply the outcome of a cutout run unless it has been superseded
    pub fn finish(&mut self, ticket: CutoutTicket, outcome: Result<CutoutResult>) -> Resolution {
        match outcome {
            Ok(cutout) => self.complete(&ticket, cutout),
            Err(e) => self.fail(&ticket, &e),
        }
    }

    fn is_current(&self, ticket: &CutoutTicket) -> bool {
        let current = ticket.generation == self.generation
            && matches!(
                &self.state,
                SessionState::Processing { generation, .. } if *generation == ticket.generation
            );
        if !current {
            log::debug!(
                "Discarding result of generation {} (current {})",
                ticket.generation,
                self.generation
            );
        }
        current
    }

    fn complete(&mut self, ticket: &CutoutTicket, cutout: CutoutResult) -> Resolution {
        if !self.is_current(ticket) {
            return Resolution::Discarded;
        }
        let SessionState::Processing {
            source, preview, ..
        } = std::mem::take(&mut self.state)
        else {
            return Resolution::Discarded;
        };

        self.state = SessionState::Done {
            source,
            cutout: Arc::new(cutout),
            preview,
        };
        self.telemetry.track(TelemetryEvent::ProcessingComplete);
        Resolution::Applied
    }

    fn fail(&mut self, ticket: &CutoutTicket, error: &NobgError) -> Resolution {
        if !self.is_current(ticket) {
            return Resolution::Discarded;
        }
        std::mem::take(&mut self.state).release_preview();

        self.telemetry.track(TelemetryEvent::ProcessingError {
            error: error.to_string(),
        });
        self.state = SessionState::Error {
            message: error.user_message(),
        };
        Resolution::Applied
    }

    /// Begin, run the cutout stage and apply its outcome
    ///
    /// # Errors
    /// - Preview creation failure
    /// - `CutoutFailed` from the stage
    pub async fn run_cutout(
        &mut self,
        source: SourceImage,
        stage: &CutoutStage,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Arc<CutoutResult>> {
        let ticket = self.begin(source)?;
        let reporter = self.progress_reporter(&ticket, reporter);
        match stage.run(ticket.source(), reporter).await {
            Ok(cutout) => {
                self.complete(&ticket, cutout);
                self.cutout()
                    .cloned()
                    .ok_or_else(|| NobgError::invalid_state("Cutout result was superseded"))
            },
            Err(e) => {
                self.fail(&ticket, &e);
                Err(e)
            },
        }
    }

    /// Export the current cutout
    ///
    /// Failures are logged and returned; the session stays `Done` so the user
    /// can retry with other settings.
    ///
    /// # Errors
    /// - `InvalidState` when no cutout is available
    /// - `ExportFailed` from the export stage
    pub async fn export(&self, size: &SizeSpec, format: ExportFormat) -> Result<ExportResult> {
        let SessionState::Done { source, cutout, .. } = &self.state else {
            return Err(NobgError::invalid_state(format!(
                "Nothing to export while {}",
                self.state.name()
            )));
        };

        self.export_stage
            .export(Arc::clone(cutout), &source.file_name, size, format)
            .await
            .inspect_err(|e| log::error!("Export of {} failed: {}", source.file_name, e))
    }

    /// Wait up to `timeout` for analytics events still being delivered
    pub async fn flush_telemetry(&self, timeout: std::time::Duration) {
        self.telemetry.flush(timeout).await;
    }

    /// Drop the current source and cutout and return to `Idle`
    pub fn reset(&mut self) {
        self.generation += 1;
        std::mem::take(&mut self.state).release_preview();
        self.telemetry.track(TelemetryEvent::ResetClick);
    }
}
