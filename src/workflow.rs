//! Transcription workflow state machine
//!
//! Drives one submission from file selection through upload to a
//! terminal phase: validate, submit with retry, persist on success,
//! reset. Rendering is the caller's concern; this type only holds the
//! phases and the data each phase exposes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::debug;

use crate::api::{ApiError, MAX_UPLOAD_BYTES, ProgressFn, Transcriber, TranscriptionResult, media_type};
use crate::history::{HistoryBackend, HistoryStore, TranscriptionRecord};

/// Media types the service accepts
pub const ACCEPTED_MEDIA_TYPES: [&str; 7] = [
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/wave",
    "video/mp4",
    "video/mpeg",
    "video/quicktime",
];

/// Where a submission currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    FileSelected,
    Processing,
    Succeeded,
    Failed,
}

/// Pre-submission validation failures; these never reach the network
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported file type '{0}'. Accepted: MP3, WAV, MP4, MPEG, MOV")]
    InvalidType(String),
    #[error("File size exceeds 100MB limit ({0} bytes)")]
    TooLarge(u64),
}

/// Submission failures surfaced by [`Workflow::submit`]
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("No file selected")]
    NoFile,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A validated file waiting to be submitted
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub size: u64,
    pub media_type: &'static str,
}

/// One submission's worth of state
pub struct Workflow {
    phase: Phase,
    file: Option<SelectedFile>,
    result: Option<TranscriptionResult>,
    error: Option<String>,
    progress: Arc<AtomicU8>,
}

impl Workflow {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            file: None,
            result: None,
            error: None,
            progress: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn file(&self) -> Option<&SelectedFile> {
        self.file.as_ref()
    }

    pub fn result(&self) -> Option<&TranscriptionResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Upload percent of the current or last submission, best-effort
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Validate and select a file for submission.
    ///
    /// Accepts only files whose declared media type is in
    /// [`ACCEPTED_MEDIA_TYPES`] and whose size is within the upload cap.
    /// On rejection the workflow stays in `Idle`. `size` is passed in by
    /// the caller so validation itself stays I/O-free.
    pub fn select_file(&mut self, path: &Path, size: u64) -> Result<(), ValidationError> {
        let media_type = media_type(path)
            .filter(|mt| ACCEPTED_MEDIA_TYPES.contains(mt))
            .ok_or_else(|| {
                let shown = path
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_else(|| path.display().to_string());
                ValidationError::InvalidType(shown)
            })?;

        if size > MAX_UPLOAD_BYTES {
            return Err(ValidationError::TooLarge(size));
        }

        debug!(path = %path.display(), size, media_type, "file selected");
        self.file = Some(SelectedFile {
            path: path.to_path_buf(),
            size,
            media_type,
        });
        self.phase = Phase::FileSelected;
        Ok(())
    }

    /// Submit the selected file and persist the result on success.
    ///
    /// Moves to `Processing` (clearing any prior result, error and
    /// progress), then to `Succeeded` or `Failed`. Every successful
    /// transcription is saved to the store unconditionally before the
    /// phase changes. On failure the error message is retained and
    /// progress resets to 0.
    pub async fn submit<T, B>(
        &mut self,
        transcriber: &T,
        store: &HistoryStore<B>,
        on_progress: Option<ProgressFn>,
        max_attempts: u32,
    ) -> Result<TranscriptionRecord, SubmitError>
    where
        T: Transcriber,
        B: HistoryBackend,
    {
        let file = match (&self.phase, &self.file) {
            (Phase::FileSelected, Some(file)) => file.clone(),
            _ => return Err(SubmitError::NoFile),
        };

        self.phase = Phase::Processing;
        self.result = None;
        self.error = None;
        self.progress.store(0, Ordering::Relaxed);

        let progress = Arc::clone(&self.progress);
        let chained: ProgressFn = Arc::new(move |pct| {
            progress.store(pct, Ordering::Relaxed);
            if let Some(cb) = &on_progress {
                cb(pct);
            }
        });

        match transcriber
            .transcribe_with_retry(&file.path, Some(chained), max_attempts)
            .await
        {
            Ok(result) => {
                let record = store.save(&result);
                self.result = Some(result);
                self.phase = Phase::Succeeded;
                Ok(record)
            }
            Err(e) => {
                self.error = Some(e.to_string());
                self.progress.store(0, Ordering::Relaxed);
                self.phase = Phase::Failed;
                Err(SubmitError::Api(e))
            }
        }
    }

    /// Return to `Idle`, clearing file, result, error and progress
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.file = None;
        self.result = None;
        self.error = None;
        self.progress.store(0, Ordering::Relaxed);
    }

    /// Write the completed transcript to `<basename>-transcription.txt`
    /// in `dir` and return the path
    pub fn export_transcript(&self, dir: &Path) -> Result<PathBuf> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| anyhow!("No completed transcription to export"))?;

        let stem = Path::new(&result.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "transcript".to_string());

        let path = dir.join(format!("{}-transcription.txt", stem));
        fs::write(&path, &result.text)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
        Ok(path)
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    struct StubTranscriber {
        calls: AtomicU32,
        outcome: fn() -> Result<TranscriptionResult, ApiError>,
        report_progress: Option<u8>,
    }

    impl StubTranscriber {
        fn succeeding() -> Self {
            Self {
                calls: AtomicU32::new(0),
                outcome: || {
                    Ok(TranscriptionResult {
                        text: "hello".to_string(),
                        file_name: "a.mp3".to_string(),
                        duration: "1:00".to_string(),
                        file_size: "50MB".to_string(),
                        date: "2025-01-01".to_string(),
                    })
                },
                report_progress: None,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                outcome: || Err(ApiError::PayloadTooLarge),
                report_progress: None,
            }
        }
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe_with_retry(
            &self,
            _path: &Path,
            on_progress: Option<ProgressFn>,
            _max_attempts: u32,
        ) -> Result<TranscriptionResult, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let (Some(pct), Some(cb)) = (self.report_progress, &on_progress) {
                cb(pct);
            }
            (self.outcome)()
        }
    }

    fn select_mp3(workflow: &mut Workflow) {
        workflow
            .select_file(Path::new("a.mp3"), 50 * 1024 * 1024)
            .unwrap();
    }

    #[test]
    fn test_select_rejects_unsupported_type() {
        let mut workflow = Workflow::new();

        let err = workflow
            .select_file(Path::new("report.pdf"), 1024)
            .unwrap_err();

        assert_eq!(err, ValidationError::InvalidType(".pdf".to_string()));
        assert_eq!(workflow.phase(), Phase::Idle);
        assert!(workflow.file().is_none());
    }

    #[test]
    fn test_select_rejects_oversized_file() {
        let mut workflow = Workflow::new();
        let size = MAX_UPLOAD_BYTES + 1;

        let err = workflow.select_file(Path::new("big.mp3"), size).unwrap_err();

        assert_eq!(err, ValidationError::TooLarge(size));
        assert_eq!(workflow.phase(), Phase::Idle);
    }

    #[test]
    fn test_select_accepts_supported_media() {
        let mut workflow = Workflow::new();
        select_mp3(&mut workflow);

        assert_eq!(workflow.phase(), Phase::FileSelected);
        let file = workflow.file().unwrap();
        assert_eq!(file.media_type, "audio/mpeg");
        assert_eq!(file.size, 50 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_submit_success_persists_and_transitions() {
        let mut workflow = Workflow::new();
        select_mp3(&mut workflow);

        let store = HistoryStore::new(MemoryBackend::default());
        let stub = StubTranscriber::succeeding();

        let record = workflow.submit(&stub, &store, None, 3).await.unwrap();

        assert_eq!(workflow.phase(), Phase::Succeeded);
        assert_eq!(workflow.result().unwrap().text, "hello");
        assert!(workflow.error().is_none());

        // Saved unconditionally, with a fresh id and today's date.
        let stored = store.list();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], record);
        assert_eq!(stored[0].text, "hello");
        assert_ne!(stored[0].date, "2025-01-01");
    }

    #[tokio::test]
    async fn test_submit_failure_surfaces_error_and_resets_progress() {
        let mut workflow = Workflow::new();
        select_mp3(&mut workflow);

        let store = HistoryStore::new(MemoryBackend::default());
        let stub = StubTranscriber::failing();

        let err = workflow.submit(&stub, &store, None, 3).await.unwrap_err();

        assert!(matches!(err, SubmitError::Api(ApiError::PayloadTooLarge)));
        assert_eq!(workflow.phase(), Phase::Failed);
        assert_eq!(workflow.error(), Some("File size exceeds 100MB limit"));
        assert_eq!(workflow.progress(), 0);
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_selection_is_rejected() {
        let mut workflow = Workflow::new();
        let store = HistoryStore::new(MemoryBackend::default());
        let stub = StubTranscriber::succeeding();

        let err = workflow.submit(&stub, &store, None, 3).await.unwrap_err();

        assert!(matches!(err, SubmitError::NoFile));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert_eq!(workflow.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_progress_reaches_workflow_and_caller() {
        let mut workflow = Workflow::new();
        select_mp3(&mut workflow);

        let store = HistoryStore::new(MemoryBackend::default());
        let mut stub = StubTranscriber::succeeding();
        stub.report_progress = Some(42);

        let seen = Arc::new(AtomicU8::new(0));
        let seen_by_caller = Arc::clone(&seen);
        let cb: ProgressFn = Arc::new(move |pct| seen_by_caller.store(pct, Ordering::Relaxed));

        workflow.submit(&stub, &store, Some(cb), 3).await.unwrap();

        assert_eq!(workflow.progress(), 42);
        assert_eq!(seen.load(Ordering::Relaxed), 42);
    }

    #[tokio::test]
    async fn test_reset_clears_all_state() {
        let mut workflow = Workflow::new();
        select_mp3(&mut workflow);

        let store = HistoryStore::new(MemoryBackend::default());
        let stub = StubTranscriber::succeeding();
        workflow.submit(&stub, &store, None, 3).await.unwrap();

        workflow.reset();

        assert_eq!(workflow.phase(), Phase::Idle);
        assert!(workflow.file().is_none());
        assert!(workflow.result().is_none());
        assert!(workflow.error().is_none());
        assert_eq!(workflow.progress(), 0);
    }

    #[tokio::test]
    async fn test_export_transcript_writes_named_file() {
        let mut workflow = Workflow::new();
        select_mp3(&mut workflow);

        let store = HistoryStore::new(MemoryBackend::default());
        let stub = StubTranscriber::succeeding();
        workflow.submit(&stub, &store, None, 3).await.unwrap();

        let dir = TempDir::new().unwrap();
        let path = workflow.export_transcript(dir.path()).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "a-transcription.txt"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_export_without_result_fails() {
        let workflow = Workflow::new();
        let dir = TempDir::new().unwrap();

        assert!(workflow.export_transcript(dir.path()).is_err());
    }
}
