// Seams between the pipeline and its collaborators

use async_trait::async_trait;
use std::path::Path;

use super::errors::EncodingError;
use super::models::DownloadTask;

/// Receives pipeline progress. All methods default to no-ops.
pub trait ProgressEmitter: Send + Sync {
    /// Called on every state transition of a task
    fn on_state(&self, _task: &DownloadTask) {}

    /// Called after each chunk is written
    fn on_progress(&self, _task: &DownloadTask) {}

    /// Free-form pipeline status line
    fn status(&self, _message: &str) {}
}

/// Emitter that discards everything
pub struct SilentEmitter;

impl ProgressEmitter for SilentEmitter {}

/// External encoder boundary
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Name of the encoder (for logging)
    fn name(&self) -> &'static str;

    /// Re-encode a raw audio stream into the user-facing audio container
    async fn convert_audio(&self, input: &Path, output: &Path) -> Result<(), EncodingError>;

    /// Mux a video stream with an audio stream into one container
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), EncodingError>;
}
