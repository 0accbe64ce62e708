//! Transcription provider contract.
//!
//! The pipeline consumes an ordered, diarized segment stream and does not
//! care which engine produced it. Network-level failures and
//! provider-reported failures surface as distinct error variants so the
//! orchestrator can classify them.

pub mod providers;

use async_trait::async_trait;
use std::path::Path;

use crate::error::PipelineError;

/// One diarized utterance from the provider. `label` is the provider's
/// anonymous speaker tag ("A", "B", ...), not a real identity. Offsets are
/// milliseconds from the start of the audio.
#[derive(Debug, Clone, PartialEq)]
pub struct DiarizedSegment {
    pub label: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

/// Provider-side processing flags.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub diarization: bool,
    pub filter_profanity: bool,
    pub remove_disfluencies: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            diarization: true,
            filter_profanity: true,
            remove_disfluencies: true,
        }
    }
}

/// Contract for the external speech-to-text service.
///
/// An empty segment list is a valid result (silent audio), not an error.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        config: &TranscriptionConfig,
    ) -> Result<Vec<DiarizedSegment>, PipelineError>;
}
