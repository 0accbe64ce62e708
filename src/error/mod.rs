//! Pipeline error taxonomy.
//!
//! Every failure an attempt can hit is classified here so the orchestrator
//! can record it and callers can tell transient conditions from malformed
//! uploads. The retry sweeper deliberately ignores the distinction when
//! selecting tasks (both classes consume retry budget identically).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Required attribution metadata (user_id, bot_type, execution id) is
    /// absent from the stored object. No retry can fix the upload.
    #[error("required metadata missing: {0}")]
    MetadataMissing(String),

    /// The archive could not be fetched from object storage.
    #[error("archive download failed: {0}")]
    DownloadFailure(String),

    /// The downloaded bundle could not be unpacked or its reference
    /// transcript could not be parsed.
    #[error("invalid archive: {0}")]
    ArchiveInvalid(String),

    /// The bundle unpacked cleanly but contains no audio payload.
    #[error("no audio payload in archive: {0}")]
    AudioMissing(String),

    /// Network-level failure talking to the transcription provider.
    #[error("transcription request failed: {0}")]
    TranscriptionTransient(String),

    /// The provider accepted the request but reported a transcription error.
    #[error("transcription error from provider: {0}")]
    TranscriptionSemantic(String),

    /// The task store rejected a read or write.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl PipelineError {
    /// Whether a later attempt could plausibly succeed without the upload
    /// being replaced.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::DownloadFailure(_)
                | PipelineError::TranscriptionTransient(_)
                | PipelineError::TranscriptionSemantic(_)
                | PipelineError::PersistenceFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PipelineError::DownloadFailure("s3 down".into()).is_transient());
        assert!(PipelineError::TranscriptionTransient("timeout".into()).is_transient());
        assert!(PipelineError::TranscriptionSemantic("overloaded".into()).is_transient());
        assert!(PipelineError::PersistenceFailure("locked".into()).is_transient());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!PipelineError::MetadataMissing("user_id".into()).is_transient());
        assert!(!PipelineError::ArchiveInvalid("not a tar".into()).is_transient());
        assert!(!PipelineError::AudioMissing("no .opus entry".into()).is_transient());
    }

    #[test]
    fn test_error_messages_carry_detail() {
        let err = PipelineError::MetadataMissing("bot_type".into());
        assert!(err.to_string().contains("bot_type"));
    }
}
