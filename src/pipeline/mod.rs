//! Pipeline orchestrator.
//!
//! Drives one task through the full attempt:
//! fetch metadata → download → extract → transcribe → reconcile →
//! persist segments → stamp processed.
//!
//! Any failure is recorded into the task's diagnostic note, the task is
//! marked failed with a completion timestamp, and the error propagates so
//! the queue layer can apply its own delivery-retry policy independent of
//! the retry sweeper. Re-running an attempt for the same `file_key` is
//! safe: segment replacement is atomic and the task's fields are fully
//! overwritten, never incremented — `retry_count` belongs to the sweeper.

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::archive;
use crate::db::tasks::{CompletionDetails, TaskStore};
use crate::error::PipelineError;
use crate::reconcile;
use crate::storage::{ObjectStorage, TaskMetadata};
use crate::transcription::{TranscriptionClient, TranscriptionConfig};

pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    storage: Arc<dyn ObjectStorage>,
    transcriber: Arc<dyn TranscriptionClient>,
    transcription_config: TranscriptionConfig,
}

fn persistence(err: anyhow::Error) -> PipelineError {
    PipelineError::PersistenceFailure(err.to_string())
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Storage key of the extracted audio once processing succeeds, derived
/// from the archive key: `raw_combined/<name>.tar` → `raw_recordings/<name>.opus`.
pub fn derived_audio_key(file_key: &str) -> String {
    let name = file_key
        .trim_start_matches("raw_combined/")
        .trim_end_matches(".tar");
    format!("raw_recordings/{}.opus", name)
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        storage: Arc<dyn ObjectStorage>,
        transcriber: Arc<dyn TranscriptionClient>,
        transcription_config: TranscriptionConfig,
    ) -> Self {
        Self {
            store,
            storage,
            transcriber,
            transcription_config,
        }
    }

    /// Run one full attempt for `file_key`.
    pub async fn run(&self, file_key: &str) -> Result<(), PipelineError> {
        info!("Pipeline started for '{}'", file_key);

        match self.process(file_key).await {
            Ok(()) => {
                info!("Pipeline completed for '{}'", file_key);
                Ok(())
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("Pipeline attempt for '{}' failed: {}", file_key, e);
                } else {
                    error!("Pipeline attempt for '{}' failed fatally: {}", file_key, e);
                }
                if let Err(db_err) =
                    self.store.mark_failed(file_key, &e.to_string(), Utc::now())
                {
                    error!("Could not record failure for '{}': {}", file_key, db_err);
                }
                Err(e)
            }
        }
    }

    async fn process(&self, file_key: &str) -> Result<(), PipelineError> {
        // Metadata gates entry into processing: without attribution fields
        // the attempt fails before any expensive work.
        let metadata_map = self
            .storage
            .get_metadata(file_key)
            .await?
            .ok_or_else(|| {
                PipelineError::MetadataMissing(format!("no stored object for {}", file_key))
            })?;
        let metadata = TaskMetadata::from_map(&metadata_map)?;

        self.store
            .mark_processing(file_key, &metadata, Utc::now())
            .map_err(persistence)?;

        let download_dir = TempDir::new()
            .map_err(|e| PipelineError::DownloadFailure(format!("workspace: {}", e)))?;
        let tar_path = download_dir.path().join("archive.tar");
        self.storage.download(file_key, &tar_path).await?;
        info!("Archive downloaded for '{}'", file_key);

        let extracted = archive::extract(&tar_path)?;

        let segments = self
            .transcriber
            .transcribe(&extracted.audio_path, &self.transcription_config)
            .await?;
        if segments.is_empty() {
            warn!("No segments returned from transcription for '{}'", file_key);
        }

        let details = CompletionDetails {
            meeting_start_time: extracted
                .reference
                .as_ref()
                .map(|r| stamp(r.meeting_start_time)),
            meeting_end_time: extracted
                .reference
                .as_ref()
                .and_then(|r| r.meeting_end_time)
                .map(stamp),
            audio_file_key: Some(derived_audio_key(file_key)),
        };

        let resolver = reconcile::resolver_for(extracted.reference.clone());
        let utterances = resolver.resolve(&segments);

        self.store
            .replace_segments(file_key, &utterances)
            .map_err(persistence)?;
        info!(
            "Persisted {} segments for '{}'",
            utterances.len(),
            file_key
        );

        self.store
            .mark_processed(file_key, Utc::now(), &details)
            .map_err(persistence)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_audio_key() {
        assert_eq!(
            derived_audio_key("raw_combined/meeting-123.tar"),
            "raw_recordings/meeting-123.opus"
        );
    }

    #[test]
    fn test_derived_audio_key_without_prefix() {
        assert_eq!(derived_audio_key("plain.tar"), "raw_recordings/plain.opus");
    }
}
