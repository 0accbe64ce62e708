use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

use super::super::{DiarizedSegment, TranscriptionClient, TranscriptionConfig};
use crate::error::PipelineError;

/// Response from the upload endpoint
#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

/// Request body for creating a transcript
#[derive(Debug, Serialize)]
struct TranscriptRequest {
    audio_url: String,
    speaker_labels: bool,
    filter_profanity: bool,
    disfluencies: bool,
}

/// Response from transcript creation and polling
#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: TranscriptStatus,
    error: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum TranscriptStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Deserialize)]
struct SentencesResponse {
    #[serde(default)]
    sentences: Vec<Sentence>,
}

#[derive(Debug, Deserialize)]
struct Sentence {
    text: String,
    start: i64,
    end: i64,
    speaker: Option<String>,
}

/// AssemblyAI client: upload the audio, submit a transcript job, poll to
/// completion, then fetch sentence-level results with speaker labels.
pub struct AssemblyClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

/// Network-level reqwest failures are retriable; anything the provider
/// said about the job itself is semantic.
fn transient(err: reqwest::Error) -> PipelineError {
    PipelineError::TranscriptionTransient(err.to_string())
}

impl AssemblyClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        let base_url = endpoint.unwrap_or_else(|| "https://api.assemblyai.com/v2".to_string());

        info!("Initialized AssemblyAI provider with base URL: {}", base_url);

        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            poll_interval,
            timeout,
        }
    }

    /// Upload the audio file and get back a provider-hosted URL.
    async fn upload_audio(&self, audio_path: &Path) -> Result<String, PipelineError> {
        let upload_url = format!("{}/upload", self.base_url);

        debug!("Uploading audio file to AssemblyAI: {:?}", audio_path);

        let audio_data = tokio::fs::read(audio_path)
            .await
            .map_err(|e| PipelineError::TranscriptionTransient(format!("read audio: {}", e)))?;

        let response = self
            .client
            .post(&upload_url)
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(audio_data)
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("AssemblyAI upload failed with status {}: {}", status, body);
            return Err(PipelineError::TranscriptionSemantic(format!(
                "upload rejected with status {}: {}",
                status, body
            )));
        }

        let upload_response: UploadResponse = response.json().await.map_err(transient)?;

        debug!("Audio uploaded successfully: {}", upload_response.upload_url);
        Ok(upload_response.upload_url)
    }

    /// Submit the transcription request with diarization flags.
    async fn submit_transcription(
        &self,
        audio_url: String,
        config: &TranscriptionConfig,
    ) -> Result<String, PipelineError> {
        let transcript_url = format!("{}/transcript", self.base_url);

        let request_body = TranscriptRequest {
            audio_url,
            speaker_labels: config.diarization,
            filter_profanity: config.filter_profanity,
            disfluencies: !config.remove_disfluencies,
        };

        debug!("Submitting transcription request to AssemblyAI");

        let response = self
            .client
            .post(&transcript_url)
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(
                "AssemblyAI transcription request failed with status {}: {}",
                status, body
            );
            return Err(PipelineError::TranscriptionSemantic(format!(
                "submit rejected with status {}: {}",
                status, body
            )));
        }

        let transcript_response: TranscriptResponse = response.json().await.map_err(transient)?;

        debug!("Transcription submitted with ID: {}", transcript_response.id);
        Ok(transcript_response.id)
    }

    /// Poll until the job completes or the timeout elapses.
    async fn poll_transcription(&self, transcript_id: &str) -> Result<(), PipelineError> {
        let poll_url = format!("{}/transcript/{}", self.base_url, transcript_id);
        let max_attempts = (self.timeout.as_secs() / self.poll_interval.as_secs().max(1)).max(1);

        for attempt in 1..=max_attempts {
            debug!(
                "Polling transcription status (attempt {}/{}): {}",
                attempt, max_attempts, transcript_id
            );

            let response = self
                .client
                .get(&poll_url)
                .header("Authorization", &self.api_key)
                .send()
                .await
                .map_err(transient)?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(PipelineError::TranscriptionSemantic(format!(
                    "poll rejected with status {}",
                    status
                )));
            }

            let transcript_response: TranscriptResponse =
                response.json().await.map_err(transient)?;

            match transcript_response.status {
                TranscriptStatus::Completed => return Ok(()),
                TranscriptStatus::Error => {
                    let error_msg = transcript_response
                        .error
                        .unwrap_or_else(|| "Unknown error".to_string());
                    error!("Transcription failed: {}", error_msg);
                    return Err(PipelineError::TranscriptionSemantic(error_msg));
                }
                TranscriptStatus::Queued | TranscriptStatus::Processing => {
                    debug!("Transcription still processing, waiting...");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(PipelineError::TranscriptionTransient(format!(
            "transcription timed out after {} seconds",
            self.timeout.as_secs()
        )))
    }

    /// Fetch the sentence-level results for a completed job.
    async fn fetch_sentences(
        &self,
        transcript_id: &str,
    ) -> Result<Vec<DiarizedSegment>, PipelineError> {
        let url = format!("{}/transcript/{}/sentences", self.base_url, transcript_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            return Err(PipelineError::TranscriptionSemantic(format!(
                "sentences request rejected with status {}",
                response.status()
            )));
        }

        let sentences: SentencesResponse = response.json().await.map_err(transient)?;

        Ok(sentences
            .sentences
            .into_iter()
            .map(|s| DiarizedSegment {
                label: s.speaker.unwrap_or_else(|| "A".to_string()),
                start_ms: s.start,
                end_ms: s.end,
                text: s.text,
            })
            .collect())
    }
}

#[async_trait]
impl TranscriptionClient for AssemblyClient {
    async fn transcribe(
        &self,
        audio_path: &Path,
        config: &TranscriptionConfig,
    ) -> Result<Vec<DiarizedSegment>, PipelineError> {
        info!("Transcribing audio file via AssemblyAI API: {:?}", audio_path);

        let audio_url = self.upload_audio(audio_path).await?;
        let transcript_id = self.submit_transcription(audio_url, config).await?;
        self.poll_transcription(&transcript_id).await?;
        let segments = self.fetch_sentences(&transcript_id).await?;

        info!("Transcription complete: {} segments", segments.len());
        Ok(segments)
    }
}
