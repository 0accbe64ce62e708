//! Archive extraction.
//!
//! A recorded meeting lands in object storage as a tar bundle holding one
//! `.opus` audio payload and, when the meeting platform exported one, a
//! `.json` reference transcript with real speaker names. Extraction runs
//! in a scoped temp workspace that is removed on every exit path — the
//! `TempDir` travels inside `ExtractedArchive` and cleans up on drop.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

/// One speaker-named entry from the meeting platform's export.
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub person_name: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Reference transcript bundled inside the archive.
#[derive(Debug, Clone)]
pub struct ReferenceTranscript {
    pub meeting_start_time: DateTime<Utc>,
    pub meeting_end_time: Option<DateTime<Utc>>,
    pub entries: Vec<ReferenceEntry>,
}

/// Wire format of the exported reference file.
#[derive(Debug, Deserialize)]
struct RawReference {
    meeting_start_time: Option<String>,
    meeting_end_time: Option<String>,
    #[serde(default)]
    transcript: Vec<RawReferenceEntry>,
}

#[derive(Debug, Deserialize)]
struct RawReferenceEntry {
    #[serde(rename = "personName")]
    person_name: String,
    #[serde(rename = "timeStamp")]
    timestamp: String,
    #[serde(rename = "personTranscript")]
    text: String,
}

/// Result of unpacking a downloaded bundle.
///
/// The temp workspace lives as long as this value; `audio_path` points
/// inside it.
#[derive(Debug)]
pub struct ExtractedArchive {
    pub audio_path: PathBuf,
    pub reference: Option<ReferenceTranscript>,
    _workspace: TempDir,
}

/// Parse a `Z`-suffixed ISO-8601 timestamp, normalized to UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::ArchiveInvalid(format!("bad timestamp '{}': {}", value, e)))
}

/// Unpack the bundle at `tar_path` and locate its payloads.
///
/// A missing reference transcript is not an error; a missing audio payload
/// is fatal for the task, since no retry can fix a malformed upload.
pub fn extract(tar_path: &Path) -> Result<ExtractedArchive, PipelineError> {
    let workspace = TempDir::new()
        .map_err(|e| PipelineError::ArchiveInvalid(format!("workspace creation failed: {}", e)))?;

    unpack(tar_path, workspace.path())?;

    let mut audio_path = None;
    let mut reference_path = None;

    let entries = std::fs::read_dir(workspace.path())
        .map_err(|e| PipelineError::ArchiveInvalid(e.to_string()))?;
    for entry in entries {
        let path = entry
            .map_err(|e| PipelineError::ArchiveInvalid(e.to_string()))?
            .path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("opus") => audio_path = Some(path),
            Some("json") => reference_path = Some(path),
            _ => {}
        }
    }

    let audio_path = audio_path.ok_or_else(|| {
        PipelineError::AudioMissing(format!("no .opus entry in {:?}", tar_path))
    })?;

    let reference = match reference_path {
        Some(path) => parse_reference(&path)?,
        None => {
            warn!("No reference transcript in archive, speakers will be synthetic");
            None
        }
    };

    info!(
        "Archive extracted: audio={:?}, reference={}",
        audio_path.file_name().unwrap_or_default(),
        reference.is_some()
    );

    Ok(ExtractedArchive {
        audio_path,
        reference,
        _workspace: workspace,
    })
}

fn unpack(tar_path: &Path, dest: &Path) -> Result<(), PipelineError> {
    let mut file = File::open(tar_path)
        .map_err(|e| PipelineError::ArchiveInvalid(format!("cannot open bundle: {}", e)))?;

    // Bundles arrive plain or gzipped; sniff the gzip magic.
    let mut magic = [0u8; 2];
    let gzipped = file.read(&mut magic).ok() == Some(2) && magic == [0x1f, 0x8b];
    let file = File::open(tar_path)
        .map_err(|e| PipelineError::ArchiveInvalid(format!("cannot open bundle: {}", e)))?;

    let result = if gzipped {
        tar::Archive::new(GzDecoder::new(file)).unpack(dest)
    } else {
        tar::Archive::new(file).unpack(dest)
    };

    result.map_err(|e| PipelineError::ArchiveInvalid(format!("unpack failed: {}", e)))?;
    debug!("Bundle unpacked into {:?}", dest);
    Ok(())
}

fn parse_reference(path: &Path) -> Result<Option<ReferenceTranscript>, PipelineError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::ArchiveInvalid(format!("cannot read reference: {}", e)))?;

    let raw: RawReference = serde_json::from_str(&content)
        .map_err(|e| PipelineError::ArchiveInvalid(format!("bad reference JSON: {}", e)))?;

    if raw.transcript.is_empty() {
        debug!("Reference file has no transcript entries");
        return Ok(None);
    }

    let start = raw.meeting_start_time.as_deref().ok_or_else(|| {
        PipelineError::ArchiveInvalid("reference has transcript but no meeting_start_time".into())
    })?;
    let meeting_start_time = parse_timestamp(start)?;
    let meeting_end_time = raw
        .meeting_end_time
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;

    let mut entries = Vec::with_capacity(raw.transcript.len());
    for entry in raw.transcript {
        entries.push(ReferenceEntry {
            person_name: entry.person_name,
            timestamp: parse_timestamp(&entry.timestamp)?,
            text: entry.text,
        });
    }

    Ok(Some(ReferenceTranscript {
        meeting_start_time,
        meeting_end_time,
        entries,
    }))
}
