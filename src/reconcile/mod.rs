//! Speaker reconciliation.
//!
//! Assigns a stable, human-meaningful speaker identity to each diarized
//! segment. Two strategies sit behind one interface: when the archive
//! carried a reference transcript with real names, `ReferenceAligner`
//! matches segments to reference sentences by time and text similarity;
//! otherwise `SyntheticLabeler` mints one opaque identity per diarization
//! label.

mod aligner;
mod similarity;

pub use aligner::ReferenceAligner;
pub use similarity::similarity;

use std::collections::HashMap;
use uuid::Uuid;

use crate::archive::ReferenceTranscript;
use crate::transcription::DiarizedSegment;

/// A segment with its speaker identity resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub speaker: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

/// Strategy for resolving diarization labels to speaker identities.
pub trait SpeakerResolver: Send + Sync {
    fn resolve(&self, segments: &[DiarizedSegment]) -> Vec<Utterance>;
}

/// Pick the strategy for this task's inputs.
pub fn resolver_for(reference: Option<ReferenceTranscript>) -> Box<dyn SpeakerResolver> {
    match reference {
        Some(reference) => Box::new(ReferenceAligner::new(reference)),
        None => Box::new(SyntheticLabeler::default()),
    }
}

/// Fallback strategy when no reference transcript is available.
///
/// Each distinct diarization label gets a collision-resistant opaque
/// identity, generated once and reused for every segment sharing the
/// label within the task.
#[derive(Default)]
pub struct SyntheticLabeler;

impl SpeakerResolver for SyntheticLabeler {
    fn resolve(&self, segments: &[DiarizedSegment]) -> Vec<Utterance> {
        let mut identities: HashMap<&str, String> = HashMap::new();

        segments
            .iter()
            .map(|segment| {
                let speaker = identities
                    .entry(segment.label.as_str())
                    .or_insert_with(|| Uuid::new_v4().simple().to_string())
                    .clone();
                Utterance {
                    speaker,
                    start_ms: segment.start_ms,
                    end_ms: segment.end_ms,
                    text: segment.text.clone(),
                }
            })
            .collect()
    }
}
