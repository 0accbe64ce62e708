//! Time-windowed alignment of diarized segments to reference sentences.
//!
//! Segment offsets are converted to absolute timestamps via the meeting
//! start time, reference entries are split into sentence-level units, and
//! a two-pointer sweep matches each segment against reference sentences
//! within a ±60 second window, scored by normalized text similarity. The
//! low-water pointer never retreats, so the sweep is linear in candidates
//! examined even though overlapping windows re-examine sentences.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::similarity::{normalize, similarity};
use super::{SpeakerResolver, Utterance};
use crate::archive::ReferenceTranscript;
use crate::transcription::DiarizedSegment;

/// Maximum distance between a segment and a matching reference sentence.
const MATCH_WINDOW_SECONDS: i64 = 60;

/// Minimum similarity for a reference sentence to qualify as a match.
const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Label assigned when no reference sentence qualifies.
const UNKNOWN_SPEAKER: &str = "Unknown Speaker";

struct ReferenceSentence {
    person_name: String,
    timestamp: DateTime<Utc>,
    normalized: String,
}

/// Resolves speakers by aligning segments against a reference transcript.
pub struct ReferenceAligner {
    meeting_start: DateTime<Utc>,
    sentences: Vec<ReferenceSentence>,
}

impl ReferenceAligner {
    pub fn new(reference: ReferenceTranscript) -> Self {
        let mut sentences = Vec::new();
        for entry in &reference.entries {
            for sentence in split_sentences(&entry.text) {
                sentences.push(ReferenceSentence {
                    person_name: entry.person_name.clone(),
                    timestamp: entry.timestamp,
                    normalized: normalize(&sentence),
                });
            }
        }
        // Chronological after splitting; the stable sort preserves the
        // original scan order for sentences sharing a timestamp.
        sentences.sort_by_key(|s| s.timestamp);

        Self {
            meeting_start: reference.meeting_start_time,
            sentences,
        }
    }
}

impl SpeakerResolver for ReferenceAligner {
    fn resolve(&self, segments: &[DiarizedSegment]) -> Vec<Utterance> {
        let window = Duration::seconds(MATCH_WINDOW_SECONDS);

        // The sweep assumes non-decreasing segment times.
        let mut ordered: Vec<&DiarizedSegment> = segments.iter().collect();
        ordered.sort_by_key(|s| s.start_ms);

        let mut low = 0;
        let mut utterances = Vec::with_capacity(ordered.len());

        for segment in ordered {
            let segment_time = self.meeting_start + Duration::milliseconds(segment.start_ms);
            let segment_text = normalize(&segment.text);

            // Skip reference sentences that fell out of every future window.
            while low < self.sentences.len()
                && self.sentences[low].timestamp < segment_time - window
            {
                low += 1;
            }

            let mut best: Option<(Duration, &ReferenceSentence)> = None;
            let mut cursor = low;
            while cursor < self.sentences.len()
                && self.sentences[cursor].timestamp <= segment_time + window
            {
                let candidate = &self.sentences[cursor];
                let time_diff = (segment_time - candidate.timestamp).abs();
                let score = similarity(&segment_text, &candidate.normalized);
                if score >= SIMILARITY_THRESHOLD {
                    // Smallest time difference wins; strict comparison keeps
                    // the earliest qualifying sentence on ties.
                    let closer = match &best {
                        Some((best_diff, _)) => time_diff < *best_diff,
                        None => true,
                    };
                    if closer {
                        best = Some((time_diff, candidate));
                    }
                }
                cursor += 1;
            }

            let speaker = match best {
                Some((_, sentence)) => sentence.person_name.clone(),
                None => {
                    debug!(
                        "No reference match for segment at {}ms, using fallback",
                        segment.start_ms
                    );
                    UNKNOWN_SPEAKER.to_string()
                }
            };

            utterances.push(Utterance {
                speaker,
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
                text: segment.text.clone(),
            });
        }

        utterances
    }
}

/// Split text into sentence-level units on terminal punctuation.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() && trimmed.chars().any(|c| c.is_alphanumeric()) {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}
