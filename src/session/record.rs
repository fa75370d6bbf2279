use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::consent::ConsentRecord;
use crate::annotate::{EmotionEvent, SpeakerEvent, TranscriptSegment};
use crate::audio::FinalizedAudio;
use crate::crypto::EnvelopeState;
use crate::redact::{MuteInterval, PhiRecord};

/// All state accumulated for one session.
///
/// Owned exclusively by the session controller and mutated only from its
/// control context; consumer results arrive via channels. Frozen into a
/// [`SessionMetadata`] at persist time; a session is either persisted
/// whole or marked failed in the audit trail.
#[derive(Debug)]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub consent: ConsentRecord,

    pub transcript: Vec<TranscriptSegment>,
    pub redacted_transcript: Vec<String>,
    pub phi_entities: Vec<PhiRecord>,
    pub mute_intervals: Vec<MuteInterval>,
    pub speaker_events: Vec<SpeakerEvent>,
    pub emotions: Vec<EmotionEvent>,
    /// Per-speaker AI training consent, collected after recording ends
    pub ai_training_consent: BTreeMap<String, bool>,

    pub audio: Option<FinalizedAudio>,
    /// Session terminated abnormally but partial artifacts were persisted
    pub degraded: bool,
}

impl SessionRecord {
    pub fn new(session_id: String, consent: ConsentRecord) -> Self {
        Self {
            session_id,
            started_at: Utc::now(),
            stopped_at: None,
            consent,
            transcript: Vec::new(),
            redacted_transcript: Vec::new(),
            phi_entities: Vec::new(),
            mute_intervals: Vec::new(),
            speaker_events: Vec::new(),
            emotions: Vec::new(),
            ai_training_consent: BTreeMap::new(),
            audio: None,
            degraded: false,
        }
    }

    /// Distinct speaker labels observed so far, sorted.
    pub fn speaker_labels(&self) -> Vec<String> {
        let labels: std::collections::BTreeSet<&str> = self
            .speaker_events
            .iter()
            .map(|e| e.speaker_label.as_str())
            .collect();
        labels.into_iter().map(String::from).collect()
    }

    /// Raw transcript text, one line per segment.
    pub fn transcript_text(&self) -> String {
        self.transcript
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Redacted transcript text, one line per segment.
    pub fn redacted_text(&self) -> String {
        self.redacted_transcript.join("\n")
    }

    /// Number of captured voice embeddings per speaker label.
    pub fn voice_print_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.speaker_events {
            if event.embedding.is_some() {
                *counts.entry(event.speaker_label.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Encryption posture recorded in metadata, so a reader can tell whether
/// the encrypted mirror exists without probing the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionStatus {
    pub master_key_provided: bool,
    pub session_key_generated: bool,
    pub mode: String,
}

impl EncryptionStatus {
    pub fn from_state(state: EnvelopeState, master_key_provided: bool, session_key_generated: bool) -> Self {
        Self {
            master_key_provided,
            session_key_generated,
            mode: format!("{:?}", state),
        }
    }
}

/// One artifact's standard/encrypted pairing in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub standard: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<String>,
}

/// The frozen, serializable form of a session, written as metadata.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub session_start_time: DateTime<Utc>,
    pub session_end_time: Option<DateTime<Utc>>,
    pub initial_recording_consent: ConsentRecord,
    pub degraded: bool,
    pub duration_seconds: f64,
    pub speaker_voice_prints: BTreeMap<String, usize>,
    /// Persisted embedding artifact paths per speaker
    pub voice_print_file_references: BTreeMap<String, Vec<String>>,
    pub ai_training_consent_per_speaker: BTreeMap<String, bool>,
    pub phi_entities: Vec<PhiRecord>,
    pub mute_intervals: Vec<MuteInterval>,
    pub emotion_annotations: Vec<EmotionEvent>,
    pub encryption_status: EncryptionStatus,
    pub file_manifest: Vec<ManifestEntry>,
    /// Per-artifact persistence failures, aggregated rather than raised
    /// mid-flow
    pub persistence_failures: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_print_counts_group_by_speaker() {
        let mut record = SessionRecord::new("s1".into(), ConsentRecord::granted_now());
        for (label, embedded) in [
            ("SPEAKER_00", true),
            ("SPEAKER_00", true),
            ("SPEAKER_01", true),
            ("SPEAKER_01", false),
        ] {
            record.speaker_events.push(SpeakerEvent {
                speaker_label: label.into(),
                start_seconds: 0.0,
                end_seconds: 1.0,
                embedding: embedded.then(|| vec![0.1, 0.2]),
            });
        }

        let counts = record.voice_print_counts();
        assert_eq!(counts["SPEAKER_00"], 2);
        assert_eq!(counts["SPEAKER_01"], 1);
    }

    #[test]
    fn test_transcript_text_joins_segments() {
        let mut record = SessionRecord::new("s1".into(), ConsentRecord::granted_now());
        for text in ["first segment", "second segment"] {
            record.transcript.push(TranscriptSegment {
                text: text.into(),
                words: vec![],
                start_seconds: 0.0,
            });
        }
        assert_eq!(record.transcript_text(), "first segment\nsecond segment");
    }

    #[test]
    fn test_speaker_labels_are_distinct_and_sorted() {
        let mut record = SessionRecord::new("s1".into(), ConsentRecord::granted_now());
        for label in ["SPEAKER_01", "SPEAKER_00", "SPEAKER_01"] {
            record.speaker_events.push(SpeakerEvent {
                speaker_label: label.into(),
                start_seconds: 0.0,
                end_seconds: 1.0,
                embedding: None,
            });
        }
        assert_eq!(record.speaker_labels(), vec!["SPEAKER_00", "SPEAKER_01"]);
    }
}
