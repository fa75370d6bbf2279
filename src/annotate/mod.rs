//! Annotation collaborator contracts and result types.
//!
//! The concrete models (speech-to-text, diarization, emotion, PII
//! detection) live outside this crate; the core consumes them only through
//! the narrow traits below. Annotators report times relative to the window
//! they were handed; `offset_by` shifts results onto the absolute session
//! timeline using the window's start time.

mod consumer;

pub use consumer::{run_consumer, CONSUMER_POLL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::AudioWindow;

/// Per-window annotation failure. Recoverable: the consumer logs it, rolls
/// the window offset back and continues with the next window.
#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("annotation failed: {0}")]
    Failed(String),
    #[error("annotator unavailable: {0}")]
    Unavailable(String),
}

/// A single recognized word with its audio span.
///
/// Within a segment, words are start-time ascending and non-overlapping by
/// contract; violations are a collaborator defect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub confidence: f64,
}

/// One transcribed window of audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub words: Vec<WordTimestamp>,
    pub start_seconds: f64,
}

impl TranscriptSegment {
    /// Shift all times by the window's absolute start.
    pub fn offset_by(mut self, seconds: f64) -> Self {
        self.start_seconds += seconds;
        for word in &mut self.words {
            word.start_seconds += seconds;
            word.end_seconds += seconds;
        }
        self
    }
}

/// One diarized speaker turn, optionally with a voice embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerEvent {
    pub speaker_label: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl SpeakerEvent {
    pub fn offset_by(mut self, seconds: f64) -> Self {
        self.start_seconds += seconds;
        self.end_seconds += seconds;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionScore {
    pub label: String,
    pub score: f64,
}

/// One emotion classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionEvent {
    pub timestamp_seconds: f64,
    pub label: String,
    pub score: f64,
    pub all_scores: Vec<EmotionScore>,
}

impl EmotionEvent {
    pub fn offset_by(mut self, seconds: f64) -> Self {
        self.timestamp_seconds += seconds;
        self
    }
}

/// A sensitive span detected in a segment's raw text.
///
/// `char_start`/`char_end` are byte offsets into the segment text, per the
/// redactor contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiEntity {
    pub text: String,
    pub entity_type: String,
    pub char_start: usize,
    pub char_end: usize,
    pub score: f64,
}

/// Output of the text-redaction collaborator.
#[derive(Debug, Clone)]
pub struct Redaction {
    pub redacted_text: String,
    pub entities: Vec<PiiEntity>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one window; times in results are window-relative.
    async fn transcribe(&self, window: &AudioWindow) -> Result<Vec<TranscriptSegment>, AnnotateError>;
}

#[async_trait]
pub trait Diarizer: Send + Sync {
    async fn diarize(&self, window: &AudioWindow) -> Result<Vec<SpeakerEvent>, AnnotateError>;
}

#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, window: &AudioWindow) -> Result<Vec<EmotionEvent>, AnnotateError>;
}

#[async_trait]
pub trait TextRedactor: Send + Sync {
    async fn redact(&self, text: &str) -> Result<Redaction, AnnotateError>;
}
