//! Redaction reconciliation: translating text-level PII spans back into
//! audio-sample mute ranges.
//!
//! The transcriber and the redactor disagree slightly about tokenization
//! and offsets (punctuation, repeated substrings), so the mapping here is
//! deliberately tolerant: word spans are recomputed by forward substring
//! search with a fixed-width fallback, and a word counts as part of a PII
//! span under a four-way overlap test.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::annotate::{AnnotateError, PiiEntity, TextRedactor, TranscriptSegment, WordTimestamp};
use crate::audio::SampleClock;

/// An audio time range to be zeroed out in the redacted audio artifact.
/// Half-open; `start_seconds < end_seconds` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MuteInterval {
    pub start_seconds: f64,
    pub end_seconds: f64,
}

/// A detected entity together with its mapped audio interval, if any.
///
/// Entities whose text span could not be mapped to a non-degenerate audio
/// interval still appear here with `mute_interval: None`; "detected but
/// not mappable" is an audit-relevant outcome, not a silent drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhiRecord {
    pub entity: PiiEntity,
    pub mute_interval: Option<MuteInterval>,
    pub segment_start_seconds: f64,
}

/// Result of reconciling one transcript segment.
#[derive(Debug, Clone)]
pub struct SegmentRedaction {
    pub redacted_text: String,
    pub records: Vec<PhiRecord>,
}

impl SegmentRedaction {
    pub fn mute_intervals(&self) -> impl Iterator<Item = MuteInterval> + '_ {
        self.records.iter().filter_map(|r| r.mute_interval)
    }
}

/// Consumes transcript segments in arrival order, runs the external text
/// redactor and maps every detected entity back to an audio interval.
pub struct RedactionReconciler {
    redactor: Arc<dyn TextRedactor>,
}

impl RedactionReconciler {
    pub fn new(redactor: Arc<dyn TextRedactor>) -> Self {
        Self { redactor }
    }

    /// Redact one segment and map its entities onto the audio timeline.
    pub async fn process(&self, segment: &TranscriptSegment) -> Result<SegmentRedaction, AnnotateError> {
        let redaction = self.redactor.redact(&segment.text).await?;

        let spans = word_spans(&segment.text, &segment.words);
        let mut records = Vec::with_capacity(redaction.entities.len());

        for entity in redaction.entities {
            let mute_interval = map_entity_to_audio(&spans, &segment.words, &entity);
            if mute_interval.is_none() {
                warn!(
                    "Entity '{}' ({}..{}) detected but not mappable to audio",
                    entity.entity_type, entity.char_start, entity.char_end
                );
            } else {
                debug!(
                    "Entity '{}' mapped to {:?}",
                    entity.entity_type, mute_interval
                );
            }
            records.push(PhiRecord {
                entity,
                mute_interval,
                segment_start_seconds: segment.start_seconds,
            });
        }

        Ok(SegmentRedaction {
            redacted_text: redaction.redacted_text,
            records,
        })
    }
}

/// Recompute each word's byte span within the segment text.
///
/// The search only ever moves forward from the end of the previous word's
/// span, which keeps the mapping monotonic even when a word repeats earlier
/// in the text. When the word is not found from the current offset (the
/// transcriber's token and the raw text diverge, e.g. punctuation), the
/// word is assumed to occupy exactly `len(word)` bytes at the current
/// offset.
fn word_spans(text: &str, words: &[WordTimestamp]) -> Vec<(usize, usize)> {
    let mut spans = Vec::with_capacity(words.len());
    let mut current = 0usize;

    for word in words {
        let token = word.text.trim();
        let found = text
            .get(current..)
            .and_then(|rest| rest.find(token))
            .map(|i| current + i);

        let (start, end) = match found {
            Some(start) => (start, start + token.len()),
            None => (current, current + token.len()),
        };

        spans.push((start, end));
        current = end;
    }

    spans
}

/// Map one entity's character span to an audio interval.
///
/// A word belongs to the entity span if its own span starts inside it, ends
/// inside it, fully contains it, or is fully contained by it. The four
/// conditions are redundant on purpose: they absorb off-by-a-few offset
/// disagreements between the redactor and the transcriber. The interval is
/// the first overlapping word's start through the last overlapping word's
/// end, emitted only when non-degenerate.
fn map_entity_to_audio(
    spans: &[(usize, usize)],
    words: &[WordTimestamp],
    entity: &PiiEntity,
) -> Option<MuteInterval> {
    let (e_start, e_end) = (entity.char_start, entity.char_end);
    let mut first: Option<f64> = None;
    let mut last: Option<f64> = None;

    for (&(w_start, w_end), word) in spans.iter().zip(words) {
        let starts_inside = w_start >= e_start && w_start < e_end;
        let ends_inside = w_end > e_start && w_end <= e_end;
        let contains = w_start <= e_start && w_end >= e_end;
        let contained = w_start >= e_start && w_end <= e_end;

        if starts_inside || ends_inside || contains || contained {
            first.get_or_insert(word.start_seconds);
            last = Some(word.end_seconds);
        }
    }

    match (first, last) {
        (Some(start), Some(end)) if end > start => Some(MuteInterval {
            start_seconds: start,
            end_seconds: end,
        }),
        _ => None,
    }
}

/// Zero out the sample ranges covered by the mute intervals.
///
/// Intervals are clamped to the buffer; degenerate or out-of-range
/// intervals are ignored.
pub fn apply_mute_intervals(samples: &mut [i16], clock: SampleClock, intervals: &[MuteInterval]) {
    for interval in intervals {
        let start = clock.samples_for(interval.start_seconds).min(samples.len());
        let end = clock.samples_for(interval.end_seconds).min(samples.len());
        if start >= end {
            continue;
        }
        for sample in &mut samples[start..end] {
            *sample = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Redaction;
    use async_trait::async_trait;

    fn words_for(text: &str, word_duration: f64) -> Vec<WordTimestamp> {
        text.split_whitespace()
            .enumerate()
            .map(|(i, w)| WordTimestamp {
                text: w.to_string(),
                start_seconds: i as f64 * word_duration,
                end_seconds: (i + 1) as f64 * word_duration,
                confidence: 0.99,
            })
            .collect()
    }

    fn entity(text: &str, entity_type: &str, start: usize, end: usize) -> PiiEntity {
        PiiEntity {
            text: text.to_string(),
            entity_type: entity_type.to_string(),
            char_start: start,
            char_end: end,
            score: 0.9,
        }
    }

    /// Redactor stub driven by a fixed entity list.
    struct FixedRedactor {
        entities: Vec<PiiEntity>,
    }

    #[async_trait]
    impl TextRedactor for FixedRedactor {
        async fn redact(&self, text: &str) -> Result<Redaction, AnnotateError> {
            let mut redacted = text.to_string();
            // Replace from the rightmost entity so earlier offsets stay valid.
            let mut entities = self.entities.clone();
            entities.sort_by_key(|e| std::cmp::Reverse(e.char_start));
            for e in &entities {
                if e.char_end <= redacted.len() {
                    redacted.replace_range(e.char_start..e.char_end, &format!("<{}>", e.entity_type));
                }
            }
            Ok(Redaction {
                redacted_text: redacted,
                entities: self.entities.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_name_span_maps_to_word_boundaries() {
        let text = "My name is John Doe";
        let words = words_for(text, 0.5);
        let segment = TranscriptSegment {
            text: text.to_string(),
            words,
            start_seconds: 0.0,
        };

        // "John Doe" at chars 11..19
        let reconciler = RedactionReconciler::new(Arc::new(FixedRedactor {
            entities: vec![entity("John Doe", "PERSON", 11, 19)],
        }));

        let result = reconciler.process(&segment).await.unwrap();
        assert_eq!(result.redacted_text, "My name is <PERSON>");

        let interval = result.records[0].mute_interval.expect("should map");
        // start("John") = word 3 start, end("Doe") = word 4 end
        assert_eq!(interval.start_seconds, 1.5);
        assert_eq!(interval.end_seconds, 2.5);
    }

    #[tokio::test]
    async fn test_unmappable_entity_is_recorded_without_interval() {
        // Entity spans only inter-word punctuation: no word overlaps.
        let text = "hello , world";
        let words = vec![
            WordTimestamp {
                text: "hello".into(),
                start_seconds: 0.0,
                end_seconds: 0.5,
                confidence: 1.0,
            },
            WordTimestamp {
                text: "world".into(),
                start_seconds: 1.0,
                end_seconds: 1.5,
                confidence: 1.0,
            },
        ];
        let segment = TranscriptSegment {
            text: text.to_string(),
            words,
            start_seconds: 0.0,
        };

        // chars 6..7 is the bare comma between the two word spans
        let reconciler = RedactionReconciler::new(Arc::new(FixedRedactor {
            entities: vec![entity(",", "MISC", 6, 7)],
        }));

        let result = reconciler.process(&segment).await.unwrap();
        assert_eq!(result.records.len(), 1);
        assert!(result.records[0].mute_interval.is_none());
        assert_eq!(result.mute_intervals().count(), 0);
    }

    #[tokio::test]
    async fn test_redaction_is_idempotent_on_redacted_text() {
        let text = "Call <PHONE_NUMBER> now";
        let segment = TranscriptSegment {
            text: text.to_string(),
            words: words_for(text, 0.5),
            start_seconds: 0.0,
        };

        // A redactor finds nothing in already-redacted text.
        let reconciler = RedactionReconciler::new(Arc::new(FixedRedactor { entities: vec![] }));
        let result = reconciler.process(&segment).await.unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.redacted_text, text);
    }

    #[test]
    fn test_word_spans_forward_search_handles_repeats() {
        let text = "the cat and the dog";
        let words = words_for(text, 0.5);
        let spans = word_spans(text, &words);
        // Second "the" must resolve to offset 12, not back to 0.
        assert_eq!(spans, vec![(0, 3), (4, 7), (8, 11), (12, 15), (16, 19)]);
    }

    #[test]
    fn test_word_spans_fallback_when_token_missing() {
        let text = "alpha beta";
        let words = vec![
            WordTimestamp {
                text: "alpha".into(),
                start_seconds: 0.0,
                end_seconds: 0.5,
                confidence: 1.0,
            },
            WordTimestamp {
                // Token not present in the raw text at all.
                text: "gamma".into(),
                start_seconds: 0.5,
                end_seconds: 1.0,
                confidence: 1.0,
            },
        ];
        let spans = word_spans(text, &words);
        // The missing token occupies len("gamma") bytes at the current offset.
        assert_eq!(spans, vec![(0, 5), (5, 10)]);
    }

    #[test]
    fn test_apply_mute_intervals_zeroes_ranges() {
        let clock = SampleClock::new(1000);
        let mut samples: Vec<i16> = vec![7; 3000];

        apply_mute_intervals(
            &mut samples,
            clock,
            &[
                MuteInterval {
                    start_seconds: 0.5,
                    end_seconds: 1.0,
                },
                // Clamped at the buffer end.
                MuteInterval {
                    start_seconds: 2.5,
                    end_seconds: 10.0,
                },
            ],
        );

        assert_eq!(samples[499], 7);
        assert!(samples[500..1000].iter().all(|&s| s == 0));
        assert_eq!(samples[1000], 7);
        assert!(samples[2500..].iter().all(|&s| s == 0));
    }
}
