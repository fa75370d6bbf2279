use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recorded consent decision for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub consent_given: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConsentRecord {
    /// Consent granted now, expiring one year out.
    pub fn granted_now() -> Self {
        let timestamp = Utc::now();
        Self {
            consent_given: true,
            expires_at: one_year_after(timestamp),
            timestamp,
        }
    }
}

/// Add one year, falling back to Feb 28 for a Feb 29 timestamp.
fn one_year_after(timestamp: DateTime<Utc>) -> Option<DateTime<Utc>> {
    timestamp
        .with_year(timestamp.year() + 1)
        .or_else(|| timestamp.with_day(28).and_then(|t| t.with_year(t.year() + 1)))
}

/// Consent capture seam. The interactive dialog lives outside the core;
/// `None` means consent was declined and recording must not start.
pub trait ConsentProvider: Send + Sync {
    fn obtain_consent(&self) -> Option<ConsentRecord>;
}

/// Headless provider that grants consent immediately (tests, demo runs).
pub struct AutoConsent;

impl ConsentProvider for AutoConsent {
    fn obtain_consent(&self) -> Option<ConsentRecord> {
        Some(ConsentRecord::granted_now())
    }
}

/// Provider that always declines, for exercising the refusal path.
pub struct DeclineConsent;

impl ConsentProvider for DeclineConsent {
    fn obtain_consent(&self) -> Option<ConsentRecord> {
        None
    }
}

/// Per-speaker AI training consent, collected once recording has ended and
/// the speakers present are known. The dialog lives outside the core.
pub trait TrainingConsentProvider: Send + Sync {
    fn obtain_training_consent(&self, speaker_labels: &[String]) -> BTreeMap<String, bool>;
}

/// Grants training consent for every speaker (tests, demo runs).
pub struct GrantAllTrainingConsent;

impl TrainingConsentProvider for GrantAllTrainingConsent {
    fn obtain_training_consent(&self, speaker_labels: &[String]) -> BTreeMap<String, bool> {
        speaker_labels.iter().map(|l| (l.clone(), true)).collect()
    }
}

/// Declines training consent for every speaker.
pub struct DeclineAllTrainingConsent;

impl TrainingConsentProvider for DeclineAllTrainingConsent {
    fn obtain_training_consent(&self, speaker_labels: &[String]) -> BTreeMap<String, bool> {
        speaker_labels.iter().map(|l| (l.clone(), false)).collect()
    }
}
