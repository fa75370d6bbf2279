//! Session lifecycle orchestration.
//!
//! One controller drives one session at a time through
//! `Idle -> Recording -> Stopping -> Persisting -> Idle`. It owns the
//! audio source, the annotation consumers and the per-session record;
//! collaborator results flow back to it over unbounded channels and are
//! folded into the record on every drain.

use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use super::audit::AuditLogger;
use super::consent::{ConsentProvider, TrainingConsentProvider};
use super::record::{SessionMetadata, SessionRecord};
use crate::annotate::{
    run_consumer, Diarizer, EmotionClassifier, EmotionEvent, SpeakerEvent, Transcriber,
    TranscriptSegment, TextRedactor,
};
use crate::audio::{spawn_vu_meter, AudioDevice, AudioSource, AudioWindow, DeviceError, WindowAccumulator};
use crate::config::Config;
use crate::crypto::{CryptoError, SessionEnvelope};
use crate::persist::{persist_session, PersistError, SessionDirs};
use crate::redact::RedactionReconciler;

/// Replacement line recorded when a segment could not be redacted. The raw
/// text never reaches redacted outputs.
const REDACTION_FAILED_PLACEHOLDER: &str = "[REDACTION_FAILED]";

/// How long stop waits for each consumer before aborting it.
const CONSUMER_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Stopping,
    Persisting,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("recording consent was declined")]
    ConsentDeclined,
    #[error("a session is already in progress")]
    AlreadyRecording,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("audit log unavailable: {0}")]
    Audit(#[source] anyhow::Error),
}

/// The external model integrations a session needs.
pub struct SessionCollaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub diarizer: Arc<dyn Diarizer>,
    pub emotion: Arc<dyn EmotionClassifier>,
    pub redactor: Arc<dyn TextRedactor>,
    pub consent: Arc<dyn ConsentProvider>,
    pub training_consent: Arc<dyn TrainingConsentProvider>,
}

struct ActiveSession {
    record: SessionRecord,
    envelope: SessionEnvelope,
    dirs: SessionDirs,
    audit: AuditLogger,
    source: AudioSource,
    reconciler: RedactionReconciler,
    stop_flag: Arc<AtomicBool>,
    consumers: Vec<(&'static str, JoinHandle<()>)>,
    meter_task: JoinHandle<()>,
    capture_loss_reported: bool,
    level_rx: watch::Receiver<f64>,
    transcript_rx: mpsc::UnboundedReceiver<TranscriptSegment>,
    speaker_rx: mpsc::UnboundedReceiver<SpeakerEvent>,
    emotion_rx: mpsc::UnboundedReceiver<EmotionEvent>,
}

pub struct SessionController {
    config: Config,
    collaborators: SessionCollaborators,
    state: SessionState,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(config: Config, collaborators: SessionCollaborators) -> Self {
        Self {
            config,
            collaborators,
            state: SessionState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Live input level of the running session, if any.
    pub fn level_receiver(&self) -> Option<watch::Receiver<f64>> {
        self.active.as_ref().map(|a| a.level_rx.clone())
    }

    /// Obtain consent, set up the artifact directories, the encryption
    /// envelope and the annotation pipeline, then start capture.
    ///
    /// Returns the new session's id.
    pub async fn start_session(&mut self, device: Box<dyn AudioDevice>) -> Result<String, ControllerError> {
        if self.state != SessionState::Idle {
            return Err(ControllerError::AlreadyRecording);
        }

        let consent = self
            .collaborators
            .consent
            .obtain_consent()
            .ok_or(ControllerError::ConsentDeclined)?;

        let unique = uuid::Uuid::new_v4().simple().to_string();
        let session_id = format!(
            "session_{}_{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            &unique[..8]
        );
        info!("Starting session {}", session_id);

        let dirs = SessionDirs::create(&self.config.storage.sessions_output_dir, &session_id)?;
        let audit = AuditLogger::new(dirs.standard.join("session_audit_log"))
            .map_err(ControllerError::Audit)?;
        audit.log("SESSION_CREATED", json!({ "session_id": session_id }));
        audit.log(
            "CONSENT_GIVEN",
            json!({
                "timestamp": consent.timestamp.to_rfc3339(),
                "expires_at": consent.expires_at.map(|t| t.to_rfc3339()),
            }),
        );

        let mut envelope = match self.config.crypto.master_password.as_deref() {
            Some(password) if !password.is_empty() => SessionEnvelope::with_master_key(
                password,
                self.config.crypto.kdf_salt.as_bytes(),
                self.config.crypto.kdf_iterations,
            )?,
            _ => SessionEnvelope::without_master_key(),
        };
        envelope.begin_session()?;

        let mut source = AudioSource::new(
            self.config.audio.sample_rate,
            self.config.audio.subscriber_capacity,
        );
        let clock = source.clock();

        let transcription_rx = source.subscribe("transcription")?;
        let diarization_rx = source.subscribe("diarization")?;
        let emotion_rx_frames = source.subscribe("emotion")?;
        let vu_rx = source.subscribe("vu_meter")?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        let (speaker_tx, speaker_rx) = mpsc::unbounded_channel();
        let (emotion_tx, emotion_rx) = mpsc::unbounded_channel();

        let transcriber = Arc::clone(&self.collaborators.transcriber);
        let transcription_task = tokio::spawn(run_consumer(
            "transcription",
            transcription_rx,
            WindowAccumulator::new(clock, self.config.windows.transcription_seconds, 0.0),
            transcript_tx,
            Arc::clone(&stop_flag),
            move |window: AudioWindow| {
                let transcriber = Arc::clone(&transcriber);
                async move {
                    let start = window.start_time_seconds;
                    let segments = transcriber.transcribe(&window).await?;
                    Ok(segments.into_iter().map(|s| s.offset_by(start)).collect())
                }
            },
        ));

        let diarizer = Arc::clone(&self.collaborators.diarizer);
        let diarization_task = tokio::spawn(run_consumer(
            "diarization",
            diarization_rx,
            WindowAccumulator::new(clock, self.config.windows.diarization_seconds, 0.0),
            speaker_tx,
            Arc::clone(&stop_flag),
            move |window: AudioWindow| {
                let diarizer = Arc::clone(&diarizer);
                async move {
                    let start = window.start_time_seconds;
                    let events = diarizer.diarize(&window).await?;
                    Ok(events.into_iter().map(|e| e.offset_by(start)).collect())
                }
            },
        ));

        let emotion = Arc::clone(&self.collaborators.emotion);
        let emotion_task = tokio::spawn(run_consumer(
            "emotion",
            emotion_rx_frames,
            WindowAccumulator::new(
                clock,
                self.config.windows.emotion_seconds,
                self.config.windows.emotion_overlap_seconds,
            ),
            emotion_tx,
            Arc::clone(&stop_flag),
            move |window: AudioWindow| {
                let emotion = Arc::clone(&emotion);
                async move {
                    let start = window.start_time_seconds;
                    let events = emotion.classify(&window).await?;
                    Ok(events.into_iter().map(|e| e.offset_by(start)).collect())
                }
            },
        ));

        let (level_rx, meter_task) = spawn_vu_meter(vu_rx, Arc::clone(&stop_flag));

        let device_name = device.name().to_string();
        source.start(device).await?;
        audit.log(
            "RECORDING_STARTED",
            json!({
                "device": device_name,
                "sample_rate": self.config.audio.sample_rate,
            }),
        );

        let record = SessionRecord::new(session_id.clone(), consent);
        self.active = Some(ActiveSession {
            record,
            envelope,
            dirs,
            audit,
            source,
            reconciler: RedactionReconciler::new(Arc::clone(&self.collaborators.redactor)),
            stop_flag,
            consumers: vec![
                ("emotion", emotion_task),
                ("diarization", diarization_task),
                ("transcription", transcription_task),
            ],
            meter_task,
            capture_loss_reported: false,
            level_rx,
            transcript_rx,
            speaker_rx,
            emotion_rx,
        });
        self.state = SessionState::Recording;

        Ok(session_id)
    }

    /// Fold everything the consumers have produced so far into the session
    /// record, redacting new transcript segments as they arrive.
    ///
    /// Called periodically while recording and once more after the
    /// consumers have stopped, so nothing transcribed is left unredacted.
    pub async fn drain_pending(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        // Capture can die mid-session (device failure, end of input) while
        // the controller is still in Recording; surface that once so the
        // caller knows to stop and collect the partial session.
        if self.state == SessionState::Recording
            && !active.capture_loss_reported
            && active.source.capture_finished()
        {
            warn!(
                "Capture for session {} has ended; stop the session to finalize it",
                active.record.session_id
            );
            active.capture_loss_reported = true;
        }

        while let Ok(segment) = active.transcript_rx.try_recv() {
            active.record.transcript.push(segment.clone());

            match active.reconciler.process(&segment).await {
                Ok(redaction) => {
                    if !redaction.records.is_empty() {
                        let types: Vec<&str> = redaction
                            .records
                            .iter()
                            .map(|r| r.entity.entity_type.as_str())
                            .collect();
                        active.audit.log(
                            "PII_DETECTED",
                            json!({
                                "count": redaction.records.len(),
                                "entity_types": types,
                                "segment_start_seconds": segment.start_seconds,
                            }),
                        );
                    }
                    active.record.mute_intervals.extend(redaction.mute_intervals());
                    active.record.redacted_transcript.push(redaction.redacted_text);
                    active.record.phi_entities.extend(redaction.records);
                }
                Err(e) => {
                    // The raw text stays in the full transcript only; the
                    // redacted outputs get a placeholder and the session is
                    // marked degraded.
                    warn!("Redaction failed for segment at {:.2}s: {}", segment.start_seconds, e);
                    active
                        .record
                        .redacted_transcript
                        .push(REDACTION_FAILED_PLACEHOLDER.to_string());
                    active.record.degraded = true;
                }
            }
        }

        while let Ok(event) = active.speaker_rx.try_recv() {
            active.record.speaker_events.push(event);
        }
        while let Ok(event) = active.emotion_rx.try_recv() {
            active.record.emotions.push(event);
        }
    }

    /// Stop the running session, drain the pipeline and persist every
    /// artifact. Returns `None` when no session is running.
    pub async fn stop_session(&mut self) -> Result<Option<SessionMetadata>, ControllerError> {
        if self.state != SessionState::Recording || self.active.is_none() {
            info!("Stop requested with no session running");
            return Ok(None);
        }
        self.state = SessionState::Stopping;

        let result = self.stop_inner().await;

        // The controller is reusable whatever happened to this session.
        self.state = SessionState::Idle;
        self.active = None;

        result.map(Some)
    }

    async fn stop_inner(&mut self) -> Result<SessionMetadata, ControllerError> {
        let active = self.active.as_mut().expect("checked by stop_session");
        info!("Stopping session {}", active.record.session_id);
        active.audit.log(
            "RECORDING_STOPPED",
            json!({ "session_id": active.record.session_id }),
        );

        active.stop_flag.store(true, Ordering::SeqCst);

        let finalized = match active.source.stop().await {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!("Audio finalization failed: {}", e);
                active.record.degraded = true;
                None
            }
        };

        for (name, task) in active.consumers.drain(..) {
            match timeout(CONSUMER_JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Consumer '{}' panicked: {}", name, e);
                    active.record.degraded = true;
                }
                Err(_) => {
                    warn!("Consumer '{}' did not stop within {:?}, aborting", name, CONSUMER_JOIN_TIMEOUT);
                    active.record.degraded = true;
                }
            }
        }
        active.meter_task.abort();

        if let Some(audio) = finalized {
            active.record.degraded |= audio.degraded;
            active.record.audio = Some(audio);
        }
        active.record.stopped_at = Some(chrono::Utc::now());

        // Final drain after every consumer has exited, so all in-flight
        // results are reconciled before persisting.
        self.drain_pending().await;

        // The speaker set is only known now; collect per-speaker AI
        // training consent before the record is frozen.
        let active = self.active.as_mut().expect("checked by stop_session");
        let speakers = active.record.speaker_labels();
        if !speakers.is_empty() {
            let consent_map = self
                .collaborators
                .training_consent
                .obtain_training_consent(&speakers);
            active.audit.log(
                "AI_TRAINING_CONSENT",
                json!({ "per_speaker": &consent_map }),
            );
            active.record.ai_training_consent = consent_map;
        }

        self.state = SessionState::Persisting;
        let active = self.active.as_mut().expect("checked by stop_session");
        let metadata = persist_session(&active.record, &mut active.envelope, &active.dirs, &active.audit)?;
        active.envelope.finalize();

        info!("Session {} complete", metadata.session_id);
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{AnnotateError, Redaction};
    use crate::audio::SyntheticDevice;
    use crate::session::consent::{AutoConsent, DeclineConsent, GrantAllTrainingConsent};
    use async_trait::async_trait;

    struct NullTranscriber;
    #[async_trait]
    impl Transcriber for NullTranscriber {
        async fn transcribe(&self, _window: &AudioWindow) -> Result<Vec<TranscriptSegment>, AnnotateError> {
            Ok(vec![])
        }
    }

    struct NullDiarizer;
    #[async_trait]
    impl Diarizer for NullDiarizer {
        async fn diarize(&self, _window: &AudioWindow) -> Result<Vec<SpeakerEvent>, AnnotateError> {
            Ok(vec![])
        }
    }

    struct NullEmotion;
    #[async_trait]
    impl EmotionClassifier for NullEmotion {
        async fn classify(&self, _window: &AudioWindow) -> Result<Vec<EmotionEvent>, AnnotateError> {
            Ok(vec![])
        }
    }

    struct PassthroughRedactor;
    #[async_trait]
    impl TextRedactor for PassthroughRedactor {
        async fn redact(&self, text: &str) -> Result<Redaction, AnnotateError> {
            Ok(Redaction {
                redacted_text: text.to_string(),
                entities: vec![],
            })
        }
    }

    fn collaborators(consent: Arc<dyn ConsentProvider>) -> SessionCollaborators {
        SessionCollaborators {
            transcriber: Arc::new(NullTranscriber),
            diarizer: Arc::new(NullDiarizer),
            emotion: Arc::new(NullEmotion),
            redactor: Arc::new(PassthroughRedactor),
            consent,
            training_consent: Arc::new(GrantAllTrainingConsent),
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.sessions_output_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_consent_declined_blocks_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = SessionController::new(
            test_config(dir.path()),
            collaborators(Arc::new(DeclineConsent)),
        );

        let device = Box::new(SyntheticDevice::new(16000, 1600, 10));
        let err = controller.start_session(device).await.unwrap_err();
        assert!(matches!(err, ControllerError::ConsentDeclined));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = SessionController::new(
            test_config(dir.path()),
            collaborators(Arc::new(AutoConsent)),
        );

        controller
            .start_session(Box::new(SyntheticDevice::new(16000, 1600, 100)))
            .await
            .unwrap();
        let err = controller
            .start_session(Box::new(SyntheticDevice::new(16000, 1600, 100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyRecording));

        controller.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = SessionController::new(
            test_config(dir.path()),
            collaborators(Arc::new(AutoConsent)),
        );

        let outcome = controller.stop_session().await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_full_lifecycle_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = SessionController::new(
            test_config(dir.path()),
            collaborators(Arc::new(AutoConsent)),
        );

        let session_id = controller
            .start_session(Box::new(SyntheticDevice::new(16000, 1600, 20).with_amplitude(1000)))
            .await
            .unwrap();
        assert_eq!(controller.state(), SessionState::Recording);

        // Let the synthetic device run out of frames.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let metadata = controller.stop_session().await.unwrap().expect("metadata");
        assert_eq!(metadata.session_id, session_id);
        assert!(metadata.initial_recording_consent.consent_given);
        assert!((metadata.duration_seconds - 2.0).abs() < 1e-9);
        assert_eq!(controller.state(), SessionState::Idle);

        let standard = dir.path().join(&session_id).join("standard");
        assert!(standard.join("full_audio.wav").exists());
        assert!(standard.join("metadata.json").exists());
        assert!(standard.join("session_audit_log").exists());
    }
}
