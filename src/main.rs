use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use eden_recorder::annotate::{AnnotateError, Redaction, TextRedactor, Transcriber, TranscriptSegment, WordTimestamp};
use eden_recorder::audio::AudioWindow;
use eden_recorder::session::{AutoConsent, GrantAllTrainingConsent, SessionCollaborators, SessionController};
use eden_recorder::{Config, SyntheticDevice};

#[derive(Parser, Debug)]
#[command(name = "eden-recorder", about = "Privacy-redacting audio session recorder")]
struct Cli {
    /// Path to a config file (TOML/YAML/JSON, extension optional)
    #[arg(long)]
    config: Option<String>,

    /// How much synthetic audio to record, in seconds
    #[arg(long, default_value_t = 6)]
    seconds: u64,

    /// Master password for artifact encryption (overrides config)
    #[arg(long)]
    password: Option<String>,
}

/// Demo transcriber: one canned sentence per window, words spread evenly.
struct CannedTranscriber;

#[async_trait]
impl Transcriber for CannedTranscriber {
    async fn transcribe(&self, window: &AudioWindow) -> Result<Vec<TranscriptSegment>, AnnotateError> {
        let text = "the patient is stable";
        let words: Vec<&str> = text.split(' ').collect();
        let step = window.duration_seconds / words.len() as f64;
        let words = words
            .iter()
            .enumerate()
            .map(|(i, w)| WordTimestamp {
                text: (*w).to_string(),
                start_seconds: i as f64 * step,
                end_seconds: (i as f64 + 0.9) * step,
                confidence: 0.99,
            })
            .collect();
        Ok(vec![TranscriptSegment {
            text: text.to_string(),
            words,
            start_seconds: 0.0,
        }])
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

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.password.is_some() {
        config.crypto.master_password = cli.password;
    }

    info!("Eden Recorder");
    info!("Sessions directory: {}", config.storage.sessions_output_dir.display());
    info!(
        "Encryption: {}",
        if config.crypto.master_password.is_some() { "enabled" } else { "disabled (plaintext only)" }
    );

    let collaborators = SessionCollaborators {
        transcriber: Arc::new(CannedTranscriber),
        diarizer: Arc::new(demo::SingleSpeaker),
        emotion: Arc::new(demo::Neutral),
        redactor: Arc::new(PassthroughRedactor),
        consent: Arc::new(AutoConsent),
        training_consent: Arc::new(GrantAllTrainingConsent),
    };

    let frame_samples = (config.audio.sample_rate as u64 * config.audio.frame_ms as u64 / 1000) as usize;
    let total_frames = (cli.seconds * 1000 / config.audio.frame_ms as u64) as usize;
    let device = Box::new(
        SyntheticDevice::new(config.audio.sample_rate, frame_samples, total_frames).with_amplitude(2000),
    );

    let mut controller = SessionController::new(config, collaborators);
    let session_id = controller.start_session(device).await?;
    info!("Recording session {}", session_id);

    let mut level_rx = controller.level_receiver().expect("session is recording");
    for _ in 0..cli.seconds {
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.drain_pending().await;
        let level = *level_rx.borrow_and_update();
        info!("Input level: {:.3}", level);
    }

    let metadata = controller.stop_session().await?.expect("session was running");
    info!(
        "Session {} persisted: {:.1}s of audio, {} artifacts, {} PHI entities",
        metadata.session_id,
        metadata.duration_seconds,
        metadata.file_manifest.len(),
        metadata.phi_entities.len(),
    );

    Ok(())
}

mod demo {
    use super::*;
    use eden_recorder::annotate::{Diarizer, EmotionClassifier, EmotionEvent, EmotionScore, SpeakerEvent};

    pub struct SingleSpeaker;

    #[async_trait]
    impl Diarizer for SingleSpeaker {
        async fn diarize(&self, window: &AudioWindow) -> Result<Vec<SpeakerEvent>, AnnotateError> {
            Ok(vec![SpeakerEvent {
                speaker_label: "SPEAKER_00".to_string(),
                start_seconds: 0.0,
                end_seconds: window.duration_seconds,
                embedding: None,
            }])
        }
    }

    pub struct Neutral;

    #[async_trait]
    impl EmotionClassifier for Neutral {
        async fn classify(&self, window: &AudioWindow) -> Result<Vec<EmotionEvent>, AnnotateError> {
            Ok(vec![EmotionEvent {
                timestamp_seconds: window.duration_seconds / 2.0,
                label: "neutral".to_string(),
                score: 0.8,
                all_scores: vec![EmotionScore {
                    label: "neutral".to_string(),
                    score: 0.8,
                }],
            }])
        }
    }
}
