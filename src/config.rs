use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// Key derivation salt baked into the application. Sessions encrypted with
/// one build stay decryptable by the next.
pub const KDF_SALT: &str = "_eden_recorder_fixed_salt_v1.0_";

const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub windows: WindowConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Frame length handed to annotation subscribers, in milliseconds
    pub frame_ms: u32,
    /// Bound on each subscriber's fan-out channel, in frames
    pub subscriber_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_ms: 100,
            subscriber_capacity: 256,
        }
    }
}

/// Accumulation window lengths for the annotation consumers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub transcription_seconds: f64,
    pub diarization_seconds: f64,
    pub emotion_seconds: f64,
    pub emotion_overlap_seconds: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            transcription_seconds: 2.0,
            diarization_seconds: 5.0,
            emotion_seconds: 2.0,
            emotion_overlap_seconds: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sessions_output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sessions_output_dir: PathBuf::from("sessions_output"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub kdf_iterations: u32,
    pub kdf_salt: String,
    /// Master password for artifact encryption. Absent or empty means
    /// sessions are persisted in plaintext only.
    pub master_password: Option<String>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            kdf_salt: KDF_SALT.to_string(),
            master_password: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file, with `EDEN_`-prefixed
    /// environment variables layered on top. Missing keys fall back to the
    /// defaults above.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("EDEN").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
