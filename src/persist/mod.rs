//! Session artifact persistence: the standard/encrypted directory pair.
//!
//! Every artifact is written and encrypted independently; one failure
//! never aborts the rest. Failures are collected into the metadata and
//! audit trail rather than raised mid-flow.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::audio::{write_wav, SampleClock};
use crate::crypto::SessionEnvelope;
use crate::redact::apply_mute_intervals;
use crate::session::{AuditLogger, EncryptionStatus, ManifestEntry, SessionMetadata, SessionRecord};

/// Persistence failures that abort the whole persist step (directory or
/// metadata problems). Per-artifact I/O failures are collected instead.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to create session directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to serialize session metadata: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write session metadata: {0}")]
    WriteMetadata(std::io::Error),
}

/// The per-session directory pair.
#[derive(Debug, Clone)]
pub struct SessionDirs {
    pub root: PathBuf,
    pub standard: PathBuf,
    pub encrypted: PathBuf,
}

impl SessionDirs {
    /// Create `<base>/<session_id>/{standard,encrypted}`.
    pub fn create(base: impl AsRef<Path>, session_id: &str) -> Result<Self, PersistError> {
        let root = base.as_ref().join(session_id);
        let standard = root.join("standard");
        let encrypted = root.join("encrypted");

        for dir in [&standard, &encrypted, &standard.join("voice_embeddings")] {
            std::fs::create_dir_all(dir).map_err(|source| PersistError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }

        Ok(Self {
            root,
            standard,
            encrypted,
        })
    }
}

/// Collects per-artifact outcomes while writing the standard/encrypted pair.
struct ArtifactSink<'a> {
    dirs: &'a SessionDirs,
    envelope: &'a mut SessionEnvelope,
    audit: &'a AuditLogger,
    manifest: Vec<ManifestEntry>,
    failures: Vec<String>,
    encrypted_count: usize,
}

impl<'a> ArtifactSink<'a> {
    fn new(dirs: &'a SessionDirs, envelope: &'a mut SessionEnvelope, audit: &'a AuditLogger) -> Self {
        Self {
            dirs,
            envelope,
            audit,
            manifest: Vec::new(),
            failures: Vec::new(),
            encrypted_count: 0,
        }
    }

    /// Write `bytes` as a standard artifact and mirror it encrypted.
    /// Returns whether the standard copy was written.
    fn store_bytes(&mut self, name: &str, bytes: &[u8]) -> bool {
        let path = self.dirs.standard.join(name);
        match std::fs::write(&path, bytes) {
            Ok(()) => {
                self.audit.log("FILE_SAVED", json!({ "filename": name }));
                let encrypted = self.mirror_encrypted(name, bytes);
                self.manifest.push(ManifestEntry {
                    standard: format!("standard/{}", name),
                    encrypted,
                });
                true
            }
            Err(e) => {
                self.record_failure(name, &format!("write failed: {}", e));
                false
            }
        }
    }

    /// Register an artifact that was already written to the standard
    /// directory (WAV files, the audit log) and mirror it encrypted.
    fn register_written(&mut self, name: &str) {
        let path = self.dirs.standard.join(name);
        self.audit.log("FILE_SAVED", json!({ "filename": name }));

        let encrypted = match std::fs::read(&path) {
            Ok(bytes) => self.mirror_encrypted(name, &bytes),
            Err(e) => {
                // The standard copy exists but could not be re-read for
                // encryption; keep it in the manifest unencrypted.
                self.failures
                    .push(format!("{}: read-back for encryption failed: {}", name, e));
                None
            }
        };

        self.manifest.push(ManifestEntry {
            standard: format!("standard/{}", name),
            encrypted,
        });
    }

    fn mirror_encrypted(&mut self, name: &str, bytes: &[u8]) -> Option<String> {
        if !self.envelope.encrypting() {
            return None;
        }

        let enc_name = format!("{}.enc", name);
        let payload = match self.envelope.encrypt_artifact(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                self.failures.push(format!("{}: encryption failed: {}", name, e));
                return None;
            }
        };

        let enc_path = self.dirs.encrypted.join(&enc_name);
        if let Some(dir) = enc_path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                self.failures
                    .push(format!("{}: encrypted dir creation failed: {}", name, e));
                return None;
            }
        }

        match std::fs::write(&enc_path, payload) {
            Ok(()) => {
                self.encrypted_count += 1;
                self.audit.log(
                    "FILE_ENCRYPTED",
                    json!({ "filename": enc_name, "algorithm": "AES-GCM" }),
                );
                Some(format!("encrypted/{}", enc_name))
            }
            Err(e) => {
                self.failures
                    .push(format!("{}: encrypted write failed: {}", name, e));
                None
            }
        }
    }

    fn record_failure(&mut self, name: &str, reason: &str) {
        warn!("Artifact '{}' not persisted: {}", name, reason);
        self.audit
            .log("PERSIST_FAILURE", json!({ "filename": name, "reason": reason }));
        self.failures.push(format!("{}: {}", name, reason));
    }
}

/// Persist every session artifact, then the metadata describing them.
///
/// If any artifact was successfully encrypted, the wrapped session key is
/// written alongside so that artifact stays recoverable even when later
/// steps failed.
pub fn persist_session(
    record: &SessionRecord,
    envelope: &mut SessionEnvelope,
    dirs: &SessionDirs,
    audit: &AuditLogger,
) -> Result<SessionMetadata, PersistError> {
    info!("Persisting session {} to {}", record.session_id, dirs.root.display());

    let mut sink = ArtifactSink::new(dirs, envelope, audit);

    // Audio artifacts. The redacted copy zeroes every mute interval.
    match &record.audio {
        Some(audio) => {
            let clock = SampleClock::new(audio.sample_rate);

            match write_wav(dirs.standard.join("full_audio.wav"), &audio.samples, audio.sample_rate) {
                Ok(()) => sink.register_written("full_audio.wav"),
                Err(e) => sink.record_failure("full_audio.wav", &e.to_string()),
            }

            let mut redacted = audio.samples.clone();
            apply_mute_intervals(&mut redacted, clock, &record.mute_intervals);
            match write_wav(dirs.standard.join("redacted_audio.wav"), &redacted, audio.sample_rate) {
                Ok(()) => sink.register_written("redacted_audio.wav"),
                Err(e) => sink.record_failure("redacted_audio.wav", &e.to_string()),
            }
        }
        None => {
            sink.record_failure("full_audio.wav", "no audio was captured");
        }
    }

    // Text artifacts.
    sink.store_bytes("transcript.txt", record.transcript_text().as_bytes());
    sink.store_bytes("redacted.txt", record.redacted_text().as_bytes());

    // Voice embeddings, one JSON vector per diarized turn that carried one.
    // Only files actually written end up in the per-speaker references.
    let mut voice_print_refs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut embedding_index = 0usize;
    for event in &record.speaker_events {
        if let Some(embedding) = &event.embedding {
            let name = format!("voice_embeddings/{}_{}.json", event.speaker_label, embedding_index);
            embedding_index += 1;
            match serde_json::to_vec(embedding) {
                Ok(bytes) => {
                    if sink.store_bytes(&name, &bytes) {
                        voice_print_refs
                            .entry(event.speaker_label.clone())
                            .or_default()
                            .push(format!("standard/{}", name));
                    }
                }
                Err(e) => sink.record_failure(&name, &format!("serialization failed: {}", e)),
            }
        }
    }

    // The audit log has been written in place throughout the session.
    sink.register_written("session_audit_log");

    // Metadata goes last and includes its own manifest entry.
    let artifacts_encrypted = sink.encrypted_count > 0;
    let mut manifest = std::mem::take(&mut sink.manifest);
    let failures = std::mem::take(&mut sink.failures);
    drop(sink);

    let encrypting = envelope.encrypting();
    manifest.push(ManifestEntry {
        standard: "standard/metadata.json".to_string(),
        encrypted: encrypting.then(|| "encrypted/metadata.json.enc".to_string()),
    });

    let metadata = SessionMetadata {
        session_id: record.session_id.clone(),
        session_start_time: record.started_at,
        session_end_time: record.stopped_at.or_else(|| Some(Utc::now())),
        initial_recording_consent: record.consent.clone(),
        degraded: record.degraded,
        duration_seconds: record.audio.as_ref().map(|a| a.duration_seconds).unwrap_or(0.0),
        speaker_voice_prints: record.voice_print_counts(),
        voice_print_file_references: voice_print_refs,
        ai_training_consent_per_speaker: record.ai_training_consent.clone(),
        phi_entities: record.phi_entities.clone(),
        mute_intervals: record.mute_intervals.clone(),
        emotion_annotations: record.emotions.clone(),
        encryption_status: EncryptionStatus::from_state(
            envelope.state(),
            envelope.master_key_provided(),
            envelope.session_key_generated(),
        ),
        file_manifest: manifest,
        persistence_failures: failures,
    };

    let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;
    std::fs::write(dirs.standard.join("metadata.json"), &metadata_bytes)
        .map_err(PersistError::WriteMetadata)?;
    audit.log("FILE_SAVED", json!({ "filename": "metadata.json" }));

    let mut metadata_encrypted = false;
    if envelope.encrypting() {
        match envelope.encrypt_artifact(&metadata_bytes) {
            Ok(payload) => {
                if let Err(e) = std::fs::write(dirs.encrypted.join("metadata.json.enc"), payload) {
                    warn!("Failed to write encrypted metadata: {}", e);
                } else {
                    metadata_encrypted = true;
                    audit.log(
                        "FILE_ENCRYPTED",
                        json!({ "filename": "metadata.json.enc", "algorithm": "AES-GCM" }),
                    );
                }
            }
            Err(e) => warn!("Failed to encrypt metadata: {}", e),
        }
    }

    // The wrapped session key goes to disk whenever anything was encrypted,
    // metadata mirror included, so every encrypted artifact stays
    // recoverable. A key write failure at this point can only be audited;
    // the metadata is already frozen.
    if artifacts_encrypted || metadata_encrypted {
        if let Some(wrapped) = envelope.wrapped_session_key() {
            match std::fs::write(dirs.encrypted.join("session_key.enc"), wrapped) {
                Ok(()) => audit.log("FILE_SAVED", json!({ "filename": "session_key.enc" })),
                Err(e) => {
                    warn!("Failed to write wrapped session key: {}", e);
                    audit.log(
                        "PERSIST_FAILURE",
                        json!({ "filename": "session_key.enc", "reason": e.to_string() }),
                    );
                }
            }
        }
    }

    audit.log(
        "SESSION_PERSISTED",
        json!({
            "session_id": metadata.session_id,
            "artifacts": metadata.file_manifest.len(),
            "failures": metadata.persistence_failures.len(),
            "degraded": metadata.degraded,
        }),
    );

    info!(
        "Session {} persisted: {} artifacts, {} failures",
        metadata.session_id,
        metadata.file_manifest.len(),
        metadata.persistence_failures.len()
    );

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt_data, derive_master_key, unwrap_session_key};
    use crate::session::{ConsentRecord, SessionRecord};

    const SALT: &[u8] = b"test-salt";
    const ITERATIONS: u32 = 1000;

    fn encrypting_envelope() -> SessionEnvelope {
        let mut envelope = SessionEnvelope::with_master_key("pw", SALT, ITERATIONS).unwrap();
        envelope.begin_session().unwrap();
        envelope
    }

    #[test]
    fn test_session_key_written_when_only_metadata_encrypts() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = SessionDirs::create(dir.path(), "s1").unwrap();
        let audit = AuditLogger::new(dirs.standard.join("session_audit_log")).unwrap();

        // Occupy every artifact's encrypted-mirror path with a directory so
        // those writes fail; the metadata mirror stays writable.
        for name in ["transcript.txt.enc", "redacted.txt.enc", "session_audit_log.enc"] {
            std::fs::create_dir_all(dirs.encrypted.join(name)).unwrap();
        }

        let record = SessionRecord::new("s1".into(), ConsentRecord::granted_now());
        let mut envelope = encrypting_envelope();
        let metadata = persist_session(&record, &mut envelope, &dirs, &audit).unwrap();

        assert!(metadata
            .file_manifest
            .iter()
            .filter(|e| e.standard != "standard/metadata.json")
            .all(|e| e.encrypted.is_none()));
        assert!(!metadata.persistence_failures.is_empty());

        // The metadata mirror is the only encrypted artifact, and it must
        // still be recoverable: the wrapped key has to be on disk.
        assert!(dirs.encrypted.join("metadata.json.enc").exists());
        assert!(dirs.encrypted.join("session_key.enc").exists());

        let master = derive_master_key("pw", SALT, ITERATIONS).unwrap();
        let wrapped = std::fs::read(dirs.encrypted.join("session_key.enc")).unwrap();
        let session_key = unwrap_session_key(&wrapped, &master).unwrap();
        let payload = std::fs::read(dirs.encrypted.join("metadata.json.enc")).unwrap();
        let plaintext = decrypt_data(&payload, &session_key).unwrap();
        let recovered: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(recovered["session_id"], "s1");
    }

    #[test]
    fn test_plaintext_envelope_writes_no_session_key() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = SessionDirs::create(dir.path(), "s2").unwrap();
        let audit = AuditLogger::new(dirs.standard.join("session_audit_log")).unwrap();

        let record = SessionRecord::new("s2".into(), ConsentRecord::granted_now());
        let mut envelope = SessionEnvelope::without_master_key();
        envelope.begin_session().unwrap();
        persist_session(&record, &mut envelope, &dirs, &audit).unwrap();

        assert!(!dirs.encrypted.join("session_key.enc").exists());
        assert!(!dirs.encrypted.join("metadata.json.enc").exists());
    }
}
