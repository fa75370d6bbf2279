use serde::Serialize;
use tracing::info;

use super::cipher::{
    self, decrypt_data, encrypt_data, wrap_session_key, CryptoError, Key,
};

/// Lifecycle of the per-session encryption envelope.
///
/// `Encrypting` is entered lazily on the first artifact encryption;
/// without a master key the envelope stays in `PlaintextOnly` and nothing
/// is ever encrypted, which is recorded in the session metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnvelopeState {
    Uninitialized,
    MasterKeyReady,
    SessionKeyGenerated,
    Encrypting,
    PlaintextOnly,
    Finalized,
}

/// Owns the per-session AES-GCM key and wraps it under the master key.
///
/// The plaintext session key lives only in this struct for the session's
/// lifetime; the wrapped form is the only one that may be persisted.
pub struct SessionEnvelope {
    master_key: Option<Key>,
    session_key: Option<Key>,
    wrapped_session_key: Option<Vec<u8>>,
    state: EnvelopeState,
}

impl SessionEnvelope {
    /// Envelope without a master key: every artifact stays plaintext.
    pub fn without_master_key() -> Self {
        Self {
            master_key: None,
            session_key: None,
            wrapped_session_key: None,
            state: EnvelopeState::Uninitialized,
        }
    }

    /// Derive the master key from a password and salt.
    pub fn with_master_key(password: &str, salt: &[u8], iterations: u32) -> Result<Self, CryptoError> {
        let master_key = cipher::derive_master_key(password, salt, iterations)?;
        Ok(Self {
            master_key: Some(master_key),
            session_key: None,
            wrapped_session_key: None,
            state: EnvelopeState::MasterKeyReady,
        })
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn master_key_provided(&self) -> bool {
        self.master_key.is_some()
    }

    pub fn session_key_generated(&self) -> bool {
        self.session_key.is_some()
    }

    /// Generate and wrap this session's key, or settle into plaintext-only
    /// mode when no master key was supplied for the process.
    pub fn begin_session(&mut self) -> Result<(), CryptoError> {
        match self.master_key {
            Some(master_key) => {
                let session_key = cipher::generate_session_key();
                self.wrapped_session_key = Some(wrap_session_key(&session_key, &master_key)?);
                self.session_key = Some(session_key);
                self.state = EnvelopeState::SessionKeyGenerated;
                info!("Session key generated and wrapped under master key");
            }
            None => {
                self.state = EnvelopeState::PlaintextOnly;
                info!("No master key configured, session artifacts will be plaintext only");
            }
        }
        Ok(())
    }

    /// Whether artifacts should be encrypted at all.
    pub fn encrypting(&self) -> bool {
        self.session_key.is_some()
    }

    /// Encrypt one artifact under the session key.
    pub fn encrypt_artifact(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let session_key = self.session_key.ok_or_else(|| {
            CryptoError::KeyDerivation("no session key: envelope is plaintext-only".into())
        })?;
        let payload = encrypt_data(plaintext, &session_key)?;
        self.state = EnvelopeState::Encrypting;
        Ok(payload)
    }

    /// Decrypt one artifact under the session key (recovery/verification).
    pub fn decrypt_artifact(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let session_key = self.session_key.ok_or_else(|| {
            CryptoError::KeyDerivation("no session key: envelope is plaintext-only".into())
        })?;
        decrypt_data(payload, &session_key)
    }

    /// The wrapped session key, the only key form allowed on disk.
    pub fn wrapped_session_key(&self) -> Option<&[u8]> {
        self.wrapped_session_key.as_deref()
    }

    /// Drop key material; the envelope accepts no further operations.
    pub fn finalize(&mut self) {
        self.session_key = None;
        self.master_key = None;
        self.state = EnvelopeState::Finalized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::unwrap_session_key;

    const SALT: &[u8] = b"test-salt";
    const ITERATIONS: u32 = 1000;

    #[test]
    fn test_state_machine_with_master_key() {
        let mut envelope = SessionEnvelope::with_master_key("pw", SALT, ITERATIONS).unwrap();
        assert_eq!(envelope.state(), EnvelopeState::MasterKeyReady);

        envelope.begin_session().unwrap();
        assert_eq!(envelope.state(), EnvelopeState::SessionKeyGenerated);
        assert!(envelope.encrypting());

        let payload = envelope.encrypt_artifact(b"artifact bytes").unwrap();
        assert_eq!(envelope.state(), EnvelopeState::Encrypting);
        assert_eq!(envelope.decrypt_artifact(&payload).unwrap(), b"artifact bytes");

        envelope.finalize();
        assert_eq!(envelope.state(), EnvelopeState::Finalized);
        assert!(envelope.encrypt_artifact(b"more").is_err());
    }

    #[test]
    fn test_plaintext_only_never_encrypts() {
        let mut envelope = SessionEnvelope::without_master_key();
        envelope.begin_session().unwrap();

        assert_eq!(envelope.state(), EnvelopeState::PlaintextOnly);
        assert!(!envelope.encrypting());
        assert!(envelope.wrapped_session_key().is_none());
        assert!(envelope.encrypt_artifact(b"data").is_err());
    }

    #[test]
    fn test_wrapped_key_recovers_artifacts() {
        let master = cipher::derive_master_key("pw", SALT, ITERATIONS).unwrap();
        let mut envelope = SessionEnvelope::with_master_key("pw", SALT, ITERATIONS).unwrap();
        envelope.begin_session().unwrap();

        let artifact = envelope.encrypt_artifact(b"recoverable").unwrap();
        let wrapped = envelope.wrapped_session_key().unwrap().to_vec();
        envelope.finalize();

        // Recovery path: unwrap the persisted key, decrypt the artifact.
        let session_key = unwrap_session_key(&wrapped, &master).unwrap();
        assert_eq!(decrypt_data(&artifact, &session_key).unwrap(), b"recoverable");
    }
}
