use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm,
};
use sha2::Sha256;
use std::path::Path;
use tracing::debug;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// AES-GCM standard nonce length (96 bits).
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length.
const TAG_LEN: usize = 16;

pub type Key = [u8; KEY_LEN];

/// Crypto failures, kept distinguishable so callers can fail closed on
/// tampering without conflating it with operator mistakes.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Wrong key or tampered ciphertext. Never returns partial plaintext.
    #[error("authentication failed: wrong key or tampered data")]
    AuthenticationFailed,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("file not found: {path}")]
    NotFound { path: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn cipher_for(key: &Key) -> Aes256Gcm {
    Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key))
}

/// Derive a master key from a password via PBKDF2-HMAC-SHA256.
///
/// Deterministic for a fixed password + salt; the iteration count is
/// configurable so deployments can tune it upward.
pub fn derive_master_key(password: &str, salt: &[u8], iterations: u32) -> Result<Key, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::KeyDerivation("password cannot be empty".into()));
    }
    if iterations == 0 {
        return Err(CryptoError::KeyDerivation("iteration count must be positive".into()));
    }

    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    Ok(key)
}

/// Generate a random 256-bit session key.
pub fn generate_session_key() -> Key {
    Aes256Gcm::generate_key(OsRng).into()
}

/// Encrypt with AES-256-GCM; a fresh random nonce is prepended to the
/// ciphertext.
pub fn encrypt_data(plaintext: &[u8], key: &Key) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key);
    let nonce = Aes256Gcm::generate_nonce(OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::MalformedPayload("encryption failed".into()))?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(nonce.as_slice());
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

/// Exact inverse of [`encrypt_data`]. Fails closed: a wrong key or a
/// tampered payload yields `AuthenticationFailed`, never corrupted
/// plaintext.
pub fn decrypt_data(payload: &[u8], key: &Key) -> Result<Vec<u8>, CryptoError> {
    if payload.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedPayload(format!(
            "payload too short: {} bytes",
            payload.len()
        )));
    }

    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
    let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);

    cipher_for(key)
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Wrap (encrypt) a session key under the master key. Same nonce
/// discipline as artifact encryption.
pub fn wrap_session_key(session_key: &Key, master_key: &Key) -> Result<Vec<u8>, CryptoError> {
    encrypt_data(session_key, master_key)
}

/// Unwrap a previously wrapped session key.
pub fn unwrap_session_key(wrapped: &[u8], master_key: &Key) -> Result<Key, CryptoError> {
    let bytes = decrypt_data(wrapped, master_key)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedPayload("unwrapped key has wrong length".into()))
}

/// Read a file, encrypt its contents and write the payload to
/// `output_path`.
pub fn encrypt_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    key: &Key,
) -> Result<(), CryptoError> {
    let input_path = input_path.as_ref();
    let plaintext = std::fs::read(input_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CryptoError::NotFound {
            path: input_path.display().to_string(),
        },
        _ => CryptoError::Io(e),
    })?;

    let payload = encrypt_data(&plaintext, key)?;
    std::fs::write(output_path.as_ref(), payload)?;

    debug!(
        "Encrypted {} -> {}",
        input_path.display(),
        output_path.as_ref().display()
    );
    Ok(())
}

/// Decrypt an encrypted file back to plaintext on disk.
pub fn decrypt_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    key: &Key,
) -> Result<(), CryptoError> {
    let input_path = input_path.as_ref();
    let payload = std::fs::read(input_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CryptoError::NotFound {
            path: input_path.display().to_string(),
        },
        _ => CryptoError::Io(e),
    })?;

    let plaintext = decrypt_data(&payload, key)?;
    std::fs::write(output_path.as_ref(), plaintext)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = generate_session_key();
        for payload in [&b"x"[..], b"some secret data", &[0u8; 4096]] {
            let encrypted = encrypt_data(payload, &key).unwrap();
            assert_ne!(&encrypted[NONCE_LEN..], payload);
            let decrypted = decrypt_data(&encrypted, &key).unwrap();
            assert_eq!(decrypted, payload);
        }
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let key = generate_session_key();
        let other = generate_session_key();
        let encrypted = encrypt_data(b"secret", &key).unwrap();

        match decrypt_data(&encrypted, &other) {
            Err(CryptoError::AuthenticationFailed) => {}
            other => panic!("expected AuthenticationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_short_payload_is_malformed_not_auth_failure() {
        let key = generate_session_key();
        match decrypt_data(b"short", &key) {
            Err(CryptoError::MalformedPayload(_)) => {}
            other => panic!("expected MalformedPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let key = generate_session_key();
        let mut encrypted = encrypt_data(b"tamper target", &key).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;

        assert!(matches!(
            decrypt_data(&encrypted, &key),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let a = derive_master_key("correct horse", b"salt-1", 1000).unwrap();
        let b = derive_master_key("correct horse", b"salt-1", 1000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_salts_yield_different_keys() {
        let a = derive_master_key("correct horse", b"salt-1", 1000).unwrap();
        let b = derive_master_key("correct horse", b"salt-2", 1000).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_password_rejected() {
        assert!(matches!(
            derive_master_key("", b"salt", 1000),
            Err(CryptoError::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_session_key_wrap_round_trip() {
        let master = derive_master_key("pw", b"salt", 1000).unwrap();
        let session = generate_session_key();

        let wrapped = wrap_session_key(&session, &master).unwrap();
        assert_ne!(wrapped.as_slice(), session.as_slice());

        let unwrapped = unwrap_session_key(&wrapped, &master).unwrap();
        assert_eq!(unwrapped, session);
    }

    #[test]
    fn test_unwrap_with_wrong_master_key_fails() {
        let master = derive_master_key("pw", b"salt", 1000).unwrap();
        let wrong = derive_master_key("other", b"salt", 1000).unwrap();
        let wrapped = wrap_session_key(&generate_session_key(), &master).unwrap();

        assert!(matches!(
            unwrap_session_key(&wrapped, &wrong),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_file_encrypt_decrypt_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("artifact.txt");
        let encrypted = dir.path().join("artifact.txt.enc");
        let recovered = dir.path().join("recovered.txt");
        std::fs::write(&input, b"artifact contents").unwrap();

        let key = generate_session_key();
        encrypt_file(&input, &encrypted, &key).unwrap();
        assert_ne!(std::fs::read(&encrypted).unwrap(), b"artifact contents");

        decrypt_file(&encrypted, &recovered, &key).unwrap();
        assert_eq!(std::fs::read(&recovered).unwrap(), b"artifact contents");
    }

    #[test]
    fn test_encrypting_missing_file_reports_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = generate_session_key();

        match encrypt_file(dir.path().join("absent"), dir.path().join("out.enc"), &key) {
            Err(CryptoError::NotFound { path }) => assert!(path.ends_with("absent")),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
