pub mod cipher;
pub mod envelope;

pub use cipher::{
    decrypt_data, decrypt_file, derive_master_key, encrypt_data, encrypt_file,
    generate_session_key, unwrap_session_key, wrap_session_key, CryptoError, Key, KEY_LEN,
    NONCE_LEN,
};
pub use envelope::{EnvelopeState, SessionEnvelope};
