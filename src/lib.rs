pub mod annotate;
pub mod audio;
pub mod config;
pub mod crypto;
pub mod persist;
pub mod redact;
pub mod session;

pub use audio::{AudioDevice, AudioFrame, AudioSource, AudioWindow, SampleClock, SyntheticDevice};
pub use config::Config;
pub use crypto::SessionEnvelope;
pub use redact::{MuteInterval, RedactionReconciler};
pub use session::{SessionCollaborators, SessionController, SessionMetadata, SessionState};
