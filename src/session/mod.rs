//! Session lifecycle, consent, audit trail and persistence shapes.
//!
//! The [`SessionController`] drives the whole pipeline; the rest of the
//! module holds the pieces it records along the way: the consent decision,
//! the append-only audit log and the session record frozen into metadata
//! at persist time.

mod audit;
mod consent;
mod controller;
mod record;

pub use audit::AuditLogger;
pub use consent::{
    AutoConsent, ConsentProvider, ConsentRecord, DeclineAllTrainingConsent, DeclineConsent,
    GrantAllTrainingConsent, TrainingConsentProvider,
};
pub use controller::{ControllerError, SessionCollaborators, SessionController, SessionState};
pub use record::{EncryptionStatus, ManifestEntry, SessionMetadata, SessionRecord};
