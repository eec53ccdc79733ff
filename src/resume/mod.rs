//! Resume capability for download sessions
//!
//! Provides session fingerprints and finished-set persistence on top of the
//! checkpoint store.

pub mod fingerprint;
pub mod state;

pub use fingerprint::fingerprint;
pub use state::{
    resume_key, FinishedRecord, FinishedSet, ResumeError, ResumeSession, RESUME_NAMESPACE,
};
