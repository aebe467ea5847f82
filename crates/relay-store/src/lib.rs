//! Durable session state: the transcript file store, the cross-process
//! session write lock, and the definitions-plus-sidecar store used by
//! cron-style collaborators.

pub mod error;
pub mod lock;
pub mod sidecar;
pub mod transcript;

pub use error::StoreError;
pub use lock::{install_termination_cleanup, LockClaim, LockGuard, SessionLockManager};
pub use sidecar::{RuntimeState, SidecarStore};
pub use transcript::TranscriptStore;
