//! Identity and session synchronisation.
//!
//! [`IdentitySessionManager`] composes an [`IdentityProvider`] with the
//! [`SessionAuthority`] and publishes `{identity, role, loading}` through a
//! `watch` channel that dependents observe.

pub mod authority;
pub mod identity;
pub mod manager;

pub use agenthub_backend::{Feature, Role};
pub use authority::{SessionAuthority, SessionSyncError};
pub use identity::{Identity, IdentityProvider, LocalIdentityProvider, ProviderAuthError, SignInPrompt};
pub use manager::{IdentitySessionManager, SessionError, SessionPhase, SessionState};
