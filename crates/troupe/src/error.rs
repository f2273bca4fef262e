//! Public error types.

use thiserror::Error;

/// Errors surfaced at spawn time. No partially constructed actor is left
/// behind when spawning fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpawnError {
    /// Stackful actors require user-space context switching, which is not
    /// available on this target.
    #[error("context switching is not available on this platform")]
    ContextSwitchingUnavailable,
    /// The system has been shut down.
    #[error("the actor system is shut down")]
    SystemStopped,
}

/// Errors surfaced by acknowledged sends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The recipient terminated or never existed. A terminated actor is
    /// indistinguishable from a never-existing one.
    #[error("recipient terminated")]
    RecipientTerminated,
}
