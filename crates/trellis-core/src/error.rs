//! Session store error types.

/// Errors surfaced by a [`crate::SessionStore`] implementation.
///
/// The validator treats any store error on the authentication path as
/// "Invalid" (fail closed) - a cache-only result is never trusted past the
/// cache TTL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The system-of-record could not be reached or answered with an
    /// infrastructure failure.
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness invariant would be violated (duplicate session or
    /// refresh token).
    #[error("session store conflict: {0}")]
    Conflict(String),
}
