//! Server error types.

/// Errors that can occur in the server runtime.
///
/// Broker operations themselves return counts and booleans, not errors -
/// failures local to one connection or recipient are contained and logged.
/// This type covers the surrounding runtime: startup configuration and the
/// listening socket.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error (invalid bind address, bad CLI values, ...).
    ///
    /// Fatal at startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (bind failure, accept failure, I/O error).
    ///
    /// May be transient (network issues) or fatal (address in use).
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
