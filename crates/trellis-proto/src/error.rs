//! Protocol error taxonomy.

/// Errors produced while decoding an inbound frame.
///
/// Each variant carries enough detail to build the `error` frame sent back
/// to the client. None of these are fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("malformed JSON frame: {0}")]
    Malformed(String),

    /// The frame had no string `"type"` discriminator.
    #[error("frame is missing a string \"type\" discriminator")]
    MissingType,

    /// The `"type"` discriminator named no known message kind.
    #[error("unknown message type \"{0}\"")]
    UnknownType(String),

    /// The `"type"` was recognized but the payload fields did not decode.
    #[error("invalid \"{kind}\" payload: {reason}")]
    InvalidPayload {
        /// The recognized message type.
        kind: String,
        /// Decode failure detail.
        reason: String,
    },
}
