//! Wire envelope for the Trellis realtime broker.
//!
//! Every frame exchanged over a client connection is a JSON object with a
//! `"type"` discriminator. The envelope is a closed tagged union: inbound
//! frames decode into [`ClientMessage`], outbound frames encode from
//! [`ServerMessage`], and adding a variant forces every dispatch site to be
//! updated at compile time. Unrecognized or malformed frames surface as
//! [`ProtocolError`] so the broker can answer with an `error` frame instead
//! of dropping the connection.

mod error;
mod message;
mod room;

pub use error::ProtocolError;
pub use message::{ClientMessage, ServerMessage, parse_client_frame};
pub use room::RoomId;
