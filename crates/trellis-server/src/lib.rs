//! Realtime connection and notification broker.
//!
//! The server side of Trellis's realtime surface: clients connect over
//! WebSocket with a bearer token, the token is resolved through the
//! cache-aside session layer in `trellis-core`, and the resulting
//! connection is registered for direct delivery and room-based fan-out of
//! project, task, and notification events.
//!
//! # Architecture
//!
//! - [`broker::Broker`] owns all connection state and implements the
//!   delivery operations.
//! - [`registry::ConnectionRegistry`] maps each user to their single live
//!   connection.
//! - [`rooms::RoomIndex`] tracks room membership in both directions.
//! - [`transport`] binds sockets to the broker.
//! - [`directory::OrgDirectory`] resolves a user's organization when the
//!   client does not declare one.

pub mod broker;
pub mod directory;
pub mod error;
pub mod registry;
pub mod rooms;
pub mod transport;

pub use broker::{Broker, BrokerConfig, ConnectError, ConnectParams};
pub use directory::{MemoryOrgDirectory, OrgDirectory};
pub use error::ServerError;
pub use registry::{CloseReason, ConnectionHandle, ConnectionRegistry, ConnectionStats, Outbound};
pub use rooms::RoomIndex;
