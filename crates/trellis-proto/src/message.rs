//! Typed JSON frames.
//!
//! The discriminator lives in the `"type"` field; payload fields are
//! camelCase to match the rest of the HTTP API surface. Outbound payload
//! bodies (`payload`) stay opaque [`serde_json::Value`]s - the broker routes
//! them, it does not interpret them.
//!
//! # Invariants
//!
//! - Every frame carries exactly one recognized `type`.
//! - Decoding is total: any input string maps to either a [`ClientMessage`]
//!   or a [`ProtocolError`], never a panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Inbound message types the router recognizes.
const CLIENT_MESSAGE_TYPES: &[&str] = &["join_project", "leave_project", "ping"];

/// Frames pushed from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame after a successful connect.
    ConnectionEstablished {
        /// Authenticated user.
        user_id: Uuid,
        /// Organization scope resolved at connect time.
        organization_id: Uuid,
        /// Server wall-clock time, epoch milliseconds.
        timestamp: i64,
    },

    /// Reported failure local to this connection.
    Error {
        /// Human-readable description.
        message: String,
        /// Server wall-clock time, epoch milliseconds.
        timestamp: i64,
    },

    /// One-to-one message pushed by the REST layer.
    DirectMessage {
        /// Opaque message body.
        payload: Value,
        /// Server wall-clock time, epoch milliseconds.
        timestamp: i64,
    },

    /// Organization-scoped notification.
    Notification {
        /// Opaque notification body.
        payload: Value,
        /// Server wall-clock time, epoch milliseconds.
        timestamp: i64,
    },

    /// Project-level change (board membership, settings, ...).
    ProjectUpdate {
        /// Opaque update body.
        payload: Value,
        /// Server wall-clock time, epoch milliseconds.
        timestamp: i64,
    },

    /// Card/task-level change within a project.
    TaskUpdate {
        /// Opaque update body.
        payload: Value,
        /// Server wall-clock time, epoch milliseconds.
        timestamp: i64,
    },

    /// Keepalive reply to a client `ping`.
    Pong {
        /// Server wall-clock time, epoch milliseconds.
        timestamp: i64,
    },
}

impl ServerMessage {
    /// Build an `error` frame.
    pub fn error(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::Error { message: message.into(), timestamp: now.timestamp_millis() }
    }

    /// Build the `connection_established` acknowledgment.
    pub fn connection_established(
        user_id: Uuid,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self::ConnectionEstablished {
            user_id,
            organization_id,
            timestamp: now.timestamp_millis(),
        }
    }

    /// The wire name of this message kind (the `"type"` value).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::Error { .. } => "error",
            Self::DirectMessage { .. } => "direct_message",
            Self::Notification { .. } => "notification",
            Self::ProjectUpdate { .. } => "project_update",
            Self::TaskUpdate { .. } => "task_update",
            Self::Pong { .. } => "pong",
        }
    }
}

/// Frames a client may send to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Subscribe to a project collaboration room.
    JoinProject {
        /// Target project.
        project_id: Uuid,
    },

    /// Unsubscribe from a project collaboration room.
    LeaveProject {
        /// Target project.
        project_id: Uuid,
    },

    /// Keepalive probe; answered with `pong`.
    Ping,
}

/// Decode a raw inbound frame into a [`ClientMessage`].
///
/// The `"type"` discriminator is extracted before full decoding so that an
/// unrecognized kind can be named in the error, and so a recognized kind
/// with bad fields is distinguishable from an unknown one.
pub fn parse_client_frame(raw: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_owned();

    if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value)
        .map_err(|e| ProtocolError::InvalidPayload { kind, reason: e.to_string() })
}
