//! WebSocket transport.
//!
//! Accepts TCP connections, upgrades them to WebSocket, and binds each one
//! to the broker: authentication parameters come from the upgrade request's
//! query string, inbound text frames go to [`Broker::route`], and a writer
//! task drains the connection's outbound queue onto the socket.
//!
//! Authentication happens after the upgrade so the refusal is visible to
//! the client: a failed connect gets a close frame with a policy-violation
//! code (1008) and nothing else - in particular, never a
//! `connection_established` frame.

use std::borrow::Cow;
use std::net::SocketAddr;

use futures::{Sink, SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trellis_core::{Clock, SessionStore};
use uuid::Uuid;

use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::broker::{Broker, ConnectParams};
use crate::directory::OrgDirectory;
use crate::error::ServerError;
use crate::registry::{CloseReason, Outbound};

/// Accept connections on `listener` and serve each one until the task is
/// cancelled.
pub async fn serve<S, C, D>(listener: TcpListener, broker: Broker<S, C, D>) -> Result<(), ServerError>
where
    S: SessionStore,
    C: Clock,
    D: OrgDirectory,
{
    let local = listener.local_addr()?;
    info!(%local, "listening for websocket connections");

    loop {
        let (stream, peer) = listener.accept().await?;
        let broker = broker.clone();
        tokio::spawn(async move {
            handle_socket(stream, peer, broker).await;
        });
    }
}

/// Upgrade one socket and run it to completion.
async fn handle_socket<S, C, D>(stream: TcpStream, peer: SocketAddr, broker: Broker<S, C, D>)
where
    S: SessionStore,
    C: Clock,
    D: OrgDirectory,
{
    let mut query = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        query = request.uri().query().map(str::to_owned);
        Ok(response)
    };

    let mut ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "websocket handshake failed");
            return;
        },
    };

    let Some(params) = query.as_deref().and_then(connect_params_from_query) else {
        debug!(%peer, "connect refused: missing or malformed parameters");
        refuse(&mut ws, "missing connection parameters").await;
        return;
    };
    let user_id = params.user_id;

    let (handle, rx) = match broker.connect(params).await {
        Ok(accepted) => accepted,
        Err(e) => {
            debug!(%peer, %user_id, error = %e, "connect refused");
            refuse(&mut ws, &e.to_string()).await;
            return;
        },
    };
    let connection_id = handle.connection_id();

    let (sink, mut source) = ws.split();
    let writer = tokio::spawn(write_outbound(sink, rx));

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(raw)) => broker.route(&handle, &raw),
            Ok(Message::Close(_)) => break,
            // Ping/pong are answered by the protocol layer.
            Ok(_) => {},
            Err(e) => {
                debug!(%peer, %user_id, error = %e, "websocket read failed");
                break;
            },
        }
    }

    broker.disconnect(user_id, connection_id);
    drop(handle);
    if let Err(e) = writer.await {
        warn!(%peer, %user_id, error = %e, "writer task failed");
    }
    debug!(%peer, %user_id, connection_id, "connection closed");
}

/// Drain a connection's outbound queue onto the socket.
///
/// Ends when the queue closes (disconnect dropped the last sender) or a
/// close is requested.
async fn write_outbound<W>(mut sink: W, mut rx: mpsc::Receiver<Outbound>)
where
    W: Sink<Message> + Unpin,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if sink.send(Message::Text(frame.as_ref().clone())).await.is_err() {
                    break;
                }
            },
            Outbound::Close(reason) => {
                let (code, text) = match reason {
                    CloseReason::Superseded => (CloseCode::Normal, "superseded"),
                    CloseReason::ServerShutdown => (CloseCode::Away, "server shutting down"),
                };
                let frame = CloseFrame { code, reason: Cow::Borrowed(text) };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            },
        }
    }
}

/// Refuse an already-upgraded connection with a policy-violation close.
async fn refuse<W>(ws: &mut W, reason: &str)
where
    W: Sink<Message> + Unpin,
{
    let frame =
        CloseFrame { code: CloseCode::Policy, reason: Cow::Owned(reason.to_owned()) };
    let _ = ws.send(Message::Close(Some(frame))).await;
}

/// Extract connect parameters from the upgrade request's query string.
///
/// Expects `token` and `userId`, optionally `organizationId`. Values are
/// percent-decoded as raw query components (a literal `+` stays a `+`); a
/// malformed `userId`/`organizationId` refuses the connect rather than
/// being ignored.
fn connect_params_from_query(query: &str) -> Option<ConnectParams> {
    let mut token = None;
    let mut user_id = None;
    let mut organization_id = None;

    for pair in query.split('&') {
        let (key, value) = pair.split_once('=')?;
        let value = percent_decode_str(value).decode_utf8().ok()?.into_owned();
        match key {
            "token" => token = Some(value),
            "userId" => user_id = Some(Uuid::parse_str(&value).ok()?),
            "organizationId" => organization_id = Some(Uuid::parse_str(&value).ok()?),
            // Unknown parameters are ignored.
            _ => {},
        }
    }

    Some(ConnectParams { token: token?, user_id: user_id?, organization_id })
}
