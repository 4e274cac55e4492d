//! Router I/O (spec.md §4.8): four linked tasks sharing three live
//! sockets — the query router, the contents router and the telemetry
//! pub socket — and shuttling messages between them and the in-process
//! channels the workers consume. The query router socket is shared
//! between `inbound_pump`/`outbound_pump`, and the contents router
//! socket between `contents_inbound_pump`/`contents_outbound_pump`, via
//! `connect_routers`: ZMQ ROUTER peer identities are scoped to the
//! connection that received them, so each pair must read and write
//! through the same socket instance.
//!
//! All four tasks here are meant to be spawned together and linked by the
//! supervisor (`supervisor.rs`): if any one returns an error, the others
//! are aborted and the daemon exits (spec.md §4.8, §7).

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::contents::{ContentsInboundMessage, ContentsReply};
use crate::error::VaultaireError;
use crate::workers::{InboundMessage, Reply};

pub const QUERY_PORT: u16 = 5571;
pub const CONTENTS_PORT: u16 = 5573;
pub const TELEMETRY_PORT: u16 = 5581;

fn endpoint(broker: &str, port: u16) -> String {
    format!("tcp://{broker}:{port}")
}

fn single_frame(bytes: impl Into<Bytes>) -> ZmqMessage {
    ZmqMessage::from(bytes.into())
}

fn multipart(frames: Vec<Bytes>) -> ZmqMessage {
    let mut iter = frames.into_iter();
    let mut message = single_frame(iter.next().unwrap_or_default());
    for frame in iter {
        message.push_back(frame);
    }
    message
}

/// Reads the 4 frames `[broker_env, client_env, origin, request_bytes]`
/// out of a ZMQ multipart message. Frame counts other than 4 are a
/// dropped ingress error, not a worker error (spec.md §4.6 step 1).
fn parse_query_frames(message: ZmqMessage) -> Option<InboundMessage> {
    let frames: Vec<Bytes> = message.into_vec();
    if frames.len() != 4 {
        warn!(count = frames.len(), "dropping query message with wrong frame count");
        return None;
    }
    Some(InboundMessage {
        broker_env: frames[0].to_vec(),
        client_env: frames[1].to_vec(),
        origin: frames[2].to_vec(),
        request_bytes: frames[3].to_vec(),
    })
}

/// Connects one `RouterSocket` to the query endpoint. The inbound and
/// outbound pumps share this same connected socket (wrapped by the
/// caller in `Arc<Mutex<_>>`) rather than each opening their own — ZMQ
/// ROUTER peer-routing identities are scoped to the connection that
/// received them, so a reply sent out a *different* `RouterSocket`
/// instance than the one that read the matching request would not route
/// back to the client (spec.md §4.8: "a single event-loop owning three
/// sockets").
async fn connect_query_router(broker: &str) -> Result<RouterSocket, VaultaireError> {
    let mut socket = RouterSocket::new();
    let address = endpoint(broker, QUERY_PORT);
    socket
        .connect(&address)
        .await
        .map_err(|e| VaultaireError::StartupError(format!("connecting query router to {address}: {e}")))?;
    info!(address, "query router connected");
    Ok(socket)
}

/// As `connect_query_router`, for the contents endpoint.
async fn connect_contents_router(broker: &str) -> Result<RouterSocket, VaultaireError> {
    let mut socket = RouterSocket::new();
    let address = endpoint(broker, CONTENTS_PORT);
    socket.connect(&address).await.map_err(|e| {
        VaultaireError::StartupError(format!("connecting contents router to {address}: {e}"))
    })?;
    info!(address, "contents router connected");
    Ok(socket)
}

/// Connects both router sockets this daemon needs up front, so the
/// supervisor can share each one between its inbound/outbound pump pair.
pub async fn connect_routers(
    broker: &str,
) -> Result<(Arc<Mutex<RouterSocket>>, Arc<Mutex<RouterSocket>>), VaultaireError> {
    let query = connect_query_router(broker).await?;
    let contents = connect_contents_router(broker).await?;
    Ok((Arc::new(Mutex::new(query)), Arc::new(Mutex::new(contents))))
}

fn parse_contents_frames(message: ZmqMessage) -> Option<ContentsInboundMessage> {
    let frames: Vec<Bytes> = message.into_vec();
    if frames.len() != 4 {
        warn!(count = frames.len(), "dropping contents message with wrong frame count");
        return None;
    }
    Some(ContentsInboundMessage {
        broker_env: frames[0].to_vec(),
        client_env: frames[1].to_vec(),
        origin: frames[3].to_vec(),
    })
}

/// Task 2: receives multipart from the query router, validates the frame
/// count, and forwards well-formed messages to the (single-slot) inbound
/// queue that feeds the reader worker pool. Shares `socket` with
/// `outbound_pump` — the two are the read and write halves of spec.md
/// §4.8's single query-router socket.
pub async fn inbound_pump(
    socket: Arc<Mutex<RouterSocket>>,
    inbound: mpsc::Sender<InboundMessage>,
) -> Result<(), VaultaireError> {
    loop {
        let message = socket
            .lock()
            .await
            .recv()
            .await
            .map_err(|e| VaultaireError::LinkedTaskFailure(format!("query router recv: {e}")))?;
        let Some(parsed) = parse_query_frames(message) else {
            continue;
        };
        if inbound.send(parsed).await.is_err() {
            return Ok(()); // worker pool shut down, nothing left to feed
        }
    }
}

/// Task 3: dequeues replies and sends the 3-frame outbound form over the
/// same socket `inbound_pump` reads from.
pub async fn outbound_pump(
    socket: Arc<Mutex<RouterSocket>>,
    mut outbound: mpsc::UnboundedReceiver<Reply>,
) -> Result<(), VaultaireError> {
    while let Some(reply) = outbound.recv().await {
        let message = multipart(vec![
            Bytes::from(reply.broker_env),
            Bytes::from(reply.client_env),
            Bytes::from(reply.payload),
        ]);
        socket
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| VaultaireError::LinkedTaskFailure(format!("query router send: {e}")))?;
    }
    Ok(())
}

/// Task 4a: contents inbound, analogous to `inbound_pump`, sharing its
/// socket with `contents_outbound_pump`.
pub async fn contents_inbound_pump(
    socket: Arc<Mutex<RouterSocket>>,
    inbound: mpsc::Sender<ContentsInboundMessage>,
) -> Result<(), VaultaireError> {
    loop {
        let message = socket
            .lock()
            .await
            .recv()
            .await
            .map_err(|e| VaultaireError::LinkedTaskFailure(format!("contents router recv: {e}")))?;
        let Some(parsed) = parse_contents_frames(message) else {
            continue;
        };
        if inbound.send(parsed).await.is_err() {
            return Ok(());
        }
    }
}

/// Task 4b: contents outbound, the 4-frame empty-delimiter form, over the
/// same socket `contents_inbound_pump` reads from.
pub async fn contents_outbound_pump(
    socket: Arc<Mutex<RouterSocket>>,
    mut outbound: mpsc::UnboundedReceiver<ContentsReply>,
) -> Result<(), VaultaireError> {
    while let Some(reply) = outbound.recv().await {
        let message = multipart(vec![
            Bytes::from(reply.broker_env),
            Bytes::from(reply.client_env),
            Bytes::new(),
            Bytes::from(reply.payload),
        ]);
        socket.lock().await.send(message).await.map_err(|e| {
            VaultaireError::LinkedTaskFailure(format!("contents router send: {e}"))
        })?;
    }
    Ok(())
}

/// Task 1: telemetry pump. Reads `(key, value, unit)` and publishes the
/// 5-frame `[key, value, unit, identifier, hostname]` message.
pub async fn telemetry_pump(
    broker: String,
    mut telemetry: mpsc::UnboundedReceiver<crate::workers::TelemetryEvent>,
    debug: bool,
) -> Result<(), VaultaireError> {
    let mut socket = zeromq::PubSocket::new();
    let address = endpoint(&broker, TELEMETRY_PORT);
    socket
        .connect(&address)
        .await
        .map_err(|e| VaultaireError::StartupError(format!("connecting telemetry pub to {address}: {e}")))?;

    let identifier = format!("{}/{}", env!("CARGO_PKG_NAME"), std::process::id());
    let hostname = gethostname();

    while let Some(event) = telemetry.recv().await {
        if debug {
            println!("{} {} {}", event.key, event.value, event.unit);
        }
        let message = multipart(vec![
            Bytes::from(event.key),
            Bytes::from(event.value),
            Bytes::from(event.unit),
            Bytes::from(identifier.clone()),
            Bytes::from(hostname.clone()),
        ]);
        socket
            .send(message)
            .await
            .map_err(|e| VaultaireError::LinkedTaskFailure(format!("telemetry pub send: {e}")))?;
    }
    debug!("telemetry pump exiting, channel closed");
    Ok(())
}

fn gethostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_formats_broker_and_port() {
        assert_eq!(endpoint("broker.example.com", QUERY_PORT), "tcp://broker.example.com:5571");
    }

    #[test]
    fn query_frames_with_wrong_count_are_rejected() {
        let message = multipart(vec![Bytes::from_static(b"only one frame")]);
        assert!(parse_query_frames(message).is_none());
    }

    #[test]
    fn query_frames_with_four_parts_parse_cleanly() {
        let message = multipart(vec![
            Bytes::from_static(b"broker-env"),
            Bytes::from_static(b"client-env"),
            Bytes::from_static(b"arithmetic"),
            Bytes::from_static(b"request-bytes"),
        ]);
        let parsed = parse_query_frames(message).expect("parses");
        assert_eq!(parsed.origin, b"arithmetic");
        assert_eq!(parsed.request_bytes, b"request-bytes");
    }
}
