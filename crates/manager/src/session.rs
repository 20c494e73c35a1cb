use std::sync::Arc;
use std::time::Duration;

use actix_ws::{AggregatedMessage, AggregatedMessageStream, CloseCode, CloseReason};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};

use reef_core::ids::NodeId;
use reef_core::types::NodeInfo;
use reef_core::Error;
use reef_protocol::codec::{decode_from_node, encode_to_node};
use reef_protocol::message::{MessageFromNode, MessageToNode};

use crate::manager::Manager;

/// Deadline for every outbound write on a node connection.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for the handshake response.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Write side of a node connection. The read side is owned exclusively by
/// the session task, so only writes need a lock.
#[async_trait]
pub trait NodeLink: Send + Sync {
    /// Encode and send one message, bounded by [`WRITE_TIMEOUT`].
    async fn send(&self, msg: &MessageToNode) -> Result<(), Error>;

    /// Reply to a websocket ping.
    async fn pong(&self, payload: &[u8]) -> Result<(), Error>;

    /// Best-effort close frame.
    async fn close(&self, reason: Option<CloseReason>);
}

pub struct WsNodeLink {
    session: Mutex<actix_ws::Session>,
}

impl WsNodeLink {
    pub fn new(session: actix_ws::Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

#[async_trait]
impl NodeLink for WsNodeLink {
    async fn send(&self, msg: &MessageToNode) -> Result<(), Error> {
        let frame = encode_to_node(msg).map_err(|e| Error::System(e.to_string()))?;

        let mut session = self.session.lock().await;
        tokio::time::timeout(WRITE_TIMEOUT, session.binary(frame))
            .await
            .map_err(|_| Error::System("node write timed out".to_string()))?
            .map_err(|_| Error::System("node connection closed".to_string()))
    }

    async fn pong(&self, payload: &[u8]) -> Result<(), Error> {
        let mut session = self.session.lock().await;
        tokio::time::timeout(WRITE_TIMEOUT, session.pong(payload))
            .await
            .map_err(|_| Error::System("node write timed out".to_string()))?
            .map_err(|_| Error::System("node connection closed".to_string()))
    }

    async fn close(&self, reason: Option<CloseReason>) {
        let session = self.session.lock().await.clone();
        if tokio::time::timeout(WRITE_TIMEOUT, session.close(reason))
            .await
            .is_err()
        {
            warn!("node did not acknowledge the close frame in time");
        }
    }
}

/// Drives one node connection: handshake, then the receive loop until the
/// connection dies or the node violates the protocol.
pub async fn run(
    manager: Arc<Manager>,
    session: actix_ws::Session,
    mut stream: AggregatedMessageStream,
    endpoint_ip: String,
) {
    let link = Arc::new(WsNodeLink::new(session));

    let node_id = match perform_handshake(&manager, link.clone(), &mut stream, &endpoint_ip).await {
        Ok(id) => id,
        Err(e) => {
            warn!(%endpoint_ip, "node handshake failed: {e}");
            link.close(Some(CloseReason::from(CloseCode::Protocol))).await;
            return;
        }
    };

    manager.notify_nodes().await;

    let close_reason = receive_loop(&manager, &link, &mut stream, node_id).await;
    manager.drop_node(node_id, close_reason).await;
}

/// Manager-initiated handshake: `init_handshake` out, `handshake_response`
/// in (with deadline), registry insert, `assign_id` out.
async fn perform_handshake(
    manager: &Manager,
    link: Arc<WsNodeLink>,
    stream: &mut AggregatedMessageStream,
    endpoint_ip: &str,
) -> Result<NodeId, Error> {
    link.send(&MessageToNode::InitHandshake).await?;

    let frame = match tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.next()).await {
        Err(_) => return Err(Error::Protocol("handshake response timed out".to_string())),
        Ok(None) => return Err(Error::Protocol("connection closed during handshake".to_string())),
        Ok(Some(Err(e))) => return Err(Error::Protocol(format!("transport error during handshake: {e}"))),
        Ok(Some(Ok(AggregatedMessage::Binary(bytes)))) => bytes,
        Ok(Some(Ok(other))) => {
            return Err(Error::Protocol(format!(
                "expected a binary handshake response, got {other:?}"
            )))
        }
    };

    let msg = decode_from_node(&frame).map_err(|e| Error::Protocol(e.to_string()))?;
    let (num_workers, node_name) = match msg {
        MessageFromNode::HandshakeResponse {
            num_workers,
            node_name,
        } => (num_workers, node_name),
        other => {
            return Err(Error::Protocol(format!(
                "expected a handshake response, got {}",
                kind_name(&other)
            )))
        }
    };

    let info = NodeInfo {
        endpoint_ip: endpoint_ip.to_string(),
        name: node_name,
        num_workers,
    };
    let node_id = manager.nodes.connect(info, link.clone()).await?;

    if let Err(e) = link
        .send(&MessageToNode::AssignId {
            node_id: *node_id.as_bytes(),
        })
        .await
    {
        warn!(node = %node_id, "could not deliver id to node: {e}");
        manager.drop_node(node_id, None).await;
        return Err(e);
    }

    Ok(node_id)
}

/// Receive loop. Returns the close reason to answer with when the session
/// ends; `None` means the peer is already gone.
async fn receive_loop(
    manager: &Manager,
    link: &Arc<WsNodeLink>,
    stream: &mut AggregatedMessageStream,
    node_id: NodeId,
) -> Option<CloseReason> {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(AggregatedMessage::Binary(bytes)) => {
                manager.register_ping(node_id).await;

                let decoded = match decode_from_node(&bytes) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!(node = %node_id, "undecodable frame from node: {e}");
                        return Some(CloseReason::from(CloseCode::Protocol));
                    }
                };

                if let Err(e) = handle_message(manager, link, node_id, decoded).await {
                    error!(node = %node_id, "failed to act upon node message: {e}");
                    return Some(CloseReason::from(CloseCode::Protocol));
                }
            }
            Ok(AggregatedMessage::Ping(payload)) => {
                if link.pong(&payload).await.is_err() {
                    return None;
                }
                manager.register_ping(node_id).await;
            }
            Ok(AggregatedMessage::Pong(_)) => {
                trace!(node = %node_id, "pong from node");
            }
            Ok(AggregatedMessage::Text(_)) => {
                warn!(node = %node_id, "ignoring text frame from node");
            }
            Ok(AggregatedMessage::Close(reason)) => {
                debug!(node = %node_id, ?reason, "node closed the connection");
                return None;
            }
            Err(e) => {
                debug!(node = %node_id, "transport error: {e}");
                return None;
            }
        }
    }

    None
}

async fn handle_message(
    manager: &Manager,
    link: &Arc<WsNodeLink>,
    node_id: NodeId,
    msg: MessageFromNode,
) -> Result<(), Error> {
    match msg {
        MessageFromNode::HandshakeResponse { .. } => {
            trace!(node = %node_id, "late handshake response, ignoring");
            Ok(())
        }
        MessageFromNode::StateSync(sync) => manager.state_sync(node_id, sync).await,
        MessageFromNode::JobResult(result) => manager.apply_result(node_id, result).await,
        MessageFromNode::Ping => {
            link.pong(b"").await?;
            manager.register_ping(node_id).await;
            Ok(())
        }
    }
}

fn kind_name(msg: &MessageFromNode) -> &'static str {
    match msg {
        MessageFromNode::HandshakeResponse { .. } => "handshake_response",
        MessageFromNode::StateSync(_) => "state_sync",
        MessageFromNode::JobResult(_) => "job_result",
        MessageFromNode::Ping => "ping",
    }
}
