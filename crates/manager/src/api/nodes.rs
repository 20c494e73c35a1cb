use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;

use super::auth::Session;
use super::ApiError;
use crate::manager::Manager;
use crate::session;

/// Frames from nodes can carry whole Wasm programs and interpreter
/// snapshots; allow them to be large but bounded.
const MAX_NODE_FRAME: usize = 64 * 1024 * 1024;

pub async fn list(
    _session: Session,
    manager: web::Data<Manager>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(manager.nodes.list().await))
}

/// `GET /api/node/connect`: upgrade to the binary node protocol and hand the
/// connection to a session task.
pub async fn connect(
    req: HttpRequest,
    stream: web::Payload,
    manager: web::Data<Manager>,
) -> actix_web::Result<HttpResponse> {
    let (response, ws_session, msg_stream) = actix_ws::handle(&req, stream)?;

    let msg_stream = msg_stream
        .max_frame_size(MAX_NODE_FRAME)
        .aggregate_continuations()
        .max_continuation_size(MAX_NODE_FRAME);

    let endpoint_ip = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!(%endpoint_ip, "node connecting");

    actix_web::rt::spawn(session::run(
        manager.into_inner(),
        ws_session,
        msg_stream,
        endpoint_ip,
    ));

    Ok(response)
}
