use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::auth::Session;
use crate::manager::Manager;
use crate::ui::{SubscribeMessage, CLIENT_CHANNEL_CAPACITY};

/// `GET /api/updates`: upgrade to the UI push protocol. The client sends
/// `{topics: [...]}` subscription messages; the bus pushes
/// `{topic, data}` frames.
pub async fn connect(
    req: HttpRequest,
    stream: web::Payload,
    manager: web::Data<Manager>,
    _session: Session,
) -> actix_web::Result<HttpResponse> {
    let (response, ws_session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let client_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_CHANNEL_CAPACITY);

    let manager = manager.into_inner();
    manager.ui.register_client(client_id, tx).await;
    debug!(client = %client_id, "UI client connecting");

    // Sender task: bus frames out to the socket.
    let mut sender_session = ws_session.clone();
    actix_web::rt::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender_session.text(frame).await.is_err() {
                break;
            }
        }
    });

    // Reader task: subscription messages in, until the client goes away.
    let mut reader_session = ws_session;
    actix_web::rt::spawn(async move {
        while let Some(msg) = msg_stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let parsed: SubscribeMessage = match serde_json::from_str(&text) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!(client = %client_id, "illegal subscribe message: {e}");
                            continue;
                        }
                    };

                    let mut valid = true;
                    for topic in &parsed.topics {
                        if let Err(e) = topic.validate() {
                            debug!(client = %client_id, "illegal topic: {e}");
                            valid = false;
                            break;
                        }
                    }
                    if !valid {
                        continue;
                    }

                    debug!(client = %client_id, topics = parsed.topics.len(), "UI client subscribed");
                    manager.ui.subscribe(client_id, parsed.topics).await;
                }
                Ok(Message::Ping(payload)) => {
                    if reader_session.pong(&payload).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(reason)) => {
                    debug!(client = %client_id, ?reason, "UI client closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(client = %client_id, "UI transport error: {e}");
                    break;
                }
            }
        }

        manager.ui.remove_client(client_id).await;
    });

    Ok(response)
}
