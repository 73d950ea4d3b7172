//! WebSocket push transport.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream::SplitStream};
use relay_core::protocol::{ClientFrame, Control, ServerFrame};
use relay_hub::{Outbound, PushSession, SessionId};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::gateway::{Origin, RelayGateway};

/// Query parameters accepted on connect.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Origin id of the connecting client, for presence.
    pub origin_id: Option<String>,
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(gateway): State<Arc<RelayGateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, params.origin_id))
}

fn encode(frame: &ServerFrame) -> Option<Message> {
    match frame.to_json() {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!("Failed to serialize frame: {e}");
            None
        }
    }
}

fn outbound_to_ws(item: Outbound) -> Option<Message> {
    let frame = match item {
        Outbound::Ping => return Some(Message::Ping(Bytes::new())),
        Outbound::CatchUp(catch_up) => ServerFrame::history(catch_up),
        Outbound::Chat { message, index } => ServerFrame::Chat { message, index },
        Outbound::Notice(notice) => ServerFrame::Notice(notice),
    };
    encode(&frame)
}

async fn handle_socket(socket: WebSocket, gateway: Arc<RelayGateway>, origin: Option<String>) {
    let PushSession {
        id: session_id,
        mut outbound,
    } = gateway.connect_push(origin);
    let (mut sender, receiver) = socket.split();

    // Replies to this session only (presence, rejected publishes)
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                item = outbound.recv() => match item {
                    Some(item) => outbound_to_ws(item),
                    // Unregistered by the hub
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(frame) => encode(&frame),
                    None => break,
                },
            };
            let Some(message) = message else { continue };
            if sender.send(message).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Whichever side ends first ends the connection. A dropped session must
    // not leave the read half waiting on a silent peer.
    tokio::select! {
        () = read_loop(receiver, &gateway, session_id, reply_tx) => {}
        _ = &mut send_task => {
            tracing::debug!(%session_id, "push session dropped, closing connection");
        }
    }

    gateway.disconnect_push(session_id);
    send_task.abort();
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    gateway: &RelayGateway,
    session_id: SessionId,
    reply_tx: mpsc::UnboundedSender<ServerFrame>,
) {
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Pong(_)) => {
                gateway.acknowledge(session_id);
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(%session_id, "WebSocket error: {e}");
                break;
            }
        };
        gateway.acknowledge(session_id);

        match ClientFrame::decode(text.as_str()) {
            Ok(ClientFrame::PresenceQuery) => {
                let count = gateway.presence();
                let _ = reply_tx.send(ServerFrame::Control(Control::Presence { count }));
            }
            Ok(ClientFrame::Publish(raw)) => {
                if let Err(e) = gateway.publish(&raw, Origin::Push(session_id)).await {
                    let _ = reply_tx.send(ServerFrame::Control(Control::Error {
                        message: e.to_string(),
                    }));
                }
            }
            Err(e) => {
                tracing::warn!(%session_id, "Invalid client message: {e}");
                let _ = reply_tx.send(ServerFrame::Control(Control::Error {
                    message: format!("Invalid message: {e}"),
                }));
            }
        }
    }
}
