use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::application::ports::auth_port::{Authenticator, Authorizer};
use crate::application::ports::server_provider::ServerProvider;
use crate::domain::ids::{ClientId, DeviceId};

use super::dispatch::{Dispatcher, HandshakeOutcome};
use super::rooms::{ConnectionId, RoomMember};
use super::wire::{WireMessage, WireResult};

/// Upgrades an HTTP connection to the one WebSocket the whole wire protocol
/// rides on (§6) — there is no separate REST surface for `sync-operations`,
/// `presence`, etc.
pub async fn ws_entry<P, Auth, Authz>(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Arc<Dispatcher<P, Auth, Authz>>>,
) -> impl IntoResponse
where
    P: ServerProvider,
    Auth: Authenticator,
    Authz: Authorizer,
{
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher))
}

async fn handle_socket<P, Auth, Authz>(socket: WebSocket, dispatcher: Arc<Dispatcher<P, Auth, Authz>>)
where
    P: ServerProvider,
    Auth: Authenticator,
    Authz: Authorizer,
{
    let (mut sink, mut stream) = socket.split();
    let conn_id = ConnectionId::generate();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();

    let Some(Ok(Message::Text(first))) = stream.next().await else {
        return;
    };
    let (token, raw_device_id) = match serde_json::from_str::<WireMessage>(&first) {
        Ok(WireMessage::Handshake { token, device_id }) => (token, device_id),
        _ => {
            let _ = sink.send(close_frame(4000, "Expected handshake")).await;
            return;
        }
    };

    let actor = match dispatcher.handshake(Some(&token), Some(&raw_device_id)).await {
        HandshakeOutcome::Accepted(actor) => actor,
        HandshakeOutcome::Rejected(reason) => {
            let _ = sink.send(close_frame(4001, reason)).await;
            return;
        }
    };

    let device_id = DeviceId::from(raw_device_id);
    let client_id = ClientId::new(&actor.user_id, &device_id);
    let member = RoomMember {
        client_id: client_id.clone(),
        device_id,
        outbound: outbound_tx.clone(),
    };

    tracing::debug!(client_id = %client_id, "connection authenticated");

    let forward = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                handle_frame(&dispatcher, conn_id, &member, &actor, &text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    dispatcher.handle_disconnect(conn_id, client_id.as_str()).await;
    forward.abort();
}

async fn handle_frame<P, Auth, Authz>(
    dispatcher: &Arc<Dispatcher<P, Auth, Authz>>,
    conn_id: ConnectionId,
    member: &RoomMember,
    actor: &crate::application::ports::auth_port::Actor,
    text: &str,
) where
    P: ServerProvider,
    Auth: Authenticator,
    Authz: Authorizer,
{
    let Ok(WireMessage::Request { req_id, event, payload }) = serde_json::from_str::<WireMessage>(text)
    else {
        return;
    };

    let result = match event.as_str() {
        "sync-operations" => dispatcher.handle_sync(conn_id, member, actor, payload).await,
        "presence" => dispatcher.handle_presence(conn_id, actor, payload).await,
        "unsubscribe-doc" => dispatcher.handle_unsubscribe(conn_id, payload).await,
        "delete-doc" => dispatcher.handle_delete(actor, payload).await,
        other => WireResult::err("ValidationError", format!("unknown event: {other}")),
    };

    let _ = member.outbound.send(WireMessage::response(req_id, result));
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.into(),
    }))
}
