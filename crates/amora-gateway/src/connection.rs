use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, trace, warn};
use uuid::Uuid;

use amora_db::Database;
use amora_types::envelope::{
    Channel, ClientCommand, Envelope, MatchPayload, SendAckPayload,
};

use crate::chat::{ChatError, ChatRouter};
use crate::explore;
use crate::registry::{Registry, UserId};

#[derive(Clone)]
pub struct GatewayState {
    pub db: Arc<Database>,
    pub registry: Registry,
    pub router: ChatRouter,
    pub bot_token: String,
    pub auth_ttl_seconds: i64,
}

impl GatewayState {
    pub fn new(db: Arc<Database>, bot_token: String, auth_ttl_seconds: i64) -> Self {
        let registry = Registry::new();
        let router = ChatRouter::new(db.clone(), registry.clone());
        Self {
            db,
            registry,
            router,
            bot_token,
            auth_ttl_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "initData", default)]
    pub init_data: String,
}

/// WebSocket upgrade handler. The initData token is verified before the
/// upgrade completes; a bad or missing token is a 401 on the upgrade attempt
/// and no duplex connection is established.
pub async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.bot_token.is_empty() {
        warn!("Rejecting WebSocket upgrade: bot token not configured");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let verified = match amora_auth::verify_init_data(
        &query.init_data,
        &state.bot_token,
        state.auth_ttl_seconds,
    ) {
        Ok(v) => v,
        Err(e) => {
            warn!("Rejecting WebSocket upgrade: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    // A signed payload without a usable identity cannot open a session.
    let Some(user) = verified.user else {
        warn!("Rejecting WebSocket upgrade: no user record in initData");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, user.id))
}

/// A single connection's lifecycle: register, greet, pump frames, tear down.
pub async fn handle_connection(socket: WebSocket, state: GatewayState, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut rx, came_online) = state.registry.register(user_id).await;
    info!("user {} connected ({})", user_id, conn_id);

    let hello = serde_json::json!({ "type": "hello", "userId": user_id.to_string() });
    if sender
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        teardown(&state, conn_id).await;
        return;
    }

    if came_online {
        if let Err(e) = state.router.broadcast_presence(user_id, true).await {
            error!("presence broadcast failed: {:#}", e);
        }
    }

    // Outbound pump: drains this connection's frame queue.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound pump: frames are handled to completion one at a time, so each
    // message's persist precedes its own ack and broadcast. Other sockets
    // interleave freely.
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(&recv_state, conn_id, user_id, &text).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    teardown(&state, conn_id).await;
}

async fn teardown(state: &GatewayState, conn_id: Uuid) {
    state.router.drop_connection(conn_id).await;
    if let Some((user_id, went_offline)) = state.registry.unregister(conn_id).await {
        info!("user {} disconnected ({})", user_id, conn_id);
        if went_offline {
            if let Err(e) = state.router.broadcast_presence(user_id, false).await {
                error!("presence broadcast failed: {:#}", e);
            }
        }
    }
}

/// Handle one inbound text frame. No failure here terminates the socket:
/// unparseable frames are dropped, malformed payloads and request failures
/// answer with an `error` envelope echoing the correlation id.
pub async fn handle_frame(state: &GatewayState, conn_id: Uuid, user_id: UserId, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(_) => {
            trace!("dropping unparseable frame from user {}", user_id);
            return;
        }
    };
    let ch = envelope.ch;
    let cid = envelope.cid.clone();

    match envelope.parse_command() {
        Ok(Some(cmd)) => {
            if let Err(err) = dispatch(state, conn_id, user_id, cmd, cid.clone()).await {
                let message = match &err {
                    ChatError::Forbidden => "Forbidden".to_string(),
                    ChatError::Invalid(m) => m.clone(),
                    ChatError::Internal(e) => {
                        error!("request from user {} failed: {:#}", user_id, e);
                        "Internal error".to_string()
                    }
                };
                state
                    .registry
                    .send_to_conn(conn_id, &Envelope::error(ch, &message, cid))
                    .await;
            }
        }
        // Unknown (channel, type): ignored for forward compatibility.
        Ok(None) => {}
        Err(e) => {
            state
                .registry
                .send_to_conn(conn_id, &Envelope::error(ch, &e.to_string(), cid))
                .await;
        }
    }
}

async fn dispatch(
    state: &GatewayState,
    conn_id: Uuid,
    user_id: UserId,
    cmd: ClientCommand,
    cid: Option<String>,
) -> Result<(), ChatError> {
    match cmd {
        ClientCommand::Next => {
            let profile = explore::next_candidate(&state.db, user_id)
                .await
                .map_err(ChatError::Internal)?;
            let data = profile
                .map(|p| serde_json::to_value(&p).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            state
                .registry
                .send_to_conn(conn_id, &Envelope::event_raw(Channel::Explore, "profile", data))
                .await;
        }

        ClientCommand::Decide {
            target_user_id,
            is_like,
        } => {
            let decision = explore::record_decision(&state.db, user_id, target_user_id, is_like)
                .await
                .map_err(ChatError::Internal)?;
            state
                .registry
                .send_to_conn(conn_id, &Envelope::ack(Channel::Explore, cid))
                .await;

            // Every connection of both parties hears about the match, not
            // just the socket that sent the deciding like.
            if let Some(chat_id) = decision.chat_id.filter(|_| decision.matched) {
                let matched = Envelope::event(Channel::Explore, "match", &MatchPayload { chat_id });
                state.registry.send_to_user(user_id, &matched).await;
                state.registry.send_to_user(target_user_id, &matched).await;
            }
        }

        ClientCommand::Subscribe { chat_id } => {
            let info = state.router.subscribe(conn_id, user_id, &chat_id).await?;
            state
                .registry
                .send_to_conn(
                    conn_id,
                    &Envelope::event(Channel::Messages, "chat_info", &info).with_cid(cid),
                )
                .await;
        }

        ClientCommand::Unsubscribe { chat_id } => {
            state.router.unsubscribe(conn_id, &chat_id).await;
        }

        ClientCommand::Send { chat_id, text } => {
            let message = state.router.send_message(user_id, &chat_id, &text).await?;
            let ack = Envelope::event(
                Channel::Messages,
                "ack",
                &SendAckPayload {
                    id: message.id.clone(),
                },
            )
            .with_cid(cid);
            state.registry.send_to_conn(conn_id, &ack).await;

            if let Err(e) = state.router.broadcast_message(&message).await {
                error!("message broadcast failed: {:#}", e);
            }
        }
    }
    Ok(())
}
