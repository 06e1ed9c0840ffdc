use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use amora_db::Database;
use amora_types::envelope::{
    Channel, ChatInfoPayload, Envelope, MessagePayload, PresencePayload,
};

use crate::registry::{Registry, UserId};

/// Message text bound after trimming.
const MAX_MESSAGE_CHARS: usize = 2000;

/// Failure taxonomy for a single chat request. None of these terminate the
/// connection; they surface as `error` envelopes on the originating cycle.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Forbidden")]
    Forbidden,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Per-conversation subscriber sets plus presence/message fan-out.
/// Subscriptions are process-memory only, rebuilt by clients on reconnect.
#[derive(Clone)]
pub struct ChatRouter {
    inner: Arc<ChatRouterInner>,
}

struct ChatRouterInner {
    db: Arc<Database>,
    registry: Registry,
    subs: RwLock<SubState>,
}

#[derive(Default)]
struct SubState {
    by_chat: HashMap<String, HashSet<Uuid>>,
    by_conn: HashMap<Uuid, HashSet<String>>,
}

impl ChatRouter {
    pub fn new(db: Arc<Database>, registry: Registry) -> Self {
        Self {
            inner: Arc::new(ChatRouterInner {
                db,
                registry,
                subs: RwLock::new(SubState::default()),
            }),
        }
    }

    /// Subscribe a connection to a chat view. Membership is checked before any
    /// state change or data is produced; non-members get Forbidden.
    pub async fn subscribe(
        &self,
        conn_id: Uuid,
        user_id: UserId,
        chat_id: &str,
    ) -> Result<ChatInfoPayload, ChatError> {
        let db = self.inner.db.clone();
        let chat = chat_id.to_string();
        let peer = tokio::task::spawn_blocking(move || db.chat_peer(&chat, user_id))
            .await
            .map_err(|e| ChatError::Internal(e.into()))??;
        let peer = peer.ok_or(ChatError::Forbidden)?;

        let mut subs = self.inner.subs.write().await;
        subs.by_chat
            .entry(chat_id.to_string())
            .or_default()
            .insert(conn_id);
        subs.by_conn
            .entry(conn_id)
            .or_default()
            .insert(chat_id.to_string());
        drop(subs);

        let title = peer
            .username
            .or(peer.first_name)
            .unwrap_or_else(|| format!("ID {}", peer.telegram_id));

        Ok(ChatInfoPayload {
            id: chat_id.to_string(),
            title,
            avatar_url: peer.photo_url,
            is_online: self.inner.registry.is_online(peer.telegram_id).await,
        })
    }

    /// Idempotent: unsubscribing an absent socket is a no-op.
    pub async fn unsubscribe(&self, conn_id: Uuid, chat_id: &str) {
        let mut subs = self.inner.subs.write().await;
        if let Some(set) = subs.by_chat.get_mut(chat_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                subs.by_chat.remove(chat_id);
            }
        }
        if let Some(set) = subs.by_conn.get_mut(&conn_id) {
            set.remove(chat_id);
            if set.is_empty() {
                subs.by_conn.remove(&conn_id);
            }
        }
    }

    /// Remove every subscription of a closing connection.
    pub async fn drop_connection(&self, conn_id: Uuid) {
        let mut subs = self.inner.subs.write().await;
        if let Some(chats) = subs.by_conn.remove(&conn_id) {
            for chat_id in chats {
                if let Some(set) = subs.by_chat.get_mut(&chat_id) {
                    set.remove(&conn_id);
                    if set.is_empty() {
                        subs.by_chat.remove(&chat_id);
                    }
                }
            }
        }
    }

    /// Push a presence update to the subscribed sockets of every chat the
    /// identity is a member of. Fired on 0<->1 presence transitions only.
    pub async fn broadcast_presence(&self, user_id: UserId, is_online: bool) -> anyhow::Result<()> {
        let db = self.inner.db.clone();
        let chats = tokio::task::spawn_blocking(move || db.chats_for_user(user_id)).await??;

        let subs = self.inner.subs.read().await;
        for chat_id in chats {
            let Some(conn_ids) = subs.by_chat.get(&chat_id) else {
                continue;
            };
            let envelope = Envelope::event(
                Channel::Messages,
                "presence",
                &PresencePayload {
                    chat_id: chat_id.clone(),
                    user_id: user_id.to_string(),
                    is_online,
                },
            );
            self.inner.registry.send_to_conns(conn_ids, &envelope).await;
        }
        Ok(())
    }

    /// Validate and persist a message from a chat member. Returns the payload
    /// to acknowledge and broadcast; the caller acknowledges the sender before
    /// calling [`broadcast_message`], preserving persist -> ack -> broadcast
    /// order for each message.
    pub async fn send_message(
        &self,
        sender_id: UserId,
        chat_id: &str,
        text: &str,
    ) -> Result<MessagePayload, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Invalid("Message text required".into()));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::Invalid("Message too long".into()));
        }

        let db = self.inner.db.clone();
        let chat = chat_id.to_string();
        let body = text.to_string();
        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();
        let message_id = id.clone();

        let member = tokio::task::spawn_blocking(move || {
            if !db.is_chat_member(&chat, sender_id)? {
                return Ok(false);
            }
            db.insert_message(&id, &chat, sender_id, &body, &created_at.to_rfc3339())?;
            Ok::<_, anyhow::Error>(true)
        })
        .await
        .map_err(|e| ChatError::Internal(e.into()))??;

        if !member {
            return Err(ChatError::Forbidden);
        }

        Ok(MessagePayload {
            id: message_id,
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            created_at,
        })
    }

    /// Broadcast a persisted message to every connection of every member —
    /// not just subscribed sockets, so members with the app open receive it
    /// without re-subscribing to this exact chat view.
    pub async fn broadcast_message(&self, message: &MessagePayload) -> anyhow::Result<()> {
        let db = self.inner.db.clone();
        let chat = message.chat_id.clone();
        let members = tokio::task::spawn_blocking(move || db.chat_members(&chat)).await??;

        let Some((lo, hi)) = members else {
            warn!("Broadcast for unknown chat {}", message.chat_id);
            return Ok(());
        };

        let envelope = Envelope::event(Channel::Messages, "message", message);
        self.inner.registry.send_to_user(lo, &envelope).await;
        self.inner.registry.send_to_user(hi, &envelope).await;
        Ok(())
    }
}
