use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use amora_types::envelope::Envelope;

/// Stable Telegram user identity. Issued by the identity provider, never
/// generated locally.
pub type UserId = i64;

/// Bidirectional socket<->identity map with ref-counted online state.
/// A user may hold several concurrent connections (multi-device); they are
/// online while at least one connection is open.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    conns: HashMap<Uuid, ConnHandle>,
    user_conns: HashMap<UserId, HashSet<Uuid>>,
}

struct ConnHandle {
    user_id: UserId,
    tx: mpsc::UnboundedSender<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Register a new connection for an identity. Returns the connection id,
    /// the outbound frame queue, and whether this was the user's 0 -> 1
    /// presence transition.
    pub async fn register(
        &self,
        user_id: UserId,
    ) -> (Uuid, mpsc::UnboundedReceiver<String>, bool) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.inner.write().await;
        state.conns.insert(conn_id, ConnHandle { user_id, tx });
        let set = state.user_conns.entry(user_id).or_default();
        set.insert(conn_id);
        let came_online = set.len() == 1;

        (conn_id, rx, came_online)
    }

    /// Unregister a connection. Returns its identity and whether this was the
    /// user's 1 -> 0 presence transition; None if the connection is unknown.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<(UserId, bool)> {
        let mut state = self.inner.write().await;
        let handle = state.conns.remove(&conn_id)?;
        let user_id = handle.user_id;

        let went_offline = match state.user_conns.get_mut(&user_id) {
            Some(set) => {
                set.remove(&conn_id);
                if set.is_empty() {
                    state.user_conns.remove(&user_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        Some((user_id, went_offline))
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.user_conns.contains_key(&user_id)
    }

    /// Queue an envelope to one connection. A closed or unknown connection is
    /// a no-op; the socket may have gone away mid-operation.
    pub async fn send_to_conn(&self, conn_id: Uuid, envelope: &Envelope) {
        self.send_frame_to_conn(conn_id, envelope_frame(envelope))
            .await;
    }

    pub async fn send_frame_to_conn(&self, conn_id: Uuid, frame: String) {
        let state = self.inner.read().await;
        if let Some(handle) = state.conns.get(&conn_id) {
            let _ = handle.tx.send(frame);
        }
    }

    /// Fan an envelope out to every connection of an identity.
    pub async fn send_to_user(&self, user_id: UserId, envelope: &Envelope) {
        let frame = envelope_frame(envelope);
        let state = self.inner.read().await;
        if let Some(conn_ids) = state.user_conns.get(&user_id) {
            for conn_id in conn_ids {
                if let Some(handle) = state.conns.get(conn_id) {
                    let _ = handle.tx.send(frame.clone());
                }
            }
        }
    }

    /// Fan an envelope out to a set of connections.
    pub async fn send_to_conns(&self, conn_ids: &HashSet<Uuid>, envelope: &Envelope) {
        let frame = envelope_frame(envelope);
        let state = self.inner.read().await;
        for conn_id in conn_ids {
            if let Some(handle) = state.conns.get(conn_id) {
                let _ = handle.tx.send(frame.clone());
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn envelope_frame(envelope: &Envelope) -> String {
    serde_json::to_string(envelope).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use amora_types::envelope::Channel;

    #[tokio::test]
    async fn presence_transitions_fire_once_per_zero_crossing() {
        let registry = Registry::new();

        let (c1, _rx1, came_online) = registry.register(1001).await;
        assert!(came_online);
        let (c2, _rx2, came_online) = registry.register(1001).await;
        assert!(!came_online);
        assert!(registry.is_online(1001).await);

        let (_, went_offline) = registry.unregister(c1).await.unwrap();
        assert!(!went_offline);
        assert!(registry.is_online(1001).await);

        let (_, went_offline) = registry.unregister(c2).await.unwrap();
        assert!(went_offline);
        assert!(!registry.is_online(1001).await);
    }

    #[tokio::test]
    async fn unregister_unknown_connection_is_a_noop() {
        let registry = Registry::new();
        assert!(registry.unregister(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_connection() {
        let registry = Registry::new();
        let (_c1, mut rx1, _) = registry.register(1001).await;
        let (_c2, mut rx2, _) = registry.register(1001).await;
        let (_c3, mut rx3, _) = registry.register(2002).await;

        let env = Envelope::ack(Channel::Explore, Some("c1".into()));
        registry.send_to_user(1001, &env).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }
}
