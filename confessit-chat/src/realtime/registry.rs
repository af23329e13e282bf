use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;

pub type ConnId = Uuid;

struct Connection {
    user_id: String,
    conversation_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnId, Connection>,
    by_conversation: HashMap<Uuid, HashSet<ConnId>>,
    by_user: HashMap<String, HashSet<ConnId>>,
}

impl RegistryInner {
    fn remove(&mut self, conn_id: ConnId) -> bool {
        let Some(conn) = self.connections.remove(&conn_id) else {
            return false;
        };
        if let Some(set) = self.by_conversation.get_mut(&conn.conversation_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                self.by_conversation.remove(&conn.conversation_id);
            }
        }
        if let Some(set) = self.by_user.get_mut(&conn.user_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                self.by_user.remove(&conn.user_id);
            }
        }
        true
    }

    fn senders(&self, ids: Option<&HashSet<ConnId>>, exclude: Option<ConnId>) -> Vec<(ConnId, mpsc::UnboundedSender<ServerEvent>)> {
        ids.into_iter()
            .flatten()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| self.connections.get(id).map(|c| (*id, c.tx.clone())))
            .collect()
    }
}

/// Live WebSocket connections, indexed by conversation and by user.
///
/// A user may hold several connections at once (tabs, devices). Each
/// connection owns an unbounded channel drained by its socket task; a send
/// that fails means that task is gone, so the connection is dropped from
/// both indexes on the spot.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.write().await;
        inner.connections.insert(
            conn_id,
            Connection {
                user_id: user_id.to_string(),
                conversation_id,
                tx,
            },
        );
        inner.by_conversation.entry(conversation_id).or_default().insert(conn_id);
        inner.by_user.entry(user_id.to_string()).or_default().insert(conn_id);
        metrics::gauge!("realtime_connections").set(inner.connections.len() as f64);
        drop(inner);

        tracing::debug!(conn_id = %conn_id, user_id = %user_id, conversation_id = %conversation_id, "connection registered");
        (conn_id, rx)
    }

    pub async fn unregister(&self, conn_id: ConnId) {
        let mut inner = self.inner.write().await;
        if inner.remove(conn_id) {
            metrics::gauge!("realtime_connections").set(inner.connections.len() as f64);
            tracing::debug!(conn_id = %conn_id, "connection unregistered");
        }
    }

    /// Delivers to every connection on the conversation except `exclude`.
    /// Returns how many connections accepted the event.
    pub async fn broadcast_to_conversation(
        &self,
        conversation_id: Uuid,
        event: ServerEvent,
        exclude: Option<ConnId>,
    ) -> usize {
        let targets = {
            let inner = self.inner.read().await;
            inner.senders(inner.by_conversation.get(&conversation_id), exclude)
        };
        self.deliver(targets, event).await
    }

    pub async fn broadcast_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        let targets = {
            let inner = self.inner.read().await;
            inner.senders(inner.by_user.get(user_id), None)
        };
        self.deliver(targets, event).await
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn conversation_connection_count(&self, conversation_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .by_conversation
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }

    async fn deliver(
        &self,
        targets: Vec<(ConnId, mpsc::UnboundedSender<ServerEvent>)>,
        event: ServerEvent,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (conn_id, tx) in targets {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(conn_id);
            }
        }

        if !dead.is_empty() {
            let mut inner = self.inner.write().await;
            for conn_id in &dead {
                inner.remove(*conn_id);
            }
            metrics::gauge!("realtime_connections").set(inner.connections.len() as f64);
            metrics::counter!("broadcast_pruned_connections_total").increment(dead.len() as u64);
            tracing::warn!(pruned = dead.len(), event = event.event_type(), "dropped dead connections during broadcast");
        }

        delivered
    }
}
