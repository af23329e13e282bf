pub mod archival;
pub mod conversation;
pub mod live_session;
pub mod matchmaking;
pub mod messages;

use std::sync::Arc;

use chrono::Utc;

use crate::notifier::{notify_quietly, Notifier};
use crate::realtime::{ConnectionRegistry, ServerEvent};
use crate::store::Store;

/// Push notifications plus a realtime mirror on the user's open sockets.
/// Users who turned notifications off get neither.
#[derive(Clone)]
pub struct UserNotifications {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    registry: ConnectionRegistry,
}

impl UserNotifications {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, registry: ConnectionRegistry) -> Self {
        Self {
            store,
            notifier,
            registry,
        }
    }

    pub async fn send(&self, regno: &str, heading: &str, body: &str) {
        match self.store.get_user(regno).await {
            Ok(Some(user)) if !user.is_notifications => {
                tracing::debug!(user_id = %regno, "notifications disabled, skipping");
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(user_id = %regno, "notification target not found");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %regno, "could not load notification preferences");
                return;
            }
        }

        notify_quietly(self.notifier.as_ref(), regno, heading, body).await;

        self.registry
            .broadcast_to_user(
                regno,
                ServerEvent::Notification {
                    heading: heading.to_string(),
                    body: body.to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
}
