use async_trait::async_trait;
use confessit_shared::clients::rabbitmq::RabbitMQClient;
use confessit_shared::types::event::{payloads, routing_keys, Event};

/// Outbound notification port. Delivery is someone else's problem; callers
/// only care that the attempt was made.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, heading: &str, body: &str) -> anyhow::Result<()>;
}

/// Fire-and-forget wrapper: failures are logged and never reach the caller.
pub async fn notify_quietly(notifier: &dyn Notifier, user_id: &str, heading: &str, body: &str) {
    if let Err(e) = notifier.notify(user_id, heading, body).await {
        tracing::error!(error = %e, user_id = %user_id, heading = %heading, "failed to send notification");
    }
}

/// Publishes notification requests for the delivery service over RabbitMQ.
pub struct RabbitNotifier {
    rabbitmq: RabbitMQClient,
}

impl RabbitNotifier {
    pub fn new(rabbitmq: RabbitMQClient) -> Self {
        Self { rabbitmq }
    }
}

#[async_trait]
impl Notifier for RabbitNotifier {
    async fn notify(&self, user_id: &str, heading: &str, body: &str) -> anyhow::Result<()> {
        let event = Event::new(
            "confessit-chat",
            routing_keys::NOTIFICATION_REQUESTED,
            payloads::NotificationRequested {
                user_id: user_id.to_string(),
                heading: heading.to_string(),
                body: body.to_string(),
            },
        )
        .with_user(user_id);

        self.rabbitmq
            .publish(routing_keys::NOTIFICATION_REQUESTED, &event)
            .await?;
        Ok(())
    }
}

/// Used when no broker is configured; notifications only reach the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, heading: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(user_id = %user_id, heading = %heading, body = %body, "notification");
        Ok(())
    }
}

// Notification copy.
pub mod copy {
    pub const MATCHED_HEADING: &str = "You've been matched!";
    pub const MATCHED_BODY: &str = "Someone new was paired with you. Open ConfessIt to see who.";
    pub const REQUEST_HEADING: &str = "New conversation request";
    pub const REQUEST_BODY: &str = "Your match wants to talk. Accept before the match expires.";
    pub const ACCEPTED_HEADING: &str = "Conversation accepted";
    pub const ACCEPTED_BODY: &str = "Your match accepted. Say hello!";
    pub const REJECTED_HEADING: &str = "Conversation declined";
    pub const REJECTED_BODY: &str = "Your match declined the conversation request.";
}
