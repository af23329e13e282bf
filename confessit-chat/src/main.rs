use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

mod config;
mod models;
mod notifier;
mod policy;
mod realtime;
mod routes;
mod schema;
mod services;
mod socket;
mod store;
mod sweeper;

#[cfg(test)]
mod testing;

use config::{AppConfig, NotifierBackend, StoreBackend};
use confessit_shared::clients::rabbitmq::RabbitMQClient;
use notifier::{LogNotifier, Notifier, RabbitNotifier};
use realtime::ConnectionRegistry;
use services::archival::MessageArchiver;
use services::conversation::ConversationService;
use services::live_session::SessionIssuer;
use services::matchmaking::MatchmakingEngine;
use services::messages::MessageService;
use services::UserNotifications;
use store::{MemoryStore, PgStore, Store};
use sweeper::{spawn_expiry_sweeper, ExpirySweeper};

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub registry: ConnectionRegistry,
    pub sessions: SessionIssuer,
    pub matchmaking: MatchmakingEngine,
    pub conversations: Arc<ConversationService>,
    pub messages: MessageService,
    pub archiver: MessageArchiver,
    pub rabbitmq: Option<RabbitMQClient>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        rabbitmq: Option<RabbitMQClient>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let sessions = SessionIssuer::new(config.session_secret.clone());
        let notifications = UserNotifications::new(store.clone(), notifier, registry.clone());

        Self {
            matchmaking: MatchmakingEngine::new(store.clone(), notifications.clone()),
            conversations: Arc::new(ConversationService::new(
                store.clone(),
                notifications,
                registry.clone(),
                sessions.clone(),
            )),
            messages: MessageService::new(store.clone(), registry.clone()),
            archiver: MessageArchiver::new(store.clone(), config.archive_dir.clone()),
            store,
            registry,
            sessions,
            rabbitmq,
            metrics,
            config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    confessit_shared::middleware::init_tracing("confessit-chat");
    let metrics = confessit_shared::middleware::init_metrics()?;

    let config = AppConfig::load()?;
    let port = config.port;

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Postgres => {
            let pool = confessit_shared::clients::db::create_pool(&config.database_url)?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let (notifier, rabbitmq): (Arc<dyn Notifier>, Option<RabbitMQClient>) = match config.notifier {
        NotifierBackend::Rabbitmq => {
            let rabbitmq = RabbitMQClient::connect(&config.rabbitmq_url).await?;
            (Arc::new(RabbitNotifier::new(rabbitmq.clone())), Some(rabbitmq))
        }
        NotifierBackend::Log => (Arc::new(LogNotifier), None),
    };

    let state = Arc::new(AppState::new(config, store, notifier, rabbitmq, Some(metrics)));

    let cancel = CancellationToken::new();
    let sweeper = spawn_expiry_sweeper(
        ExpirySweeper::new(
            state.store.clone(),
            state.conversations.clone(),
            state.registry.clone(),
            state.config.expiry_warning(),
        ),
        state.config.sweep_interval(),
        state.config.sweep_startup_grace(),
        cancel.clone(),
    );

    let app = routes::router(state.clone());

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, store = state.store.backend(), "confessit-chat starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "expiry sweeper panicked");
    }
    tracing::info!(
        open_connections = state.registry.connection_count().await,
        "confessit-chat stopped"
    );

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
