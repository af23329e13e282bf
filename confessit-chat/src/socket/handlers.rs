use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use confessit_shared::errors::{AppError, ErrorCode};

use crate::models::{ConversationStatus, Match};
use crate::realtime::{ClientFrame, ServerEvent};
use crate::AppState;

pub const CLOSE_MISSING_TOKEN: u16 = 4001;
pub const CLOSE_INVALID_TOKEN: u16 = 4002;
pub const CLOSE_NOT_PARTICIPANT: u16 = 4003;
pub const CLOSE_NOT_FOUND: u16 = 4004;
pub const CLOSE_INTERNAL: u16 = 1011;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

struct Rejection {
    code: u16,
    reason: &'static str,
}

impl Rejection {
    fn new(code: u16, reason: &'static str) -> Self {
        Self { code, reason }
    }
}

impl From<AppError> for Rejection {
    fn from(err: AppError) -> Self {
        match err.code() {
            Some(ErrorCode::TokenExpired) => Self::new(CLOSE_INVALID_TOKEN, "session expired"),
            Some(ErrorCode::TokenInvalid) => Self::new(CLOSE_INVALID_TOKEN, "invalid session"),
            Some(ErrorCode::NotConversationParticipant) => {
                Self::new(CLOSE_NOT_PARTICIPANT, "not a participant")
            }
            Some(
                ErrorCode::ConversationNotFound | ErrorCode::MatchNotFound | ErrorCode::InvalidIdentifier,
            ) => Self::new(CLOSE_NOT_FOUND, "conversation not found"),
            _ => {
                tracing::error!(error = %err, "websocket authentication failed");
                Self::new(CLOSE_INTERNAL, "internal error")
            }
        }
    }
}

/// GET /ws/:conversation_id?token=
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(params): Query<WsParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, conversation_id, params.token))
}

/// Checks the session credential, membership and that the conversation is
/// still live. Returns the caller and their match.
async fn authenticate(
    state: &AppState,
    conversation_id: &str,
    token: Option<&str>,
) -> Result<(String, Uuid, Match), Rejection> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Rejection::new(CLOSE_MISSING_TOKEN, "missing session token"))?;

    let conversation_id = Uuid::parse_str(conversation_id)
        .map_err(|_| Rejection::new(CLOSE_NOT_FOUND, "conversation not found"))?;

    let claims = state.sessions.verify(token)?;
    if claims.conversation_id != conversation_id {
        return Err(Rejection::new(CLOSE_INVALID_TOKEN, "session does not match conversation"));
    }

    let (conversation, m) = state
        .conversations
        .ensure_participant(conversation_id, &claims.sub)
        .await?;
    // The credential outlives an admin termination or a sweep; re-read both.
    if m.is_expired(Utc::now()) || conversation.status != ConversationStatus::Accepted {
        return Err(Rejection::new(CLOSE_INVALID_TOKEN, "session has ended"));
    }
    Ok((claims.sub, conversation_id, m))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, conversation_id: String, token: Option<String>) {
    let (mut sender, receiver) = socket.split();

    let (regno, conversation_id, m) = match authenticate(&state, &conversation_id, token.as_deref()).await {
        Ok(auth) => auth,
        Err(rejection) => {
            tracing::debug!(code = rejection.code, reason = rejection.reason, "websocket rejected");
            let frame = CloseFrame {
                code: rejection.code,
                reason: Cow::Borrowed(rejection.reason),
            };
            let _ = sender.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    serve_session(&state, sender, receiver, regno, conversation_id, m).await;
}

/// Registers an authenticated connection and pumps frames both ways until
/// either side goes away.
async fn serve_session<S, R, E>(
    state: &AppState,
    mut sender: S,
    mut receiver: R,
    regno: String,
    conversation_id: Uuid,
    m: Match,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let (conn_id, mut rx) = state.registry.register(&regno, conversation_id).await;
    let peers = state.registry.conversation_connection_count(conversation_id).await;
    tracing::info!(%conn_id, user = %regno, %conversation_id, peers, "websocket connected");

    let established = ServerEvent::ConnectionEstablished {
        user_id: regno.clone(),
        conversation_id,
        match_id: m.id,
        timestamp: Utc::now(),
    };

    if send_event(&mut sender, &established).await {
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(event) = outbound else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                inbound = receiver.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => match ClientFrame::parse(&text) {
                            Some(ClientFrame::Ping) => {
                                let pong = ServerEvent::Pong { timestamp: Utc::now() };
                                if !send_event(&mut sender, &pong).await {
                                    break;
                                }
                            }
                            Some(ClientFrame::Typing { is_typing }) => {
                                let typing = ServerEvent::Typing {
                                    user_id: regno.clone(),
                                    is_typing,
                                    timestamp: Utc::now(),
                                };
                                state
                                    .registry
                                    .broadcast_to_conversation(conversation_id, typing, Some(conn_id))
                                    .await;
                            }
                            None => tracing::debug!(%conn_id, "ignoring unrecognised frame"),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(%conn_id, error = %e, "websocket receive error");
                            break;
                        }
                    }
                }
            }
        }
    }

    state.registry.unregister(conn_id).await;
    tracing::info!(%conn_id, user = %regno, "websocket disconnected");
}

/// Writes one event. Returns false once the socket can no longer be written.
async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(event = event.event_type(), error = %e, "failed to serialize event");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::testing::{Fixture, RecordingNotifier};

    fn state_over(fixture: &Fixture) -> AppState {
        AppState::new(
            AppConfig::default(),
            fixture.store.clone(),
            Arc::new(RecordingNotifier::new()),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn participants_with_a_session_are_admitted() {
        let fx = Fixture::new();
        let (m, c) = fx.accepted("alice", "bob").await;
        let state = state_over(&fx);
        let session = state.sessions.issue("bob", &c, &m).unwrap();

        let (regno, conversation_id, matched) =
            match authenticate(&state, &c.id.to_string(), Some(session.token.as_str())).await {
                Ok(auth) => auth,
                Err(r) => panic!("rejected with {}", r.code),
            };
        assert_eq!(regno, "bob");
        assert_eq!(conversation_id, c.id);
        assert_eq!(matched.id, m.id);
    }

    #[tokio::test]
    async fn handshake_failures_map_to_close_codes() {
        let fx = Fixture::new();
        let (m, c) = fx.accepted("alice", "bob").await;
        let (om, oc) = fx.accepted("carol", "dave").await;
        let state = state_over(&fx);
        let token = state.sessions.issue("alice", &c, &m).unwrap().token;

        let code = |r: Result<(String, Uuid, Match), Rejection>| r.err().map(|r| r.code);

        assert_eq!(code(authenticate(&state, &c.id.to_string(), None).await), Some(CLOSE_MISSING_TOKEN));
        assert_eq!(
            code(authenticate(&state, &c.id.to_string(), Some("garbage")).await),
            Some(CLOSE_INVALID_TOKEN)
        );
        assert_eq!(
            code(authenticate(&state, &oc.id.to_string(), Some(token.as_str())).await),
            Some(CLOSE_INVALID_TOKEN)
        );
        assert_eq!(code(authenticate(&state, "nope", Some(token.as_str())).await), Some(CLOSE_NOT_FOUND));

        // well-formed credential naming a conversation its holder is not in
        let forged = state.sessions.issue("alice", &oc, &om).unwrap().token;
        assert_eq!(
            code(authenticate(&state, &oc.id.to_string(), Some(forged.as_str())).await),
            Some(CLOSE_NOT_PARTICIPANT)
        );
    }

    #[tokio::test]
    async fn ended_conversations_refuse_earlier_sessions() {
        let fx = Fixture::new();
        let state = state_over(&fx);
        let code = |r: Result<(String, Uuid, Match), Rejection>| r.err().map(|r| r.code);

        let (m, c) = fx.accepted("alice", "bob").await;
        let token = state.sessions.issue("alice", &c, &m).unwrap().token;
        state.conversations.terminate(c.id, "root").await.unwrap();
        assert_eq!(
            code(authenticate(&state, &c.id.to_string(), Some(token.as_str())).await),
            Some(CLOSE_INVALID_TOKEN)
        );

        // credential still inside its exp, conversation already swept
        let (m, c) = fx.accepted("carol", "dave").await;
        let token = state.sessions.issue("carol", &c, &m).unwrap().token;
        assert!(state.conversations.expire(c.id, Utc::now()).await.unwrap());
        assert_eq!(
            code(authenticate(&state, &c.id.to_string(), Some(token.as_str())).await),
            Some(CLOSE_INVALID_TOKEN)
        );
    }

    async fn next_frame(out: &mut futures::channel::mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
        match out.next().await {
            Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_session_answers_relays_and_cleans_up() {
        let fx = Fixture::new();
        let (m, c) = fx.accepted("alice", "bob").await;
        let state = Arc::new(state_over(&fx));
        let (_peer, mut peer_rx) = state.registry.register("bob", c.id).await;

        let (out_tx, mut out_rx) = futures::channel::mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = futures::channel::mpsc::unbounded::<Result<Message, axum::Error>>();
        let session = tokio::spawn({
            let state = state.clone();
            let conversation_id = c.id;
            async move { serve_session(&state, out_tx, in_rx, "alice".into(), conversation_id, m).await }
        });

        let hello = next_frame(&mut out_rx).await;
        assert_eq!(hello["type"], "connection_established");
        assert_eq!(hello["user_id"], "alice");
        assert_eq!(state.registry.conversation_connection_count(c.id).await, 2);

        in_tx.unbounded_send(Ok(Message::Text("ping".into()))).unwrap();
        assert_eq!(next_frame(&mut out_rx).await["type"], "pong");

        in_tx.unbounded_send(Ok(Message::Text("{not json".into()))).unwrap();
        in_tx
            .unbounded_send(Ok(Message::Text(r#"{"type":"typing","is_typing":true}"#.into())))
            .unwrap();
        in_tx.unbounded_send(Ok(Message::Text("ping".into()))).unwrap();

        // no typing echo to the sender; the next frame it sees is the pong
        assert_eq!(next_frame(&mut out_rx).await["type"], "pong");
        match peer_rx.recv().await {
            Some(ServerEvent::Typing { user_id, is_typing, .. }) => {
                assert_eq!(user_id, "alice");
                assert!(is_typing);
            }
            other => panic!("unexpected event {other:?}"),
        }

        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        session.await.unwrap();
        assert_eq!(state.registry.conversation_connection_count(c.id).await, 1);
        assert_eq!(state.registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn live_session_forwards_registry_events() {
        let fx = Fixture::new();
        let (m, c) = fx.accepted("alice", "bob").await;
        let state = Arc::new(state_over(&fx));

        let (out_tx, mut out_rx) = futures::channel::mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = futures::channel::mpsc::unbounded::<Result<Message, axum::Error>>();
        let session = tokio::spawn({
            let state = state.clone();
            let conversation_id = c.id;
            async move { serve_session(&state, out_tx, in_rx, "bob".into(), conversation_id, m).await }
        });
        assert_eq!(next_frame(&mut out_rx).await["type"], "connection_established");

        let sent = state.messages.send(c.id, "alice", "hi bob").await.unwrap();
        let frame = next_frame(&mut out_rx).await;
        assert_eq!(frame["type"], "new_message");
        assert_eq!(frame["message"]["id"], sent.id.to_string());

        // client vanishing without a close frame also unregisters
        drop(in_tx);
        session.await.unwrap();
        assert_eq!(state.registry.connection_count().await, 0);
    }

    #[test]
    fn rejection_codes_follow_error_kind() {
        let code = |err: AppError| Rejection::from(err).code;

        assert_eq!(code(AppError::new(ErrorCode::TokenExpired, "x")), CLOSE_INVALID_TOKEN);
        assert_eq!(code(AppError::new(ErrorCode::TokenInvalid, "x")), CLOSE_INVALID_TOKEN);
        assert_eq!(
            code(AppError::new(ErrorCode::NotConversationParticipant, "x")),
            CLOSE_NOT_PARTICIPANT
        );
        assert_eq!(code(AppError::new(ErrorCode::ConversationNotFound, "x")), CLOSE_NOT_FOUND);
        assert_eq!(code(AppError::internal("boom")), CLOSE_INTERNAL);
    }
}
