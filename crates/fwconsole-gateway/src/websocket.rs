//! WebSocket transport for browser terminals.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::{HeaderMap, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};
use fwconsole_core::{EngineConfig, RemoteTarget, SessionRecordStore, TargetId, TargetResolver};
use fwconsole_ssh::Connector;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    auth::OperatorAuthenticator,
    error::GatewayError,
    protocol::{ClientMessage, ServerMessage},
    session::TerminalSession,
};

/// Shared handler state.
#[derive(Clone)]
pub struct GatewayState {
    pub resolver: Arc<dyn TargetResolver>,
    pub records: Arc<dyn SessionRecordStore>,
    pub connector: Arc<dyn Connector>,
    pub authenticator: Arc<dyn OperatorAuthenticator>,
    /// Engine timing for interactive sessions.
    pub engine: EngineConfig,
}

/// Query parameters accepted on upgrade. Browsers cannot set headers on a
/// WebSocket request, so the token may come this way instead.
#[derive(Debug, Default, Deserialize)]
pub struct UpgradeQuery {
    pub token: Option<String>,
}

/// Router serving `GET /ws/terminal/{target_id}`.
#[must_use]
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws/terminal/{target_id}", get(terminal_handler))
        .with_state(state)
}

/// WebSocket upgrade handler.
pub async fn terminal_handler(
    ws: WebSocketUpgrade,
    Path(target_id): Path<String>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    let token = bearer_token(&headers).or(query.token);
    ws.on_upgrade(move |socket| handle_socket(socket, state, TargetId::new(target_id), token))
}

/// Token from an `Authorization: Bearer` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolve who is asking for which target.
async fn authorize(
    state: &GatewayState,
    target_id: &TargetId,
    token: Option<&str>,
) -> Result<(RemoteTarget, String), GatewayError> {
    let operator = state
        .authenticator
        .authenticate(token)
        .await
        .ok_or(GatewayError::Unauthenticated)?;
    let target = state
        .resolver
        .resolve(target_id)
        .await?
        .ok_or_else(|| GatewayError::TargetNotFound(target_id.clone()))?;
    Ok((target, operator))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: GatewayState,
    target_id: TargetId,
    token: Option<String>,
) {
    let (target, operator) = match authorize(&state, &target_id, token.as_deref()).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(target_id = %target_id, error = %e, "Rejecting terminal connection");
            let frame = CloseFrame {
                code: e.close_code(),
                reason: e.to_string().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = TerminalSession::new(
        target,
        operator,
        Arc::clone(&state.connector),
        Arc::clone(&state.records),
        state.engine.clone(),
        tx.clone(),
    );

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(target_id = %target_id, "WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error(format!("Invalid message: {e}")));
                continue;
            }
        };
        session.handle(client_msg).await;
    }

    session.shutdown().await;
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use fwconsole_core::{Credentials, DeviceKind, DeviceProfile};
    use fwconsole_core::storage::{MemorySessionRecords, MemoryTargetDirectory};
    use fwconsole_ssh::{ScriptedConnector, ScriptedDevice};

    use super::*;

    struct OneToken;

    #[async_trait]
    impl OperatorAuthenticator for OneToken {
        async fn authenticate(&self, token: Option<&str>) -> Option<String> {
            (token == Some("s3cret")).then(|| "alice".to_string())
        }
    }

    fn state() -> GatewayState {
        let directory = MemoryTargetDirectory::from_targets([RemoteTarget {
            id: TargetId::new("fw-01"),
            name: "Branch firewall".into(),
            host: "192.0.2.10".into(),
            port: 22,
            credentials: Credentials::new("admin", "secret"),
            profile: DeviceProfile::for_kind(DeviceKind::FortiGate),
        }]);
        GatewayState {
            resolver: Arc::new(directory),
            records: Arc::new(MemorySessionRecords::new()),
            connector: Arc::new(ScriptedConnector::new(ScriptedDevice::new("FGT-01 # "))),
            authenticator: Arc::new(OneToken),
            engine: EngineConfig::interactive(),
        }
    }

    #[test]
    fn test_bearer_token_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("s3cret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6eA=="));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_authorize_close_codes() {
        let state = state();
        let known = TargetId::new("fw-01");

        let err = authorize(&state, &known, None).await.unwrap_err();
        assert_eq!(err.close_code(), 4401);

        let err = authorize(&state, &TargetId::new("fw-99"), Some("s3cret"))
            .await
            .unwrap_err();
        assert_eq!(err.close_code(), 4404);

        let (target, operator) = authorize(&state, &known, Some("s3cret")).await.unwrap();
        assert_eq!(target.id, known);
        assert_eq!(operator, "alice");
    }
}
