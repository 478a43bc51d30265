use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use flume::Sender;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent::{Companion, CompanionEvent, CompanionStatus};
use crate::credentials::CredentialStore;
use crate::runtime::BackendRuntime;

#[derive(Clone)]
pub struct ServerState {
    pub companion: Arc<Companion>,
    pub credentials: Arc<dyn CredentialStore>,
    pub event_tx: Sender<CompanionEvent>,
    pub auth: BackendAuth,
}

const BIND_VAR: &str = "CODER_BUDDY_BACKEND_BIND";
const TOKEN_VAR: &str = "CODER_BUDDY_BACKEND_TOKEN";
const AUTH_MODE_VAR: &str = "CODER_BUDDY_BACKEND_AUTH_MODE";

/// Access rule for every `/v1` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAuth {
    /// `Authorization: Bearer <token>` must carry this token.
    Bearer(String),
    Open,
}

impl BackendAuth {
    /// Auth mode `required` (the default) needs a token; `disabled` opens the API.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mode = lookup(AUTH_MODE_VAR)
            .map(|raw| raw.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let token = lookup(TOKEN_VAR)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());

        match (mode.as_str(), token) {
            ("" | "required", Some(token)) => Ok(BackendAuth::Bearer(token)),
            ("" | "required", None) => Err(anyhow!(
                "{TOKEN_VAR} must be set unless {AUTH_MODE_VAR}=disabled"
            )),
            ("disabled", _) => {
                tracing::warn!("Backend auth disabled; /v1 routes accept any caller");
                Ok(BackendAuth::Open)
            }
            (other, _) => Err(anyhow!(
                "Unknown {AUTH_MODE_VAR} '{other}' (use 'required' or 'disabled')"
            )),
        }
    }

    fn permits(&self, headers: &HeaderMap) -> bool {
        match self {
            BackendAuth::Open => true,
            BackendAuth::Bearer(expected) => headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().strip_prefix("Bearer "))
                .is_some_and(|presented| presented.trim() == expected.as_str()),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct DocumentRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct QueuedResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct StoreKeyRequest {
    api_key: String,
}

#[derive(Debug, Serialize)]
struct CredentialResponse {
    present: bool,
}

pub async fn serve_backend(
    runtime: BackendRuntime,
    event_rx: flume::Receiver<CompanionEvent>,
) -> Result<()> {
    let bind_addr = std::env::var(BIND_VAR)
        .unwrap_or_else(|_| "127.0.0.1:8797".to_string())
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid {BIND_VAR} (expected host:port)"))?;

    let auth = BackendAuth::from_lookup(|name| std::env::var(name).ok())?;

    let state = Arc::new(ServerState {
        companion: runtime.companion.clone(),
        credentials: runtime.credentials.clone(),
        event_tx: runtime.event_tx.clone(),
        auth,
    });

    runtime.spawn_companion_loop(event_rx);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Coder Buddy backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

pub fn router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/document", post(post_document))
        .route("/credentials", put(store_credentials).delete(delete_credentials))
        .route("/ws/events", get(ws_events_route))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, require_token));

    Router::new().nest("/v1", protected)
}

async fn require_token(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if !state.auth.permits(&headers) {
        tracing::debug!("Rejected unauthenticated {}", request.uri().path());
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(request).await
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_status(State(state): State<Arc<ServerState>>) -> Json<CompanionStatus> {
    Json(state.companion.status().await)
}

async fn post_document(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DocumentRequest>,
) -> Result<(StatusCode, Json<QueuedResponse>), StatusCode> {
    state
        .event_tx
        .send_async(CompanionEvent::DocumentChanged {
            text: request.text,
        })
        .await
        .map_err(|_| {
            tracing::error!("Companion loop is gone; dropping document update");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { status: "queued" })))
}

async fn store_credentials(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<StoreKeyRequest>,
) -> Result<Json<CredentialResponse>, StatusCode> {
    if request.api_key.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .credentials
        .store_key(&request.api_key)
        .await
        .map_err(|e| {
            tracing::error!("Failed to store API key: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    state.companion.reasoning().reset_credentials().await;
    Ok(Json(CredentialResponse { present: true }))
}

async fn delete_credentials(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<CredentialResponse>, StatusCode> {
    state.credentials.delete_key().await.map_err(|e| {
        tracing::error!("Failed to delete API key: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    state.companion.reasoning().reset_credentials().await;
    Ok(Json(CredentialResponse { present: false }))
}

async fn ws_events_route(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(state, socket))
}

async fn handle_events_socket(state: Arc<ServerState>, mut socket: WebSocket) {
    let mut rx = state.companion.dispatcher().subscribe();
    state.companion.on_presentation_attached().await;
    tracing::debug!("Presentation listener attached");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(message) => {
                        let payload = match serde_json::to_string(&message) {
                            Ok(serialized) => serialized,
                            Err(error) => {
                                tracing::warn!("Failed to serialize outbound message: {}", error);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    tracing::debug!("Presentation listener detached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompanionConfig;
    use crate::credentials::InMemoryCredentialStore;
    use axum::http::HeaderValue;

    fn state_with_store(
        store: Arc<InMemoryCredentialStore>,
    ) -> (Arc<ServerState>, flume::Receiver<CompanionEvent>) {
        let (tx, rx) = flume::unbounded();
        let runtime = crate::runtime::BackendRuntimeBuilder::new(CompanionConfig::default(), tx)
            .with_credentials(store)
            .build()
            .unwrap();
        let state = Arc::new(ServerState {
            companion: runtime.companion.clone(),
            credentials: runtime.credentials.clone(),
            event_tx: runtime.event_tx.clone(),
            auth: BackendAuth::Open,
        });
        (state, rx)
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name: &str| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    fn bearer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn bearer_auth_checks_presented_token() {
        let auth = BackendAuth::Bearer("token-123".to_string());
        assert!(auth.permits(&bearer("Bearer token-123")));
        assert!(!auth.permits(&bearer("Bearer wrong")));
        assert!(!auth.permits(&bearer("token-123")));
        assert!(!auth.permits(&HeaderMap::new()));
        assert!(BackendAuth::Open.permits(&HeaderMap::new()));
    }

    #[test]
    fn auth_defaults_to_required_token() {
        assert_eq!(
            BackendAuth::from_lookup(lookup(&[(TOKEN_VAR, " token-123 ")])).unwrap(),
            BackendAuth::Bearer("token-123".to_string())
        );
        assert!(BackendAuth::from_lookup(lookup(&[])).is_err());
        assert!(BackendAuth::from_lookup(lookup(&[(TOKEN_VAR, "  ")])).is_err());
    }

    #[test]
    fn auth_mode_accepts_only_required_or_disabled() {
        assert_eq!(
            BackendAuth::from_lookup(lookup(&[(AUTH_MODE_VAR, "Disabled")])).unwrap(),
            BackendAuth::Open
        );
        assert!(BackendAuth::from_lookup(lookup(&[
            (AUTH_MODE_VAR, "on"),
            (TOKEN_VAR, "token-123")
        ]))
        .is_err());
    }

    #[tokio::test]
    async fn document_route_queues_for_companion_loop() {
        let (state, rx) = state_with_store(Arc::new(InMemoryCredentialStore::new()));

        let (status, _) = post_document(
            State(state),
            Json(DocumentRequest {
                text: "fn main() {}".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
        let CompanionEvent::DocumentChanged { text } = rx.recv_async().await.unwrap();
        assert_eq!(text, "fn main() {}");
    }

    #[tokio::test]
    async fn document_route_reports_missing_loop() {
        let (state, rx) = state_with_store(Arc::new(InMemoryCredentialStore::new()));
        drop(rx);

        let err = post_document(
            State(state),
            Json(DocumentRequest {
                text: "x".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn credential_routes_store_and_delete() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let (state, _rx) = state_with_store(store.clone());

        assert!(!state.companion.status().await.credential_present);

        let blank = store_credentials(
            State(state.clone()),
            Json(StoreKeyRequest {
                api_key: "  ".to_string(),
            }),
        )
        .await;
        assert_eq!(blank.unwrap_err(), StatusCode::BAD_REQUEST);

        store_credentials(
            State(state.clone()),
            Json(StoreKeyRequest {
                api_key: "sk-new".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(state.companion.status().await.credential_present);

        delete_credentials(State(state.clone())).await.unwrap();
        assert_eq!(store.get_key().await.unwrap(), None);
        assert!(!state.companion.status().await.credential_present);
    }
}
