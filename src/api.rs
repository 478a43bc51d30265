use anyhow::{Context, Result};
use coder_buddy_backend::agent::CompanionStatus;
use coder_buddy_backend::dispatch::OutboundMessage;
use flume::Sender;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header as ws_header;
use tokio_tungstenite::tungstenite::http::HeaderValue as WsHeaderValue;
use tokio_tungstenite::tungstenite::Message;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8797";

#[derive(Debug, Serialize)]
struct DocumentRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct StoreKeyRequest<'a> {
    api_key: &'a str,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    ws_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        let normalized_base = normalize_base_url(&base_url);
        let ws_url = normalize_ws_url(&normalized_base);

        Self {
            http: reqwest::Client::new(),
            base_url: normalized_base,
            ws_url,
            token: token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn post_document(&self, text: &str) -> Result<()> {
        self.request(reqwest::Method::POST, "/v1/document")
            .json(&DocumentRequest { text })
            .send()
            .await
            .context("Failed to reach backend")?
            .error_for_status()
            .context("POST /v1/document failed")?;
        Ok(())
    }

    pub async fn store_key(&self, api_key: &str) -> Result<()> {
        self.request(reqwest::Method::PUT, "/v1/credentials")
            .json(&StoreKeyRequest { api_key })
            .send()
            .await
            .context("Failed to reach backend")?
            .error_for_status()
            .context("PUT /v1/credentials failed")?;
        Ok(())
    }

    pub async fn delete_key(&self) -> Result<()> {
        self.request(reqwest::Method::DELETE, "/v1/credentials")
            .send()
            .await
            .context("Failed to reach backend")?
            .error_for_status()
            .context("DELETE /v1/credentials failed")?;
        Ok(())
    }

    pub async fn status(&self) -> Result<CompanionStatus> {
        self.request(reqwest::Method::GET, "/v1/status")
            .send()
            .await
            .context("Failed to reach backend")?
            .error_for_status()
            .context("GET /v1/status failed")?
            .json::<CompanionStatus>()
            .await
            .context("Failed to decode status response")
    }

    pub async fn stream_events_forever(self, tx: Sender<OutboundMessage>) {
        loop {
            match self.stream_events_once(&tx).await {
                Ok(()) => {
                    tracing::info!("Event stream disconnected; reconnecting in 2s");
                }
                Err(error) => {
                    tracing::warn!("Event stream failed: {:#}; reconnecting in 2s", error);
                }
            }
            if tx.is_disconnected() {
                return;
            }
            sleep(Duration::from_secs(2)).await;
        }
    }

    async fn stream_events_once(&self, tx: &Sender<OutboundMessage>) -> Result<()> {
        let ws_endpoint = format!("{}/v1/ws/events", self.ws_url);
        let mut request = ws_endpoint.as_str()
            .into_client_request()
            .context("Invalid websocket endpoint URL")?;

        if let Some(token) = self.token.as_deref() {
            let value = WsHeaderValue::from_str(&format!("Bearer {}", token))
                .context("Invalid bearer token for websocket auth")?;
            request
                .headers_mut()
                .insert(ws_header::AUTHORIZATION, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .context("Failed to connect websocket event stream")?;
        let (_write, mut read) = stream.split();
        tracing::debug!("Attached to {}", ws_endpoint);

        while let Some(message) = read.next().await {
            let text = match message.context("Websocket read error")? {
                Message::Text(text) => text.to_string(),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Message::Close(_) => return Ok(()),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            match parse_outbound(&text) {
                Ok(outbound) => {
                    if tx.send(outbound).is_err() {
                        return Ok(());
                    }
                }
                Err(error) => tracing::warn!("Ignoring unknown event: {:#}", error),
            }
        }

        Ok(())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

fn parse_outbound(text: &str) -> Result<OutboundMessage> {
    serde_json::from_str(text).context("Failed to decode outbound message")
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BACKEND_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_ws_url(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", base)
    }
}
