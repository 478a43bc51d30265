// Code reaction via an OpenAI-compatible JSON-mode completion

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::CompanionConfig;
use crate::credentials::CredentialStore;
use crate::llm_client::{CompletionBackend, Message};
use crate::memory::{ConversationMemory, ConversationTurn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Angry,
    Thinking,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub mood: Mood,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no API key is configured")]
    MissingCredential,

    #[error("credential store failed: {0}")]
    CredentialStore(String),

    #[error("completion request failed: {0}")]
    Transport(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

impl AnalysisError {
    /// Short label for logs and metrics-style assertions.
    pub fn reason(&self) -> &'static str {
        match self {
            AnalysisError::MissingCredential => "missing_credential",
            AnalysisError::CredentialStore(_) => "credential_store",
            AnalysisError::Transport(_) => "transport",
            AnalysisError::MalformedReply(_) => "malformed_reply",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplyPayload {
    text: String,
    mood: Mood,
}

/// Parse the service reply. Exactly `text` and `mood` are accepted; anything
/// else, including a mood outside the four known values, is rejected.
pub fn parse_reply(raw: &str) -> Result<AnalysisResult, AnalysisError> {
    let payload: ReplyPayload = serde_json::from_str(raw.trim())
        .map_err(|e| AnalysisError::MalformedReply(e.to_string()))?;

    let text = payload.text.trim();
    if text.is_empty() {
        return Err(AnalysisError::MalformedReply("empty text".to_string()));
    }

    Ok(AnalysisResult {
        mood: payload.mood,
        text: text.to_string(),
    })
}

pub struct ReasoningClient {
    backend: Arc<dyn CompletionBackend>,
    credentials: Arc<dyn CredentialStore>,
    api_key: RwLock<Option<String>>,
    memory: Mutex<ConversationMemory>,
    // Held for a whole exchange so each reply truncates its own user turn.
    exchange: Mutex<()>,
    system_prompt: String,
    max_code_chars: usize,
    truncated_placeholder: String,
}

impl ReasoningClient {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        credentials: Arc<dyn CredentialStore>,
        config: &CompanionConfig,
    ) -> Self {
        Self {
            backend,
            credentials,
            api_key: RwLock::new(None),
            memory: Mutex::new(ConversationMemory::new(config.memory.max_turns)),
            exchange: Mutex::new(()),
            system_prompt: config.system_prompt.clone(),
            max_code_chars: config.memory.max_code_chars,
            truncated_placeholder: config.memory.truncated_placeholder.clone(),
        }
    }

    /// Forget the cached key so the next call fetches it again.
    pub async fn reset_credentials(&self) {
        *self.api_key.write().await = None;
    }

    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.memory.lock().await.snapshot()
    }

    pub async fn history_len(&self) -> usize {
        self.memory.lock().await.len()
    }

    pub async fn has_credential(&self) -> bool {
        matches!(self.resolve_api_key().await, Ok(_))
    }

    /// One request/reply exchange. Concurrent calls queue up in arrival order.
    pub async fn analyze(&self, code: &str) -> Result<AnalysisResult, AnalysisError> {
        let _exchange = self.exchange.lock().await;
        let api_key = self.resolve_api_key().await?;

        let user_message = format!(
            "Code snippet:\n{}",
            truncate_chars(code, self.max_code_chars)
        );

        let history = {
            let mut memory = self.memory.lock().await;
            memory.append_user(user_message);
            memory.snapshot()
        };

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(history.into_iter().map(Message::from));

        tracing::debug!(
            "Sending completion request with {} message(s): {}",
            messages.len(),
            serde_json::to_string_pretty(&messages).unwrap_or_default()
        );

        let raw = self
            .backend
            .complete_json(&api_key, messages)
            .await
            .map_err(|e| AnalysisError::Transport(format!("{:#}", e)))?;

        let result = parse_reply(&raw)?;
        tracing::debug!("Reasoning reply: {:?}", result);

        let mut memory = self.memory.lock().await;
        memory.append_assistant(raw);
        memory.truncate_last_user(&self.truncated_placeholder);

        Ok(result)
    }

    async fn resolve_api_key(&self) -> Result<String, AnalysisError> {
        if let Some(key) = self.api_key.read().await.clone() {
            return Ok(key);
        }

        let mut cached = self.api_key.write().await;
        if let Some(key) = cached.clone() {
            return Ok(key);
        }

        let key = self
            .credentials
            .get_key()
            .await
            .map_err(|e| AnalysisError::CredentialStore(format!("{:#}", e)))?
            .ok_or(AnalysisError::MissingCredential)?;

        *cached = Some(key.clone());
        Ok(key)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
