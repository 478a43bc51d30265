use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::ConversationTurn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

impl From<ConversationTurn> for Message {
    fn from(turn: ConversationTurn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.content,
        }
    }
}

/// A single JSON-mode chat completion.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete_json(&self, api_key: &str, messages: Vec<Message>) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    model: String,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(
        api_url: String,
        model: String,
        max_tokens: Option<u32>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, messages: Vec<Message>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete_json(&self, api_key: &str, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);
        let request = self.build_request(messages);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send LLM request")?;

        // Check for HTTP errors and include response body for debugging
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_asks_for_json_object() {
        let client = LlmClient::new(
            "https://api.example.com/v1/".to_string(),
            "gpt-4o-mini".to_string(),
            Some(100),
            reqwest::Client::new(),
        );
        let request = client.build_request(vec![Message::system("be brief")]);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(client.api_url, "https://api.example.com/v1");
    }

    #[test]
    fn turns_convert_to_wire_messages() {
        let message: Message = ConversationTurn::user("Code snippet:\nfn a() {}").into();
        assert_eq!(message.role, "user");
        assert_eq!(message.content, "Code snippet:\nfn a() {}");
    }

    #[test]
    fn null_content_deserializes() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        assert!(response.choices[0].message.content.is_none());
    }
}
