use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{BackendError, ChatBackend, ChatRequest, ChatResponse};

/// OpenAI itself, or any OpenAI-compatible endpoint via `base_url`
/// (OpenRouter, Groq, LM Studio, a local llama.cpp server, …).
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %req.model, "sending request to OpenAI-compatible endpoint");

        let resp = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(BackendError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI API error");
            return Err(BackendError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        parse_response(api_resp)
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .turns
        .iter()
        .map(|t| {
            serde_json::json!({
                "role": t.role,
                "content": t.content,
            })
        })
        .collect();

    serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "stream": false,
    })
}

fn parse_response(resp: ApiResponse) -> Result<ChatResponse, BackendError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(BackendError::Empty)?;

    let content = choice.message.content.unwrap_or_default();
    if content.is_empty() {
        return Err(BackendError::Empty);
    }

    let usage = resp.usage.unwrap_or_default();
    Ok(ChatResponse {
        content,
        model: resp.model,
        tokens_in: usage.prompt_tokens,
        tokens_out: usage.completion_tokens,
    })
}

// OpenAI API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatTurn, Role};

    #[test]
    fn body_carries_all_roles_inline() {
        let req = ChatRequest {
            model: "gpt-4o".to_string(),
            turns: vec![
                ChatTurn::new(Role::System, "roster"),
                ChatTurn::new(Role::User, "hello"),
            ],
            max_tokens: 128,
        };
        let body = build_request_body(&req);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn missing_choices_is_empty() {
        let resp = ApiResponse {
            model: "m".to_string(),
            choices: vec![],
            usage: None,
        };
        assert!(matches!(parse_response(resp), Err(BackendError::Empty)));
    }
}
