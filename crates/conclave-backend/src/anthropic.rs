use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{BackendError, ChatBackend, ChatRequest, ChatResponse, Role};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
                .unwrap_or(5000);
            return Err(BackendError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
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

/// Anthropic takes the system prompt out of band: system turns are lifted
/// into the request's `system` string, everything else into `messages`.
fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<serde_json::Value> = Vec::new();

    for turn in &req.turns {
        match turn.role {
            Role::System => system_parts.push(&turn.content),
            role => messages.push(serde_json::json!({
                "role": role,
                "content": turn.content,
            })),
        }
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": messages,
        "stream": false,
    });
    if !system_parts.is_empty() {
        body["system"] = serde_json::json!(system_parts.join("\n\n"));
    }
    body
}

fn parse_response(resp: ApiResponse) -> Result<ChatResponse, BackendError> {
    let content: String = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Unknown => None,
        })
        .collect::<Vec<_>>()
        .join("");

    if content.is_empty() {
        return Err(BackendError::Empty);
    }

    Ok(ChatResponse {
        content,
        model: resp.model,
        tokens_in: resp.usage.input_tokens,
        tokens_out: resp.usage.output_tokens,
    })
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatTurn;

    #[test]
    fn system_turns_lifted_out_of_messages() {
        let req = ChatRequest {
            model: "claude-sonnet-4-6".to_string(),
            turns: vec![
                ChatTurn::new(Role::System, "you are the critic"),
                ChatTurn::new(Role::User, "hello"),
                ChatTurn::new(Role::Assistant, "hi"),
            ],
            max_tokens: 256,
        };
        let body = build_request_body(&req);
        assert_eq!(body["system"], "you are the critic");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn empty_completion_is_an_error() {
        let resp = ApiResponse {
            model: "m".to_string(),
            content: vec![],
            usage: Usage {
                input_tokens: 1,
                output_tokens: 0,
            },
        };
        assert!(matches!(parse_response(resp), Err(BackendError::Empty)));
    }
}
