use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{BackendError, ChatBackend, ChatRequest, ChatResponse};

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
        }
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let body = build_request_body(req);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %req.model, "sending request to Ollama");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Surface connection errors as Unavailable — the local
                // daemon simply isn't running.
                if e.is_connect() || e.is_timeout() {
                    BackendError::Unavailable(e.to_string())
                } else {
                    BackendError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
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
    // Ollama uses the same messages array format as OpenAI.
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
        "stream": false,
        "options": {
            "num_predict": req.max_tokens,
        },
    })
}

fn parse_response(resp: ApiResponse) -> Result<ChatResponse, BackendError> {
    if resp.message.content.is_empty() {
        return Err(BackendError::Empty);
    }
    Ok(ChatResponse {
        content: resp.message.content,
        model: resp.model,
        tokens_in: resp.prompt_eval_count.unwrap_or(0),
        tokens_out: resp.eval_count.unwrap_or(0),
    })
}

// Ollama API response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    message: OllamaMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatTurn, Role};

    #[test]
    fn num_predict_carries_max_tokens() {
        let req = ChatRequest {
            model: "llama3".to_string(),
            turns: vec![ChatTurn::new(Role::User, "hi")],
            max_tokens: 512,
        };
        let body = build_request_body(&req);
        assert_eq!(body["options"]["num_predict"], 512);
        assert_eq!(body["stream"], false);
    }
}
