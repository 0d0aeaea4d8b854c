use std::sync::Arc;
use std::time::Duration;

use conclave_core::config::{BackendKind, ParticipantConfig};

use crate::anthropic::AnthropicBackend;
use crate::backend::{BackendError, ChatBackend};
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;

/// Resolve a participant's configured backend into a live adapter.
pub fn build_backend(cfg: &ParticipantConfig) -> Result<Arc<dyn ChatBackend>, BackendError> {
    let timeout = Duration::from_secs(cfg.timeout_secs);

    match cfg.backend {
        BackendKind::Anthropic => {
            let api_key = require_key(cfg)?;
            Ok(Arc::new(AnthropicBackend::new(
                api_key,
                cfg.base_url.clone(),
                timeout,
            )))
        }
        BackendKind::Openai => {
            let api_key = require_key(cfg)?;
            Ok(Arc::new(OpenAiBackend::new(
                api_key,
                cfg.base_url.clone(),
                timeout,
            )))
        }
        BackendKind::Ollama => Ok(Arc::new(OllamaBackend::new(cfg.base_url.clone(), timeout))),
    }
}

fn require_key(cfg: &ParticipantConfig) -> Result<String, BackendError> {
    cfg.api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            BackendError::Unavailable(format!(
                "participant '{}' needs an api_key for its backend",
                cfg.id
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::types::ParticipantId;

    fn participant(backend: BackendKind, api_key: Option<&str>) -> ParticipantConfig {
        ParticipantConfig {
            id: ParticipantId::new("critic"),
            display_name: None,
            backend,
            model: "m".to_string(),
            api_key: api_key.map(String::from),
            base_url: None,
            max_tokens: 64,
            timeout_secs: 5,
            emit_diagnostics: true,
        }
    }

    #[test]
    fn anthropic_requires_api_key() {
        assert!(build_backend(&participant(BackendKind::Anthropic, None)).is_err());
        assert!(build_backend(&participant(BackendKind::Anthropic, Some("sk-x"))).is_ok());
    }

    #[test]
    fn ollama_needs_no_key() {
        let backend = build_backend(&participant(BackendKind::Ollama, None)).unwrap();
        assert_eq!(backend.name(), "ollama");
    }
}
