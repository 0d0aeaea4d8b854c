use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::ParticipantId;

pub const DEFAULT_BROADCAST_CAPACITY: usize = 100;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
/// Per-reactor inbox depth between its cursor task and the reactor loop.
pub const REACTOR_INBOX_CAPACITY: usize = 64;

/// Top-level config (conclave.toml + CONCLAVE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CouncilConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub participants: Vec<ParticipantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Parent directory under which session directories are created.
    #[serde(default = "default_session_root")]
    pub root: String,
    /// Reuse the `live` directory instead of creating a timestamped one.
    #[serde(default)]
    pub resume: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root: default_session_root(),
            resume: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Identity the host writes into its own records.
    #[serde(default = "default_host_id")]
    pub id: ParticipantId,
    /// The interactive front-end binary. Opaque to the orchestrator.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            id: default_host_id(),
            command: String::new(),
            args: Vec::new(),
        }
    }
}

/// What the broadcaster does with a submission when its channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Apply backpressure — the submitting task waits for space.
    #[default]
    Block,
    /// Reject the submission; the caller logs and discards it.
    DropNewest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// How long the drain task keeps writing accepted messages after
    /// shutdown is requested.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BROADCAST_CAPACITY,
            overflow: OverflowPolicy::default(),
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Which chat API a participant talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Anthropic,
    /// OpenAI itself, or any OpenAI-compatible endpoint via `base_url`.
    Openai,
    Ollama,
}

/// One background council member. Immutable for the participant's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub id: ParticipantId,
    pub display_name: Option<String>,
    pub backend: BackendKind,
    pub model: String,
    pub api_key: Option<String>,
    /// Endpoint override (required for custom OpenAI-compatible providers).
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call backend deadline.
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
    /// Publish a `system` record into the discussion when a backend call fails.
    #[serde(default = "bool_true")]
    pub emit_diagnostics: bool,
}

impl ParticipantConfig {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }
}

impl CouncilConfig {
    /// Load config from a TOML file with CONCLAVE_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then ~/.conclave/conclave.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading council config");

        let config: CouncilConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONCLAVE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CouncilError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::CouncilError;

        if self.broadcast.capacity == 0 {
            return Err(CouncilError::Config(
                "broadcast.capacity must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for p in &self.participants {
            let id = p.id.as_str();
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(CouncilError::Config(format!(
                    "participant id '{id}' must be non-empty [A-Za-z0-9_-]"
                )));
            }
            if p.id == self.host.id || id == "user" {
                return Err(CouncilError::Config(format!(
                    "participant id '{id}' collides with a reserved identity"
                )));
            }
            if !seen.insert(id.to_string()) {
                return Err(CouncilError::Config(format!(
                    "duplicate participant id '{id}'"
                )));
            }
        }
        Ok(())
    }
}

fn bool_true() -> bool {
    true
}
fn default_capacity() -> usize {
    DEFAULT_BROADCAST_CAPACITY
}
fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_backend_timeout_secs() -> u64 {
    DEFAULT_BACKEND_TIMEOUT_SECS
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_host_id() -> ParticipantId {
    ParticipantId::host()
}

fn default_session_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conclave/sessions", home)
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conclave/conclave.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str) -> ParticipantConfig {
        ParticipantConfig {
            id: ParticipantId::new(id),
            display_name: None,
            backend: BackendKind::Ollama,
            model: "llama3".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
            emit_diagnostics: true,
        }
    }

    #[test]
    fn defaults_validate() {
        CouncilConfig::default().validate().expect("empty config is valid");
    }

    #[test]
    fn duplicate_participant_ids_rejected() {
        let mut cfg = CouncilConfig::default();
        cfg.participants = vec![participant("a"), participant("a")];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reserved_identities_rejected() {
        let mut cfg = CouncilConfig::default();
        cfg.participants = vec![participant("user")];
        assert!(cfg.validate().is_err());

        cfg.participants = vec![participant("host")];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn id_charset_enforced() {
        let mut cfg = CouncilConfig::default();
        cfg.participants = vec![participant("not ok")];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let toml = r#"
            [host]
            command = "claude"

            [broadcast]
            overflow = "drop-newest"

            [[participants]]
            id = "critic"
            backend = "anthropic"
            model = "claude-sonnet-4-6"
            api_key = "sk-test"
        "#;
        let cfg: CouncilConfig = ::figment::Figment::new()
            .merge(::figment::providers::Toml::string(toml))
            .extract()
            .expect("parse");
        assert_eq!(cfg.host.command, "claude");
        assert_eq!(cfg.broadcast.overflow, OverflowPolicy::DropNewest);
        assert_eq!(cfg.participants.len(), 1);
        assert_eq!(cfg.participants[0].timeout_secs, DEFAULT_BACKEND_TIMEOUT_SECS);
        assert!(cfg.participants[0].emit_diagnostics);
        cfg.validate().expect("valid");
    }
}
