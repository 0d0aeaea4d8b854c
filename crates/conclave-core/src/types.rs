use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a transcript record (UUIDv7 — time-sortable for
/// easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of a council member as it appears in the `from` field:
/// `"user"` for the human, `"host"` for the interactive front-end, and a
/// configured id for every background participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    /// The human driving the host front-end.
    pub fn user() -> Self {
        Self("user".to_string())
    }

    /// The default host identity.
    pub fn host() -> Self {
        Self("host".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Record variant — governs which participants react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A human turn. Every participant reacts.
    User,
    /// A model reply. Reacted to only on mention or directed reply.
    Assistant,
    /// Out-of-band diagnostics. Reacted to only on mention or directed reply.
    System,
}

/// One transcript record. The wire shape is a single JSON object per line;
/// the append position in `discussion.jsonl` is the canonical ordering —
/// `timestamp` is informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: ParticipantId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    /// Keys this version doesn't know about. Preserved so that re-encoding
    /// a decoded record never loses fields written by a newer writer.
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// A human turn, attributed to the well-known `"user"` identity.
    pub fn user(content: &str) -> Self {
        Self::build(ParticipantId::user(), MessageKind::User, content, None)
    }

    /// A model reply from `from`, optionally marked as a directed reply.
    pub fn assistant(from: ParticipantId, content: &str, reply_to: Option<MessageId>) -> Self {
        Self::build(from, MessageKind::Assistant, content, reply_to)
    }

    /// An out-of-band diagnostic record.
    pub fn system(from: ParticipantId, content: &str) -> Self {
        Self::build(from, MessageKind::System, content, None)
    }

    fn build(
        from: ParticipantId,
        kind: MessageKind,
        content: &str,
        reply_to: Option<MessageId>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            from,
            kind,
            content: content.to_string(),
            timestamp: Utc::now(),
            reply_to,
            extra: serde_json::Map::new(),
        }
    }

    /// Return `true` if `content` contains an `@<id>` mention of `id`.
    ///
    /// The characters on both sides of the `@<id>` token must not extend
    /// it: `@critic` mentions `critic`, but `@critics` does not, and
    /// neither does an email-like `foo@critic`.
    pub fn mentions(&self, id: &ParticipantId) -> bool {
        if id.as_str().is_empty() {
            return false;
        }
        let needle = format!("@{}", id.as_str());
        let mut start = 0;
        while let Some(pos) = self.content[start..].find(&needle) {
            let at = start + pos;
            let end = at + needle.len();
            let open = self.content[..at]
                .chars()
                .next_back()
                .map_or(true, |c| !is_token_char(c));
            let closed = self.content[end..]
                .chars()
                .next()
                .map_or(true, |c| !is_token_char(c));
            if open && closed {
                return true;
            }
            start = end;
        }
        false
    }
}

/// Participant ids are `[A-Za-z0-9_-]+`; any of these adjacent to an
/// `@<id>` match means the match sits inside a longer token.
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
