//! Per-participant state machine: observe the transcript through a
//! tailing cursor, decide relevance, rebuild the backend context, invoke
//! the backend under a deadline, publish the reply.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use conclave_backend::{BackendError, ChatBackend, ChatRequest, ChatResponse, ChatTurn, Role};
use conclave_core::config::ParticipantConfig;
use conclave_core::types::{Message, MessageId, MessageKind, ParticipantId};
use conclave_transcript::{read_transcript, TranscriptError, TranscriptWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcaster::{PublishError, Publisher};
use crate::prompt::PromptBuilder;

/// Where a reactor currently is in its observe → publish cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Waiting for a relevant record.
    Idle,
    /// A backend call is in flight.
    Thinking,
    /// Submitting the reply to the broadcaster.
    Publishing,
    /// The last backend call failed; resets to `Idle` on the next record.
    Errored,
    /// Shut down; terminal.
    Stopped,
}

/// External view of a running reactor. State reads copy the value out
/// under a short-held lock; suspension is a flag the reactor consults in
/// its filter.
#[derive(Clone)]
pub struct ReactorHandle {
    id: ParticipantId,
    state: Arc<Mutex<ReactorState>>,
    suspended: Arc<AtomicBool>,
}

impl ReactorHandle {
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn state(&self) -> ReactorState {
        *self.state.lock().expect("reactor state lock")
    }

    /// A suspended reactor stays `Idle` and skips relevant records.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }
}

pub struct Reactor {
    id: ParticipantId,
    display_name: String,
    backend: Arc<dyn ChatBackend>,
    model: String,
    max_tokens: u32,
    deadline: Duration,
    emit_diagnostics: bool,
    transcript_path: PathBuf,
    mirror: Option<TranscriptWriter>,
    publisher: Publisher,
    system_turn: String,
    /// The other participants, for detecting user turns directed away
    /// from this reactor.
    peers: Vec<ParticipantId>,
    /// Ids of every record this reactor has published. Directed replies
    /// are only relevant when they point at one of these.
    authored: HashSet<MessageId>,
    state: Arc<Mutex<ReactorState>>,
    suspended: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Reactor {
    pub fn new(
        cfg: &ParticipantConfig,
        roster: &[ParticipantConfig],
        session_dir: &Path,
        backend: Arc<dyn ChatBackend>,
        publisher: Publisher,
        cancel: CancellationToken,
    ) -> (Self, ReactorHandle) {
        let mirror_path = session_dir.join(format!("{}.jsonl", cfg.id));
        let mirror = match TranscriptWriter::open(&mirror_path) {
            Ok(w) => Some(w),
            Err(e) => {
                // advisory only; the discussion continues without it
                warn!(participant = %cfg.id, error = %e, "could not open mirror log");
                None
            }
        };

        let transcript_path = session_dir.join(conclave_transcript::store::DISCUSSION_FILE);

        // directed replies must keep triggering across a restart: rebuild
        // the set of own record ids from whatever transcript already exists
        let authored: HashSet<MessageId> = match read_transcript(&transcript_path) {
            Ok(records) => records
                .into_iter()
                .filter(|m| m.from == cfg.id)
                .map(|m| m.id)
                .collect(),
            Err(e) => {
                warn!(participant = %cfg.id, error = %e, "could not seed authored ids from transcript");
                HashSet::new()
            }
        };

        let state = Arc::new(Mutex::new(ReactorState::Idle));
        let suspended = Arc::new(AtomicBool::new(false));
        let handle = ReactorHandle {
            id: cfg.id.clone(),
            state: state.clone(),
            suspended: suspended.clone(),
        };

        let reactor = Self {
            id: cfg.id.clone(),
            display_name: cfg.display_name().to_string(),
            backend,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            deadline: Duration::from_secs(cfg.timeout_secs),
            emit_diagnostics: cfg.emit_diagnostics,
            transcript_path,
            mirror,
            publisher,
            system_turn: PromptBuilder::new(cfg, roster).build(),
            peers: roster
                .iter()
                .filter(|p| p.id != cfg.id)
                .map(|p| p.id.clone())
                .collect(),
            authored,
            state,
            suspended,
            cancel,
        };
        (reactor, handle)
    }

    /// Consume cursor deliveries until shutdown. Records are handled
    /// strictly in transcript order with at most one backend call in
    /// flight; triggers that arrive mid-call queue in the bounded inbox.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Message>) {
        loop {
            let record = tokio::select! {
                _ = self.cancel.cancelled() => break,
                maybe = inbox.recv() => match maybe {
                    Some(record) => record,
                    None => break,
                },
            };
            self.observe(record).await;
        }
        self.set_state(ReactorState::Stopped);
        debug!(participant = %self.id, "reactor stopped");
    }

    async fn observe(&mut self, record: Message) {
        if self.state_snapshot() == ReactorState::Errored {
            self.set_state(ReactorState::Idle);
        }
        if !self.should_react(&record) {
            return;
        }
        self.react(record).await;
    }

    /// Relevance filter. All required state is in the record itself plus
    /// this reactor's identity, roster, and the ids it has authored.
    fn should_react(&self, m: &Message) -> bool {
        // never react to own output
        if m.from == self.id {
            return false;
        }
        if self.suspended.load(Ordering::SeqCst) {
            return false;
        }
        if m.mentions(&self.id) {
            return true;
        }
        if m.reply_to
            .as_ref()
            .is_some_and(|r| self.authored.contains(r))
        {
            return true;
        }
        // a human turn addresses the whole council, unless it singles
        // out other participants by mention
        m.kind == MessageKind::User && !self.peers.iter().any(|p| m.mentions(p))
    }

    async fn react(&mut self, trigger: Message) {
        self.set_state(ReactorState::Thinking);

        let request = match self.build_request() {
            Ok(req) => req,
            Err(e) => {
                warn!(participant = %self.id, error = %e, "context re-read failed");
                self.set_state(ReactorState::Errored);
                return;
            }
        };

        info!(
            participant = %self.id,
            backend = %self.backend.name(),
            model = %self.model,
            trigger = %trigger.id,
            history_len = request.turns.len(),
            "invoking backend"
        );

        let started = Instant::now();
        let result = match tokio::time::timeout(self.deadline, self.backend.complete(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                secs: self.deadline.as_secs(),
            }),
        };
        // an empty completion is a failure, not a blank transcript record
        let result = match result {
            Ok(resp) if resp.content.is_empty() => Err(BackendError::Empty),
            other => other,
        };

        match result {
            Ok(resp) => self.publish_reply(&trigger, resp, started).await,
            Err(e) => self.report_failure(&trigger, e).await,
        }
    }

    async fn publish_reply(&mut self, trigger: &Message, resp: ChatResponse, started: Instant) {
        info!(
            participant = %self.id,
            latency_ms = started.elapsed().as_millis() as u64,
            tokens_in = resp.tokens_in,
            tokens_out = resp.tokens_out,
            "backend replied"
        );
        self.set_state(ReactorState::Publishing);

        let reply = Message::assistant(self.id.clone(), &resp.content, Some(trigger.id.clone()));
        self.authored.insert(reply.id.clone());

        // the transcript is authoritative; the mirror is best effort
        if let Some(mirror) = self.mirror.as_mut() {
            if let Err(e) = mirror.append(&reply) {
                warn!(participant = %self.id, error = %e, "mirror write failed");
            }
        }

        match self.publisher.publish(reply).await {
            Ok(()) => self.set_state(ReactorState::Idle),
            Err(PublishError::ChannelFull) => {
                warn!(participant = %self.id, "broadcast channel full; reply discarded");
                self.set_state(ReactorState::Idle);
            }
            Err(PublishError::Closed) => {
                debug!(participant = %self.id, "broadcaster gone; reply dropped");
                self.set_state(ReactorState::Idle);
            }
        }
    }

    async fn report_failure(&mut self, trigger: &Message, err: BackendError) {
        error!(
            participant = %self.id,
            backend = %self.backend.name(),
            trigger = %trigger.id,
            error = %err,
            "backend call failed"
        );
        self.set_state(ReactorState::Errored);

        if self.emit_diagnostics {
            // no reply_to: a directed reply here could re-trigger the
            // author of the message that caused the failure
            let note = Message::system(
                self.id.clone(),
                &format!("{} could not answer: {err}", self.display_name),
            );
            self.authored.insert(note.id.clone());
            if let Err(e) = self.publisher.publish(note).await {
                debug!(participant = %self.id, error = %e, "diagnostic record not published");
            }
        }
    }

    /// Rebuild the backend input from the whole transcript (position 0).
    fn build_request(&self) -> Result<ChatRequest, TranscriptError> {
        let records = read_transcript(&self.transcript_path)?;
        let mut turns = Vec::with_capacity(records.len() + 1);
        turns.push(ChatTurn::new(Role::System, self.system_turn.clone()));
        for record in &records {
            turns.push(self.turn_for(record));
        }
        Ok(ChatRequest {
            model: self.model.clone(),
            turns,
            max_tokens: self.max_tokens,
        })
    }

    /// Map a transcript record to a backend turn. Chat APIs carry no
    /// authorship on assistant turns, so records from other authors get a
    /// bracketed id prefix; this reactor's own turns pass through plain.
    fn turn_for(&self, m: &Message) -> ChatTurn {
        match m.kind {
            MessageKind::User => ChatTurn::new(Role::User, m.content.clone()),
            MessageKind::System => ChatTurn::new(Role::System, m.content.clone()),
            MessageKind::Assistant => {
                if m.from == self.id {
                    ChatTurn::new(Role::Assistant, m.content.clone())
                } else {
                    ChatTurn::new(Role::Assistant, format!("[{}] {}", m.from, m.content))
                }
            }
        }
    }

    fn state_snapshot(&self) -> ReactorState {
        *self.state.lock().expect("reactor state lock")
    }

    fn set_state(&self, next: ReactorState) {
        *self.state.lock().expect("reactor state lock") = next;
    }
}
