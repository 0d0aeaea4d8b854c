// End-to-end council behavior against in-memory backends: fan-out,
// directed mentions, self-loop suppression, failure diagnostics,
// suspension, and broadcaster backpressure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use conclave_backend::{BackendError, MockBackend};
use conclave_core::config::{
    BackendKind, OverflowPolicy, ParticipantConfig, REACTOR_INBOX_CAPACITY,
};
use conclave_core::types::{Message, MessageKind, ParticipantId};
use conclave_council::broadcaster::spawn_broadcaster;
use conclave_council::reactor::{Reactor, ReactorHandle};
use conclave_council::Publisher;
use conclave_transcript::{read_transcript, TailCursor, TranscriptWriter, DISCUSSION_FILE};
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(10);
const SETTLE: Duration = Duration::from_millis(300);

fn participant(id: &str) -> ParticipantConfig {
    ParticipantConfig {
        id: ParticipantId::new(id),
        display_name: None,
        backend: BackendKind::Ollama,
        model: "mock-model".to_string(),
        api_key: None,
        base_url: None,
        max_tokens: 64,
        timeout_secs: 1,
        emit_diagnostics: true,
    }
}

struct TestCouncil {
    _dir: tempfile::TempDir,
    transcript: PathBuf,
    publisher: Publisher,
    cancel: CancellationToken,
    handles: Vec<ReactorHandle>,
}

impl TestCouncil {
    /// Wire broadcaster + one cursor/reactor pair per (config, backend),
    /// exactly as the orchestrator does, minus the host process.
    fn start(members: Vec<(ParticipantConfig, Arc<MockBackend>)>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let transcript = dir.path().join(DISCUSSION_FILE);
        let writer = TranscriptWriter::open(&transcript).unwrap();

        let cancel = CancellationToken::new();
        let (publisher, _broadcaster) = spawn_broadcaster(
            writer,
            100,
            OverflowPolicy::Block,
            Duration::from_secs(2),
            cancel.clone(),
        );

        let roster: Vec<ParticipantConfig> = members.iter().map(|(cfg, _)| cfg.clone()).collect();
        let mut handles = Vec::new();
        for (cfg, backend) in members {
            let (reactor, handle) = Reactor::new(
                &cfg,
                &roster,
                dir.path(),
                backend,
                publisher.clone(),
                cancel.clone(),
            );
            let cursor = TailCursor::new(&transcript, POLL, cancel.clone());
            let (tx, rx) = tokio::sync::mpsc::channel(REACTOR_INBOX_CAPACITY);
            tokio::spawn(cursor.run(tx));
            tokio::spawn(reactor.run(rx));
            handles.push(handle);
        }

        Self {
            _dir: dir,
            transcript,
            publisher,
            cancel,
            handles,
        }
    }

    async fn submit(&self, msg: Message) {
        self.publisher.publish(msg).await.unwrap();
    }

    /// Poll the transcript until `cond` holds or 5 s pass.
    async fn wait_for(&self, cond: impl Fn(&[Message]) -> bool) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let records = read_transcript(&self.transcript).unwrap();
            if cond(&records) {
                return records;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("transcript never stabilized; records: {records:#?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn records(&self) -> Vec<Message> {
        read_transcript(&self.transcript).unwrap()
    }
}

impl Drop for TestCouncil {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test]
async fn two_participant_fan_out() {
    let a = Arc::new(MockBackend::replying("a1"));
    let b = Arc::new(MockBackend::replying("b1"));
    let council = TestCouncil::start(vec![
        (participant("a"), a.clone()),
        (participant("b"), b.clone()),
    ]);

    council.submit(Message::user("hello")).await;

    let records = council.wait_for(|r| r.len() >= 3).await;
    tokio::time::sleep(SETTLE).await;
    let records_after = council.records();
    assert_eq!(records_after.len(), records.len(), "transcript kept growing");

    assert_eq!(records[0].content, "hello");
    assert_eq!(records[0].from, ParticipantId::user());

    let from_a: Vec<_> = records.iter().filter(|m| m.from.as_str() == "a").collect();
    let from_b: Vec<_> = records.iter().filter(|m| m.from.as_str() == "b").collect();
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_b.len(), 1);
    assert_eq!(from_a[0].content, "a1");
    assert_eq!(from_b[0].content, "b1");

    // each reply is a directed reply to the user turn, never to itself
    assert_eq!(from_a[0].reply_to.as_ref(), Some(&records[0].id));
    assert_eq!(from_b[0].reply_to.as_ref(), Some(&records[0].id));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn directed_mention_invokes_only_the_named_participant() {
    let a = Arc::new(MockBackend::replying("a1"));
    let b = Arc::new(MockBackend::replying("b1"));
    let council = TestCouncil::start(vec![
        (participant("a"), a.clone()),
        (participant("b"), b.clone()),
    ]);

    council.submit(Message::user("@a only")).await;

    council
        .wait_for(|r| r.iter().any(|m| m.from.as_str() == "a"))
        .await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0, "unmentioned participant must stay silent");
}

#[tokio::test]
async fn own_mention_does_not_self_trigger() {
    let a = Arc::new(MockBackend::replying("echo"));
    let council = TestCouncil::start(vec![(participant("a"), a.clone())]);

    // a record from `a` that mentions `a` — never-react-to-own-output wins
    council
        .submit(Message::assistant(
            ParticipantId::new("a"),
            "@a again",
            None,
        ))
        .await;

    council.wait_for(|r| r.len() == 1).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(a.calls(), 0);
    assert_eq!(council.records().len(), 1);
}

#[tokio::test]
async fn reply_chain_reaches_the_original_author() {
    let a = Arc::new(MockBackend::replying("a1"));
    let council = TestCouncil::start(vec![(participant("a"), a.clone())]);

    council.submit(Message::user("hello")).await;
    let records = council
        .wait_for(|r| r.iter().any(|m| m.from.as_str() == "a"))
        .await;
    let a_reply = records.iter().find(|m| m.from.as_str() == "a").unwrap();

    // another participant answers `a` directly; `a` must react again
    council
        .submit(Message::assistant(
            ParticipantId::new("b"),
            "disagree",
            Some(a_reply.id.clone()),
        ))
        .await;

    council.wait_for(|_| a.calls() >= 2).await;

    // a reply pointing at a record `a` never authored is ignored
    council
        .submit(Message::assistant(
            ParticipantId::new("b"),
            "unrelated",
            Some(conclave_core::types::MessageId::new()),
        ))
        .await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn backend_failure_emits_diagnostic_and_reactor_recovers() {
    let a = Arc::new(
        MockBackend::replying("recovered").failing_once(BackendError::Unavailable(
            "connection refused".to_string(),
        )),
    );
    let council = TestCouncil::start(vec![(participant("a"), a.clone())]);

    council.submit(Message::user("first")).await;
    let records = council
        .wait_for(|r| r.iter().any(|m| m.kind == MessageKind::System))
        .await;

    let diag = records
        .iter()
        .find(|m| m.kind == MessageKind::System)
        .unwrap();
    assert_eq!(diag.from.as_str(), "a");
    assert!(diag.content.contains("could not answer"));
    assert!(diag.reply_to.is_none());

    // the scripted failure is consumed; the next turn gets a real reply
    council.submit(Message::user("second")).await;
    council
        .wait_for(|r| r.iter().any(|m| m.kind == MessageKind::Assistant))
        .await;
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn suspended_reactor_ignores_turns_until_resumed() {
    let a = Arc::new(MockBackend::replying("a1"));
    let council = TestCouncil::start(vec![(participant("a"), a.clone())]);
    let handle = &council.handles[0];

    handle.suspend();
    council.submit(Message::user("while away")).await;
    council.wait_for(|r| r.len() == 1).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(a.calls(), 0);

    handle.resume();
    council.submit(Message::user("back now")).await;
    council
        .wait_for(|r| r.iter().any(|m| m.kind == MessageKind::Assistant))
        .await;
    assert_eq!(a.calls(), 1);
}

#[tokio::test]
async fn blocked_submission_waits_for_drain_and_keeps_order() {
    use conclave_council::broadcaster::{channel, Broadcaster};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DISCUSSION_FILE);
    let writer = TranscriptWriter::open(&path).unwrap();
    let cancel = CancellationToken::new();

    // capacity 1 and no drainer running yet
    let (publisher, rx) = channel(1, OverflowPolicy::Block);
    publisher.publish(Message::user("first")).await.unwrap();

    let second = {
        let publisher = publisher.clone();
        tokio::spawn(async move { publisher.publish(Message::user("second")).await })
    };

    // with no drainer progress the second submission must not return
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!second.is_finished(), "blocked submit returned early");

    let drain = tokio::spawn(
        Broadcaster::new(writer, rx, Duration::from_secs(2), cancel.clone()).run(),
    );
    second.await.unwrap().unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if read_transcript(&path).unwrap().len() == 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "drain never landed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let records = read_transcript(&path).unwrap();
    assert_eq!(records[0].content, "first");
    assert_eq!(records[1].content, "second");

    cancel.cancel();
    drop(publisher);
    drain.await.unwrap().unwrap();
}

#[tokio::test]
async fn hung_backend_times_out_and_council_moves_on() {
    let mut cfg = participant("a");
    cfg.timeout_secs = 1;
    let a = Arc::new(MockBackend::replying("too late").with_delay(Duration::from_secs(30)));
    let council = TestCouncil::start(vec![(cfg, a.clone())]);

    council.submit(Message::user("anyone there?")).await;

    let records = council
        .wait_for(|r| r.iter().any(|m| m.kind == MessageKind::System))
        .await;
    let diag = records
        .iter()
        .find(|m| m.kind == MessageKind::System)
        .unwrap();
    assert!(diag.content.contains("timed out"));
    assert!(!records.iter().any(|m| m.content == "too late"));
}

#[tokio::test]
async fn council_bootstrap_runs_against_a_real_host() {
    // exit-immediately host: run() must come back with its exit code and
    // leave a session directory with an (empty) transcript behind
    #[cfg(unix)]
    {
        use conclave_core::config::{CouncilConfig, HostConfig, SessionConfig};
        use conclave_council::Council;

        let root = tempfile::tempdir().unwrap();
        let mut config = CouncilConfig::default();
        config.session = SessionConfig {
            root: root.path().to_string_lossy().to_string(),
            resume: true,
        };
        config.host = HostConfig {
            id: ParticipantId::host(),
            command: "true".to_string(),
            args: vec![],
        };

        let council = Council::bootstrap(config).await.unwrap();
        let session = council.session_dir().to_path_buf();
        let code = council.run().await.unwrap();

        assert_eq!(code, 0);
        assert!(session.join(DISCUSSION_FILE).exists());
        assert!(read_transcript(&session.join(DISCUSSION_FILE))
            .unwrap()
            .is_empty());
    }
}
