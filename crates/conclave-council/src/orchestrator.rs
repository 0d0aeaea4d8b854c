//! Council lifecycle: session directory, broadcaster, host, one cursor +
//! reactor pair per participant, signal handling, graceful shutdown.
//!
//! The council handle is passed explicitly to everything that needs it —
//! there is no process-wide registry, so a new session always starts from
//! fresh state.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use conclave_backend::build_backend;
use conclave_core::config::{CouncilConfig, REACTOR_INBOX_CAPACITY};
use conclave_transcript::{TailCursor, TranscriptError, TranscriptWriter, DISCUSSION_FILE};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::{spawn_broadcaster, Publisher};
use crate::error::OrchestratorError;
use crate::host::{spawn_display, HostProcess};
use crate::reactor::{Reactor, ReactorHandle};

pub struct Council {
    session_dir: PathBuf,
    cancel: CancellationToken,
    publisher: Publisher,
    broadcaster: JoinHandle<Result<(), TranscriptError>>,
    reactors: Vec<ReactorHandle>,
    tasks: Vec<JoinHandle<()>>,
    host: HostProcess,
}

impl Council {
    /// Bring the whole council up, in dependency order: session dir,
    /// transcript, broadcaster, host + display, then the participants.
    pub async fn bootstrap(config: CouncilConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;

        // resolve every backend before anything is spawned, so a bad
        // participant entry fails fast
        let mut backends = Vec::with_capacity(config.participants.len());
        for participant in &config.participants {
            backends.push(build_backend(participant)?);
        }

        let session_dir = create_session_dir(&config)?;
        info!(session = %session_dir.display(), "session directory ready");

        let transcript_path = session_dir.join(DISCUSSION_FILE);
        let writer = TranscriptWriter::open(&transcript_path)?;

        let cancel = CancellationToken::new();
        let (publisher, broadcaster) = spawn_broadcaster(
            writer,
            config.broadcast.capacity,
            config.broadcast.overflow,
            Duration::from_millis(config.broadcast.drain_timeout_ms),
            cancel.clone(),
        );

        let poll_interval = Duration::from_millis(config.cursor.poll_interval_ms);
        let mut tasks = Vec::new();

        // on resume the history was already reacted to and displayed;
        // cursors pick up at the end of the existing transcript
        let new_cursor = || {
            let cursor = TailCursor::new(&transcript_path, poll_interval, cancel.clone());
            if config.session.resume {
                cursor.resume_at_end()
            } else {
                cursor
            }
        };

        let host = HostProcess::spawn(&config.host, &session_dir)?;
        let (cursor_task, render_task) =
            spawn_display(new_cursor(), config.host.id.clone(), REACTOR_INBOX_CAPACITY);
        tasks.push(cursor_task);
        tasks.push(render_task);

        let mut reactors = Vec::with_capacity(config.participants.len());
        for (participant, backend) in config.participants.iter().zip(backends) {
            let (reactor, handle) = Reactor::new(
                participant,
                &config.participants,
                &session_dir,
                backend,
                publisher.clone(),
                cancel.clone(),
            );

            let (tx, rx) = mpsc::channel(REACTOR_INBOX_CAPACITY);
            tasks.push(tokio::spawn(new_cursor().run(tx)));
            tasks.push(tokio::spawn(reactor.run(rx)));

            info!(participant = %handle.id(), "participant joined the council");
            reactors.push(handle);
        }

        Ok(Self {
            session_dir,
            cancel,
            publisher,
            broadcaster,
            reactors,
            tasks,
            host,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Status and suspend/resume surface, one handle per participant.
    pub fn reactors(&self) -> &[ReactorHandle] {
        &self.reactors
    }

    /// A send-only handle onto the broadcaster, for external adapters
    /// that translate host output into transcript records.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Block until the host exits or a signal arrives, then shut down.
    /// Returns the process exit code: the host's own code when it exits
    /// first (a crashed host is still a normal shutdown trigger), 0 on
    /// signal.
    pub async fn run(mut self) -> Result<i32, OrchestratorError> {
        enum Trigger {
            HostExit(Result<i32, OrchestratorError>),
            Signal,
            // a fatal transcript error cancelled the token from below
            Fatal,
        }

        let trigger = {
            let cancel = self.cancel.clone();
            tokio::select! {
                status = self.host.wait() => Trigger::HostExit(status),
                _ = shutdown_signal() => Trigger::Signal,
                _ = cancel.cancelled() => Trigger::Fatal,
            }
        };

        let code = match trigger {
            Trigger::HostExit(status) => {
                let code = status?;
                info!(code, "host exited; shutting down the council");
                code
            }
            Trigger::Signal => {
                info!("interrupt received; shutting down the council");
                self.host.terminate().await;
                let _ = self.host.wait().await;
                0
            }
            Trigger::Fatal => {
                self.host.terminate().await;
                let _ = self.host.wait().await;
                1
            }
        };

        self.shutdown().await;
        Ok(code)
    }

    /// Cancel every task, then give the broadcaster its bounded drain.
    async fn shutdown(self) {
        self.cancel.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "task ended abnormally during shutdown");
            }
        }

        // all publishers must drop so the drain task can observe closure
        drop(self.publisher);
        match self.broadcaster.await {
            Ok(Ok(())) => debug!("broadcaster drained"),
            Ok(Err(e)) => warn!(error = %e, "broadcaster ended with a transcript error"),
            Err(e) => warn!(error = %e, "broadcaster task panicked"),
        }

        info!("council shut down");
    }
}

/// Create `<root>/<timestamp>` (or `<root>/live` when resuming),
/// restricted to the owning user.
fn create_session_dir(config: &CouncilConfig) -> Result<PathBuf, OrchestratorError> {
    let name = if config.session.resume {
        "live".to_string()
    } else {
        Utc::now().format("%Y%m%d-%H%M%S").to_string()
    };
    let dir = Path::new(&config.session.root).join(name);
    fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir)
}

/// Resolve on interrupt or terminate (unix); interrupt only elsewhere.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; listening for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
