//! Host process adapter. The host is an opaque interactive binary
//! supplied by the user: it keeps the controlling terminal, runs inside
//! the session directory, and is expected to append its own turns to the
//! transcript through the same line codec. Alongside it runs a display
//! cursor that renders the other models' replies to the operator.

use std::path::Path;
use std::process::Stdio;

use conclave_core::config::HostConfig;
use conclave_core::types::{Message, MessageKind, ParticipantId};
use conclave_transcript::TailCursor;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::OrchestratorError;

pub struct HostProcess {
    id: ParticipantId,
    child: Child,
}

impl HostProcess {
    /// Spawn the host with inherited stdio and the session directory as
    /// its working directory.
    pub fn spawn(config: &HostConfig, session_dir: &Path) -> Result<Self, OrchestratorError> {
        info!(command = %config.command, dir = %session_dir.display(), "starting host");

        let child = Command::new(&config.command)
            .args(&config.args)
            .current_dir(session_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OrchestratorError::Host(format!(
                        "host command '{}' not found on PATH",
                        config.command
                    ))
                } else {
                    OrchestratorError::Host(format!("failed to spawn host: {e}"))
                }
            })?;

        Ok(Self {
            id: config.id.clone(),
            child,
        })
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Wait for the host to exit. A non-zero host exit is a normal
    /// shutdown trigger; the code is passed through as the process exit
    /// code. Termination by signal maps to 1.
    pub async fn wait(&mut self) -> Result<i32, OrchestratorError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| OrchestratorError::Host(format!("host wait failed: {e}")))?;
        Ok(status.code().unwrap_or(1))
    }

    /// Best-effort kill, used when shutdown was triggered by a signal
    /// rather than by the host exiting.
    pub async fn terminate(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "host already gone");
        }
    }
}

/// The display filter inverts the reactors': only the *other* models'
/// replies are shown — the host already echoes its own dialogue.
pub fn is_display_record(m: &Message, host_id: &ParticipantId) -> bool {
    m.from != *host_id && m.kind != MessageKind::User
}

/// Consume a cursor feed and render the other participants' records to
/// the operator's terminal (the host child shares it).
pub async fn run_display(mut rx: mpsc::Receiver<Message>, host_id: ParticipantId) {
    while let Some(record) = rx.recv().await {
        if !is_display_record(&record, &host_id) {
            continue;
        }
        println!("\n── {} ──\n{}", record.from, record.content);
    }
}

/// Wire a display cursor to its renderer.
pub fn spawn_display(
    cursor: TailCursor,
    host_id: ParticipantId,
    inbox_capacity: usize,
) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(inbox_capacity);
    let cursor_task = tokio::spawn(cursor.run(tx));
    let render_task = tokio::spawn(async move {
        run_display(rx, host_id).await;
        debug!("host display feed ended");
    });
    (cursor_task, render_task)
}
