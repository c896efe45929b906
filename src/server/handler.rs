//! Editor command handler
//!
//! Maps client messages onto the REPL and reactor facades of one workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::protocol::{ClientMessage, ServerMessage};
use crate::config::SettingsFile;
use crate::facade::{Reactor, Repl};
use crate::output::TranscriptEvent;
use crate::process::{ProcessSpawner, SessionEvent, SessionResult};
use crate::toolchain::SessionKind;

/// The sessions of one workspace, shared by every connection
pub struct SessionHandler {
    workspace: PathBuf,
    repl: Repl,
    reactor: Reactor,
}

impl SessionHandler {
    /// Sessions for `workspace`, configured from its settings file
    pub fn new(workspace: impl Into<PathBuf>, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let workspace = workspace.into();
        let settings = Arc::new(SettingsFile::new(&workspace));
        info!("Settings read from {}", settings.path().display());
        Self {
            repl: Repl::new(&workspace, settings.clone(), Arc::clone(&spawner)),
            reactor: Reactor::new(&workspace, settings, spawner),
            workspace,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    #[cfg(test)]
    pub fn repl(&self) -> &Repl {
        &self.repl
    }

    #[cfg(test)]
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Subscribe to the transcript of one session
    pub fn subscribe_transcript(&self, kind: SessionKind) -> broadcast::Receiver<TranscriptEvent> {
        match kind {
            SessionKind::Repl => self.repl.transcript().subscribe(),
            SessionKind::Reactor => self.reactor.transcript().subscribe(),
        }
    }

    /// Messages that bring a new connection's copy of a transcript up to date
    pub fn transcript_replay(&self, kind: SessionKind) -> Vec<ServerMessage> {
        let transcript = match kind {
            SessionKind::Repl => self.repl.transcript(),
            SessionKind::Reactor => self.reactor.transcript(),
        };
        let mut replay = Vec::new();
        if transcript.is_visible() {
            replay.push(ServerMessage::transcript(kind, TranscriptEvent::Shown));
        }
        let text = transcript.contents();
        if !text.is_empty() {
            replay.push(ServerMessage::transcript(
                kind,
                TranscriptEvent::Appended { text },
            ));
        }
        replay
    }

    /// Subscribe to lifecycle events of one session
    pub fn subscribe_events(&self, kind: SessionKind) -> broadcast::Receiver<SessionEvent> {
        match kind {
            SessionKind::Repl => self.repl.subscribe(),
            SessionKind::Reactor => self.reactor.subscribe(),
        }
    }

    /// Current status of one session
    pub fn status(&self, kind: SessionKind) -> ServerMessage {
        match kind {
            SessionKind::Repl => ServerMessage::Status {
                session: kind,
                state: self.repl.state(),
                button: None,
            },
            SessionKind::Reactor => ServerMessage::Status {
                session: kind,
                state: self.reactor.state(),
                button: Some(self.reactor.status_button()),
            },
        }
    }

    /// Run one client command and build the replies
    pub async fn handle(&self, message: ClientMessage) -> Vec<ServerMessage> {
        let command = message.command();
        let result: SessionResult<Vec<ServerMessage>> = match message {
            ClientMessage::Ping { seq } => {
                debug!("Received ping with seq {}", seq);
                Ok(vec![ServerMessage::pong(seq)])
            }
            ClientMessage::ReplStart { path } => self
                .repl
                .start_repl(path.as_deref().map(Path::new))
                .await
                .map(|_| vec![ServerMessage::ack(command)]),
            ClientMessage::ReplStop => stopped(SessionKind::Repl, self.repl.stop_repl().await),
            ClientMessage::ReplSend { document, text } => self
                .repl
                .send(&document, &text)
                .await
                .map(|_| vec![ServerMessage::ack(command)]),
            ClientMessage::ReplSendLine { document } => self
                .repl
                .send_line(&document)
                .await
                .map(|_| vec![ServerMessage::ack(command)]),
            ClientMessage::ReplSendSelection { document } => self
                .repl
                .send_selection(&document)
                .await
                .map(|_| vec![ServerMessage::ack(command)]),
            ClientMessage::ReplSendFile { document } => self
                .repl
                .send_file(&document)
                .await
                .map(|_| vec![ServerMessage::ack(command)]),
            ClientMessage::ReactorStart => self
                .reactor
                .start_reactor()
                .await
                .map(|_| vec![ServerMessage::ack(command)]),
            ClientMessage::ReactorStop => {
                stopped(SessionKind::Reactor, self.reactor.stop_reactor().await)
            }
            ClientMessage::GetStatus => Ok(vec![
                self.status(SessionKind::Repl),
                self.status(SessionKind::Reactor),
            ]),
        };

        result.unwrap_or_else(|e| {
            debug!("{} failed: {}", command, e);
            vec![ServerMessage::from(&e)]
        })
    }

    /// Stop both sessions and release their transcripts
    pub async fn dispose(&self) {
        tokio::join!(self.repl.dispose(), self.reactor.dispose());
    }
}

fn stopped(kind: SessionKind, result: SessionResult<()>) -> SessionResult<Vec<ServerMessage>> {
    result.map(|()| vec![ServerMessage::notice(format!("{} stopped.", kind))])
}
