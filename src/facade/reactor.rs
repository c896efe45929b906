//! Reactor facade
//!
//! Starts and stops the development server and describes the status-bar
//! button that stops it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use super::session::SessionFacade;
use crate::config::ConfigSource;
use crate::output::BufferTranscript;
use crate::process::{InputChannel, ProcessSpawner, SessionEvent, SessionResult, SessionState};
use crate::toolchain::SessionKind;

pub const STOP_BUTTON_TEXT: &str = "$(primitive-square)";
pub const STOP_BUTTON_TOOLTIP: &str = "Stop reactor";
pub const STOP_BUTTON_COMMAND: &str = "elm.reactorStop";

/// Status-bar item an editor shows while the reactor runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusButton {
    pub text: String,
    pub tooltip: String,
    pub command: String,
    pub visible: bool,
}

/// Development server verbs
pub struct Reactor {
    facade: SessionFacade,
}

impl Reactor {
    pub fn new(
        workspace: impl Into<PathBuf>,
        config: Arc<dyn ConfigSource>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            facade: SessionFacade::new(SessionKind::Reactor, workspace, config, spawner),
        }
    }

    pub async fn start_reactor(&self) -> SessionResult<InputChannel> {
        let hint = self.facade.workspace_hint();
        self.facade.start(&hint).await
    }

    pub async fn stop_reactor(&self) -> SessionResult<()> {
        self.facade.stop().await?;
        info!("Elm Reactor stopped.");
        Ok(())
    }

    pub fn status_button(&self) -> StatusButton {
        StatusButton {
            text: STOP_BUTTON_TEXT.to_string(),
            tooltip: STOP_BUTTON_TOOLTIP.to_string(),
            command: STOP_BUTTON_COMMAND.to_string(),
            visible: self.is_running(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.facade.is_running()
    }

    pub fn state(&self) -> SessionState {
        self.facade.state()
    }

    pub fn transcript(&self) -> Arc<BufferTranscript> {
        self.facade.transcript()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.facade.subscribe()
    }

    pub async fn dispose(&self) {
        self.facade.dispose().await;
    }
}
