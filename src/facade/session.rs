//! Shared wiring behind the REPL and reactor facades

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::ConfigSource;
use crate::output::{BufferTranscript, OutputSink};
use crate::process::{
    InputChannel, ProcessSession, ProcessSpawner, SessionEvent, SessionResult, SessionState,
};
use crate::toolchain::{plan, resolve, LaunchConfig, LaunchPlan, SessionKind};

/// File name joined to the workspace root when no document path is known
const WORKSPACE_HINT_FILE: &str = "x";

/// One session kind bound to its settings, transcript and process session
pub struct SessionFacade {
    session: ProcessSession,
    sink: Arc<OutputSink>,
    transcript: Arc<BufferTranscript>,
    workspace: PathBuf,
    config: Arc<dyn ConfigSource>,
}

impl SessionFacade {
    pub fn new(
        kind: SessionKind,
        workspace: impl Into<PathBuf>,
        config: Arc<dyn ConfigSource>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        let transcript = Arc::new(BufferTranscript::new(kind.display_name()));
        let sink = Arc::new(OutputSink::new(kind, transcript.clone()));
        let session = ProcessSession::new(kind, spawner, Arc::clone(&sink));
        Self {
            session,
            sink,
            transcript,
            workspace: workspace.into(),
            config,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.session.kind()
    }

    pub fn transcript(&self) -> Arc<BufferTranscript> {
        Arc::clone(&self.transcript)
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_running(&self) -> bool {
        self.session.liveness()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Hint used when there is no document to resolve from
    pub fn workspace_hint(&self) -> PathBuf {
        self.workspace.join(WORKSPACE_HINT_FILE)
    }

    /// Start (or join) the session, resolving the project from `hint`
    pub async fn start(&self, hint: &Path) -> SessionResult<InputChannel> {
        let input = self.session.start(self.launch_plan(hint.to_path_buf())).await?;
        debug!("{} input bound to process {}", self.kind(), input.process_id());
        Ok(input)
    }

    /// Write to the running process
    pub async fn send(&self, data: &[u8]) -> SessionResult<()> {
        self.session.send(data).await
    }

    pub async fn stop(&self) -> SessionResult<()> {
        self.session.stop().await
    }

    /// Stop whatever is running or starting and release the transcript
    pub async fn dispose(&self) {
        match self.session.shutdown().await {
            Ok(()) => debug!("{} disposed", self.kind()),
            Err(e) => warn!("{} could not be stopped on dispose: {}", self.kind(), e),
        }
        self.sink.release();
    }

    /// Settings are snapshotted when the launch runs, so edits apply to the
    /// next start
    fn launch_plan(
        &self,
        hint: PathBuf,
    ) -> impl Future<Output = SessionResult<LaunchPlan>> + Send + 'static {
        let kind = self.kind();
        let config = Arc::clone(&self.config);
        async move {
            let settings = config.snapshot();
            let launch = LaunchConfig::from_source(&settings);
            let project = resolve(&hint)?;
            debug!(
                "{} project at {} ({})",
                kind,
                project.project_root.display(),
                project.generation
            );
            Ok(plan(kind, &project, &launch))
        }
    }
}
