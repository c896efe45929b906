//! REPL facade
//!
//! Editor verbs for the interactive session. Every send starts the REPL if
//! needed, writes the payload to its stdin and echoes a prettified copy into
//! the transcript.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use super::document::{TextSource, ELM_LANGUAGE_ID};
use super::session::SessionFacade;
use crate::config::ConfigSource;
use crate::output::BufferTranscript;
use crate::process::{
    InputChannel, ProcessSpawner, SessionError, SessionEvent, SessionResult, SessionState,
};
use crate::toolchain::SessionKind;

/// Stdin form of `text`: every line break escaped so the REPL reads one input
pub fn repl_payload(text: &str) -> String {
    format!("{}\n", text.replace('\n', "\\\n"))
}

/// Transcript form of `text`: prompt on the first line, bars on the rest
pub fn repl_echo(text: &str) -> String {
    format!("> {}\n", text.replace('\n', "\n| "))
}

/// Interactive session verbs
pub struct Repl {
    facade: SessionFacade,
}

impl Repl {
    pub fn new(
        workspace: impl Into<PathBuf>,
        config: Arc<dyn ConfigSource>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            facade: SessionFacade::new(SessionKind::Repl, workspace, config, spawner),
        }
    }

    /// Start the REPL, resolving the project from `hint` or the workspace
    pub async fn start_repl(&self, hint: Option<&Path>) -> SessionResult<InputChannel> {
        let hint = hint
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.facade.workspace_hint());
        self.facade.start(&hint).await
    }

    pub async fn stop_repl(&self) -> SessionResult<()> {
        self.facade.stop().await?;
        info!("Elm REPL stopped.");
        Ok(())
    }

    /// Send `text` as one REPL input on behalf of `doc`
    pub async fn send(&self, doc: &dyn TextSource, text: &str) -> SessionResult<()> {
        if doc.language_id() != ELM_LANGUAGE_ID {
            return Err(SessionError::UnsupportedDocument(
                doc.language_id().to_string(),
            ));
        }

        let hint = doc
            .file_name()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.facade.workspace_hint());
        self.facade.start(&hint).await?;
        self.facade.send(repl_payload(text).as_bytes()).await?;
        self.facade.sink().echo(&repl_echo(text));
        Ok(())
    }

    pub async fn send_line(&self, doc: &dyn TextSource) -> SessionResult<()> {
        self.send(doc, &doc.line_at_cursor()).await
    }

    pub async fn send_selection(&self, doc: &dyn TextSource) -> SessionResult<()> {
        self.send(doc, &doc.selection_text()).await
    }

    pub async fn send_file(&self, doc: &dyn TextSource) -> SessionResult<()> {
        self.send(doc, &doc.full_text()).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::DocumentSnapshot;
    use crate::process::testing::MockSpawner;
    use crate::toolchain::LaunchPlan;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn workspace(manifest: &str, contents: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(manifest), contents).unwrap();
        dir
    }

    fn repl(dir: &TempDir, config: HashMap<String, String>) -> (Repl, Arc<MockSpawner>) {
        let spawner = Arc::new(MockSpawner::new());
        let repl = Repl::new(dir.path(), Arc::new(config), spawner.clone());
        (repl, spawner)
    }

    #[test]
    fn test_payload_and_echo() {
        assert_eq!(repl_payload("1 + 1"), "1 + 1\n");
        assert_eq!(repl_payload("f x =\n  x"), "f x =\\\n  x\n");
        assert_eq!(repl_echo("1 + 1"), "> 1 + 1\n");
        assert_eq!(repl_echo("f x =\n  x"), "> f x =\n|   x\n");
    }

    #[tokio::test]
    async fn test_start_repl_current_project() {
        let dir = workspace("elm.json", r#"{"elm-version": "0.19.1"}"#);
        let (repl, spawner) = repl(&dir, HashMap::new());

        repl.start_repl(None).await.unwrap();
        assert!(repl.is_running());
        assert_eq!(
            spawner.plans(),
            vec![LaunchPlan {
                working_dir: dir.path().to_path_buf(),
                executable: "elm".to_string(),
                args: vec!["repl".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn test_start_repl_legacy_project_uses_configured_settings() {
        let dir = workspace("elm-package.json", r#"{"elm-version": "0.18.0 <= v < 0.19.0"}"#);
        let config = HashMap::from([("compiler".to_string(), "elm19".to_string())]);
        let (repl, spawner) = repl(&dir, config);

        repl.start_repl(None).await.unwrap();
        let plans = spawner.plans();
        assert_eq!(plans[0].executable, "elm-repl");
        assert!(plans[0].args.is_empty());
    }

    #[tokio::test]
    async fn test_start_repl_without_project_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (repl, spawner) = repl(&dir, HashMap::new());

        let result = repl.start_repl(Some(&dir.path().join("Main.elm"))).await;
        assert!(matches!(result, Err(SessionError::Resolve(_))));
        assert!(!repl.is_running());
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_send_file_writes_payload_and_echo() {
        let dir = workspace("elm.json", r#"{"elm-version": "0.19.1"}"#);
        let (repl, spawner) = repl(&dir, HashMap::new());
        let doc = DocumentSnapshot::elm("a\nb").with_file_name(dir.path().join("src/Main.elm"));

        repl.send_file(&doc).await.unwrap();

        let mut process = spawner.take_process().unwrap();
        assert_eq!(process.read_stdin(5).await, "a\\\nb\n");
        assert_eq!(repl.transcript().contents(), "> a\n| b\n");
    }

    #[tokio::test]
    async fn test_send_line_and_selection() {
        let dir = workspace("elm.json", r#"{"elm-version": "0.19.1"}"#);
        let (repl, spawner) = repl(&dir, HashMap::new());

        let doc = DocumentSnapshot::elm("x = 1\ny = 2\n").with_cursor_line(1);
        repl.send_line(&doc).await.unwrap();
        let doc = DocumentSnapshot::elm("x = 1\ny = 2\n").with_selection(0, 5);
        repl.send_selection(&doc).await.unwrap();

        assert_eq!(spawner.spawn_count(), 1);
        let mut process = spawner.take_process().unwrap();
        assert_eq!(process.read_stdin(12).await, "y = 2\nx = 1\n");
        assert_eq!(repl.transcript().contents(), "> y = 2\n> x = 1\n");
    }

    #[tokio::test]
    async fn test_send_rejects_non_elm_documents() {
        let dir = workspace("elm.json", r#"{"elm-version": "0.19.1"}"#);
        let (repl, spawner) = repl(&dir, HashMap::new());
        let mut doc = DocumentSnapshot::elm("1 + 1");
        doc.language_id = "javascript".to_string();

        for result in [
            repl.send(&doc, "1 + 1").await,
            repl.send_line(&doc).await,
            repl.send_selection(&doc).await,
            repl.send_file(&doc).await,
        ] {
            assert_eq!(
                result,
                Err(SessionError::UnsupportedDocument("javascript".to_string()))
            );
        }
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_repl() {
        let dir = workspace("elm.json", r#"{"elm-version": "0.19.1"}"#);
        let (repl, _) = repl(&dir, HashMap::new());

        assert_eq!(
            repl.stop_repl().await,
            Err(SessionError::NotRunning(SessionKind::Repl))
        );

        repl.send_file(&DocumentSnapshot::elm("1")).await.unwrap();
        repl.stop_repl().await.unwrap();
        assert!(!repl.is_running());
        assert_eq!(repl.transcript().contents(), "");
        assert!(!repl.transcript().is_visible());
    }

    #[tokio::test]
    async fn test_dispose_is_quiet_when_idle() {
        let dir = workspace("elm.json", r#"{"elm-version": "0.19.1"}"#);
        let (repl, spawner) = repl(&dir, HashMap::new());

        repl.dispose().await;
        assert_eq!(repl.state(), SessionState::Idle);

        repl.start_repl(None).await.unwrap();
        let process = spawner.take_process().unwrap();
        repl.dispose().await;
        assert!(process.was_killed());
        assert!(!repl.is_running());
    }
}
