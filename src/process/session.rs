//! Process session
//!
//! Owns the lifecycle of at most one external process per session kind.
//! Transitions run `Idle -> Starting -> Running -> Stopping -> Idle`; a
//! session is reused for as long as its owner lives.
//!
//! Launches and stops run on their own tasks so a caller that goes away
//! mid-transition cannot strand the session between states. Each running
//! process gets a supervisor task that notices unexpected exits and returns
//! the session to `Idle`.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::spawner::{
    ChildProcess, ProcessExit, ProcessReader, ProcessSpawner, ProcessWriter, SpawnedProcess,
};
use crate::output::{OutputSink, OutputStream};
use crate::toolchain::{LaunchPlan, ResolveError, SessionKind};

/// Shown when the toolchain executable cannot be found
pub const INSTALL_HINT: &str = "Install Elm from http://elm-lang.org/.";

/// How long output pumps may keep draining after the process exited
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 4096;
const INPUT_QUEUE_DEPTH: usize = 64;

/// Errors that can occur during session operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Failed to launch {executable}: {message}")]
    Launch { executable: String, message: String },

    #[error("{0} is not running")]
    NotRunning(SessionKind),

    #[error("{0} is busy starting or stopping; try again once it settles")]
    Busy(SessionKind),

    #[error("{0} is no longer accepting input")]
    InputClosed(SessionKind),

    #[error("Only Elm documents can be sent to the REPL, not '{0}'")]
    UnsupportedDocument(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Lifecycle notifications broadcast by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A process was spawned and the session is running
    Started {
        kind: SessionKind,
        process_id: Uuid,
        executable: String,
    },
    /// The process went away without being asked to
    Exited {
        kind: SessionKind,
        process_id: Uuid,
        exit_code: Option<i32>,
    },
    /// The process was killed by `stop`
    Stopped { kind: SessionKind, process_id: Uuid },
}

impl SessionEvent {
    pub fn kind(&self) -> SessionKind {
        match self {
            SessionEvent::Started { kind, .. }
            | SessionEvent::Exited { kind, .. }
            | SessionEvent::Stopped { kind, .. } => *kind,
        }
    }
}

/// Write-only handle to a running process's standard input
///
/// Every caller that starts a session while the same process is alive gets
/// a clone of the same channel. Once the process is gone, writes fail with
/// [`SessionError::InputClosed`].
#[derive(Debug, Clone)]
pub struct InputChannel {
    kind: SessionKind,
    process_id: Uuid,
    tx: mpsc::Sender<Vec<u8>>,
}

impl InputChannel {
    /// Identifier of the process this channel writes to
    pub fn process_id(&self) -> Uuid {
        self.process_id
    }

    /// Queue bytes for the process's stdin
    pub async fn write(&self, data: &[u8]) -> SessionResult<()> {
        self.tx
            .send(data.to_vec())
            .await
            .map_err(|_| SessionError::InputClosed(self.kind))
    }

    /// Whether both handles feed the same process input
    #[cfg(test)]
    pub fn same_channel(&self, other: &InputChannel) -> bool {
        self.process_id == other.process_id && self.tx.same_channel(&other.tx)
    }
}

/// Outcome shared with every caller waiting on an in-flight start
type StartOutcome = Option<SessionResult<InputChannel>>;

/// Kill request carrying the channel that confirms the exit
type KillRequest = oneshot::Sender<ProcessExit>;

struct RunningProcess {
    input: InputChannel,
    kill_tx: oneshot::Sender<KillRequest>,
}

enum Slot {
    Idle,
    Starting(watch::Receiver<StartOutcome>),
    Running(RunningProcess),
    Stopping,
}

impl Slot {
    fn state(&self) -> SessionState {
        match self {
            Slot::Idle => SessionState::Idle,
            Slot::Starting(_) => SessionState::Starting,
            Slot::Running(_) => SessionState::Running,
            Slot::Stopping => SessionState::Stopping,
        }
    }
}

struct Shared {
    kind: SessionKind,
    slot: Mutex<Slot>,
    spawner: Arc<dyn ProcessSpawner>,
    sink: Arc<OutputSink>,
    events_tx: broadcast::Sender<SessionEvent>,
}

/// Supervisor of one external process per session kind
pub struct ProcessSession {
    shared: Arc<Shared>,
}

impl ProcessSession {
    /// Create an idle session
    pub fn new(kind: SessionKind, spawner: Arc<dyn ProcessSpawner>, sink: Arc<OutputSink>) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                kind,
                slot: Mutex::new(Slot::Idle),
                spawner,
                sink,
                events_tx,
            }),
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.shared.kind
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.lock().state()
    }

    /// True iff a process is running
    pub fn liveness(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Start the session, or join the one already running or starting
    ///
    /// `plan` is only awaited when the session is idle. While a start is in
    /// flight, further callers wait for it and receive the same outcome.
    pub async fn start<F>(&self, plan: F) -> SessionResult<InputChannel>
    where
        F: Future<Output = SessionResult<LaunchPlan>> + Send + 'static,
    {
        let kind = self.shared.kind;
        let mut outcome_rx = {
            let mut slot = self.shared.lock();
            let in_flight = match &*slot {
                Slot::Running(running) => return Ok(running.input.clone()),
                Slot::Stopping => return Err(SessionError::Busy(kind)),
                Slot::Starting(rx) => Some(rx.clone()),
                Slot::Idle => None,
            };

            match in_flight {
                Some(rx) => {
                    debug!("{} start already in flight, waiting for it", kind);
                    rx
                }
                None => {
                    let (outcome_tx, outcome_rx) = watch::channel(None);
                    *slot = Slot::Starting(outcome_rx.clone());

                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        let launch = tokio::spawn({
                            let shared = Arc::clone(&shared);
                            async move { shared.launch(plan).await }
                        });
                        let outcome = match launch.await {
                            Ok(outcome) => outcome,
                            Err(e) => shared.abandon_start(e),
                        };
                        // Waiters may all have gone away
                        let _ = outcome_tx.send(Some(outcome));
                    });
                    outcome_rx
                }
            }
        };

        let outcome = match outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(SessionError::Launch {
                executable: kind.to_string(),
                message: "launch ended without reporting a result".to_string(),
            })
        })
    }

    /// Write bytes to the running process
    pub async fn send(&self, data: &[u8]) -> SessionResult<()> {
        let input = {
            let slot = self.shared.lock();
            match &*slot {
                Slot::Running(running) => running.input.clone(),
                _ => return Err(SessionError::NotRunning(self.shared.kind)),
            }
        };
        input.write(data).await
    }

    /// Kill the running process and release its transcript
    pub async fn stop(&self) -> SessionResult<()> {
        let kind = self.shared.kind;
        let running = {
            let mut slot = self.shared.lock();
            match std::mem::replace(&mut *slot, Slot::Stopping) {
                Slot::Running(running) => running,
                other => {
                    let err = match other {
                        Slot::Idle => SessionError::NotRunning(kind),
                        _ => SessionError::Busy(kind),
                    };
                    *slot = other;
                    return Err(err);
                }
            }
        };

        let shared = Arc::clone(&self.shared);
        let process_id = running.input.process_id;
        if let Err(e) = tokio::spawn(async move { shared.finish_stop(running).await }).await {
            error!("{} stop of process {} failed: {}", kind, process_id, e);
            *self.shared.lock() = Slot::Idle;
        }
        Ok(())
    }

    /// Stop the session, first waiting out a start that is in flight
    ///
    /// Idle is not an error here. A stop already in progress is left to
    /// finish on its own.
    pub async fn shutdown(&self) -> SessionResult<()> {
        loop {
            match self.stop().await {
                Ok(()) | Err(SessionError::NotRunning(_)) => return Ok(()),
                Err(SessionError::Busy(_)) => {
                    let in_flight = {
                        let slot = self.shared.lock();
                        match &*slot {
                            Slot::Starting(rx) => Some(rx.clone()),
                            _ => None,
                        }
                    };
                    let Some(mut rx) = in_flight else {
                        return Ok(());
                    };
                    debug!("{} waiting for start to settle before stopping", self.shared.kind);
                    let _ = rx.wait_for(Option::is_some).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// The launch task died without settling the slot
    fn abandon_start(&self, e: tokio::task::JoinError) -> SessionResult<InputChannel> {
        error!("{} launch task failed: {}", self.kind, e);
        let mut slot = self.lock();
        if matches!(&*slot, Slot::Starting(_)) {
            *slot = Slot::Idle;
        }
        Err(SessionError::Launch {
            executable: self.kind.to_string(),
            message: format!("launch aborted: {}", e),
        })
    }

    /// Resolve the plan, spawn, and settle the slot into `Running` or `Idle`
    async fn launch<F>(self: &Arc<Self>, plan: F) -> SessionResult<InputChannel>
    where
        F: Future<Output = SessionResult<LaunchPlan>>,
    {
        let spawned = match plan.await {
            Ok(plan) => self.spawn_process(&plan).map(|parts| (parts, plan.executable)),
            Err(e) => Err(e),
        };

        let mut slot = self.lock();
        match spawned {
            Ok(((running, supervisor), executable)) => {
                let input = running.input.clone();
                let process_id = input.process_id;
                *slot = Slot::Running(running);
                drop(slot);

                tokio::spawn(supervisor.run());
                info!("{} running as process {}", self.kind, process_id);
                self.emit(SessionEvent::Started {
                    kind: self.kind,
                    process_id,
                    executable,
                });
                Ok(input)
            }
            Err(e) => {
                *slot = Slot::Idle;
                drop(slot);
                warn!("{} failed to start: {}", self.kind, e);
                Err(e)
            }
        }
    }

    fn spawn_process(
        self: &Arc<Self>,
        plan: &LaunchPlan,
    ) -> SessionResult<(RunningProcess, Supervisor)> {
        info!(
            "Launching {}: {} {:?} in {}",
            self.kind,
            plan.executable,
            plan.args,
            plan.working_dir.display()
        );

        let SpawnedProcess {
            stdin,
            stdout,
            stderr,
            mut child,
        } = self
            .spawner
            .spawn(plan)
            .map_err(|e| launch_error(plan, &e))?;

        match child.try_wait() {
            Ok(Some(exit)) if !exit.success() => {
                return Err(SessionError::Launch {
                    executable: plan.executable.clone(),
                    message: format!("exited immediately with {}", exit),
                });
            }
            Ok(_) => {}
            Err(e) => warn!("Could not poll {} after spawn: {}", plan.executable, e),
        }

        let process_id = Uuid::new_v4();
        debug!(
            "{} process {} has pid {:?}",
            self.kind,
            process_id,
            child.id()
        );
        let (shutdown_tx, _) = broadcast::channel(1);
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);

        self.sink.begin();
        let pumps = vec![
            tokio::spawn(pump_output(
                stdout,
                OutputStream::Stdout,
                Arc::clone(&self.sink),
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(pump_output(
                stderr,
                OutputStream::Stderr,
                Arc::clone(&self.sink),
                shutdown_tx.subscribe(),
            )),
        ];
        let writer = tokio::spawn(forward_input(stdin, input_rx, shutdown_tx.subscribe()));

        let (kill_tx, kill_rx) = oneshot::channel();
        let running = RunningProcess {
            input: InputChannel {
                kind: self.kind,
                process_id,
                tx: input_tx,
            },
            kill_tx,
        };
        let supervisor = Supervisor {
            session: Arc::downgrade(self),
            kind: self.kind,
            process_id,
            child,
            kill_rx,
            pumps,
            writer,
            shutdown_tx,
        };
        Ok((running, supervisor))
    }

    async fn finish_stop(&self, running: RunningProcess) {
        let process_id = running.input.process_id;
        info!("Stopping {} process {}", self.kind, process_id);

        let (done_tx, done_rx) = oneshot::channel();
        let exit = match running.kill_tx.send(done_tx) {
            Ok(()) => done_rx.await.ok(),
            // Supervisor already finished; the process is gone
            Err(_) => None,
        };
        match exit {
            Some(exit) => debug!("{} process {} {}", self.kind, process_id, exit),
            None => debug!("{} process {} had already exited", self.kind, process_id),
        }

        self.sink.release();
        *self.lock() = Slot::Idle;
        self.emit(SessionEvent::Stopped {
            kind: self.kind,
            process_id,
        });
    }

    /// Called by the supervisor when the process exited without a stop request
    fn on_process_exit(&self, process_id: Uuid, exit: ProcessExit) {
        let mut slot = self.lock();
        let current = matches!(&*slot, Slot::Running(running) if running.input.process_id == process_id);
        if !current {
            return;
        }
        *slot = Slot::Idle;
        drop(slot);

        warn!("{} process {} exited unexpectedly ({})", self.kind, process_id, exit);
        self.emit(SessionEvent::Exited {
            kind: self.kind,
            process_id,
            exit_code: exit.exit_code,
        });
    }
}

fn launch_error(plan: &LaunchPlan, e: &io::Error) -> SessionError {
    let message = match e.kind() {
        io::ErrorKind::NotFound => format!("{} was not found. {}", plan.executable, INSTALL_HINT),
        io::ErrorKind::PermissionDenied => {
            format!("permission denied running {}", plan.executable)
        }
        _ => e.to_string(),
    };
    SessionError::Launch {
        executable: plan.executable.clone(),
        message,
    }
}

/// Watches one process until it exits or is killed
struct Supervisor {
    session: Weak<Shared>,
    kind: SessionKind,
    process_id: Uuid,
    child: Box<dyn ChildProcess>,
    kill_rx: oneshot::Receiver<KillRequest>,
    pumps: Vec<JoinHandle<()>>,
    writer: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

enum Wake {
    Exited(io::Result<ProcessExit>),
    KillRequested(Option<KillRequest>),
}

impl Supervisor {
    async fn run(mut self) {
        let wake = tokio::select! {
            result = self.child.wait() => Wake::Exited(result),
            request = &mut self.kill_rx => Wake::KillRequested(request.ok()),
        };

        match wake {
            Wake::Exited(result) => {
                let exit = result.unwrap_or_else(|e| {
                    warn!("Failed waiting on {} process {}: {}", self.kind, self.process_id, e);
                    ProcessExit::unknown()
                });
                let session = self.session.clone();
                let process_id = self.process_id;
                self.drain().await;
                if let Some(session) = session.upgrade() {
                    session.on_process_exit(process_id, exit);
                }
            }
            Wake::KillRequested(done) => {
                if done.is_none() {
                    debug!("{} session dropped, killing process {}", self.kind, self.process_id);
                }
                let exit = self.kill().await;
                if let Some(done) = done {
                    let _ = done.send(exit);
                }
            }
        }
    }

    async fn kill(mut self) -> ProcessExit {
        if let Err(e) = self.child.start_kill() {
            debug!("Kill of {} process {}: {}", self.kind, self.process_id, e);
        }
        let exit = match self.child.wait().await {
            Ok(exit) => exit.killed(),
            Err(e) => {
                warn!("Failed waiting on killed {} process {}: {}", self.kind, self.process_id, e);
                ProcessExit::unknown().killed()
            }
        };

        let _ = self.shutdown_tx.send(());
        join_all(self.pumps).await;
        let _ = self.writer.await;
        exit
    }

    /// Let the pumps deliver what the process wrote before it exited
    async fn drain(self) {
        if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, join_all(self.pumps))
            .await
            .is_err()
        {
            debug!("{} process {} output still open after exit", self.kind, self.process_id);
        }
        let _ = self.shutdown_tx.send(());
        let _ = self.writer.await;
    }
}

/// Forward one output stream into the sink until EOF or shutdown
async fn pump_output(
    mut reader: ProcessReader,
    stream: OutputStream,
    sink: Arc<OutputSink>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            result = reader.read(&mut buffer) => match result {
                Ok(0) => {
                    sink.finish(stream);
                    break;
                }
                Ok(n) => sink.on_chunk(stream, &buffer[..n]),
                Err(e) => {
                    warn!("Failed to read process {:?}: {}", stream, e);
                    break;
                }
            },
        }
    }
}

/// Write queued input to the process's stdin until shutdown
async fn forward_input(
    mut stdin: ProcessWriter,
    mut input_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            data = input_rx.recv() => {
                let Some(data) = data else { break };
                let written = async {
                    stdin.write_all(&data).await?;
                    stdin.flush().await
                };
                if let Err(e) = written.await {
                    warn!("Failed to write to process stdin: {}", e);
                    break;
                }
            }
        }
    }
}
