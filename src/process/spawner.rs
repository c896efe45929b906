//! Process boundary
//!
//! The only OS-facing contract the sessions depend on: spawn a command with
//! piped stdio, wait for it, kill it. Kept behind traits so the session state
//! machine can be driven by a scripted process in tests.

use futures_util::future::BoxFuture;
use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::toolchain::LaunchPlan;

/// Write half bound to a process's standard input
pub type ProcessWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half bound to a process's standard output or error
pub type ProcessReader = Box<dyn AsyncRead + Send + Unpin>;

/// Reason for process exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Process exited on its own with a status code
    Normal,
    /// Process was terminated by a signal
    Signal,
    /// Process was killed by request
    Killed,
    /// Exit status could not be determined
    Unknown,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub exit_code: Option<i32>,
    pub reason: ExitReason,
}

impl ProcessExit {
    pub fn unknown() -> Self {
        Self {
            exit_code: None,
            reason: ExitReason::Unknown,
        }
    }

    pub fn killed(self) -> Self {
        Self {
            reason: ExitReason::Killed,
            ..self
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self {
                exit_code: Some(code),
                reason: ExitReason::Normal,
            },
            None => Self {
                exit_code: None,
                reason: ExitReason::Signal,
            },
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reason, self.exit_code) {
            (ExitReason::Killed, _) => write!(f, "killed"),
            (_, Some(code)) => write!(f, "exit code {}", code),
            (ExitReason::Signal, None) => write!(f, "terminated by signal"),
            _ => write!(f, "unknown exit status"),
        }
    }
}

/// Control over a spawned child process
pub trait ChildProcess: Send {
    /// OS process id, if the process is still known to the OS
    fn id(&self) -> Option<u32>;

    /// Check for exit without waiting
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Wait for the process to exit
    fn wait(&mut self) -> BoxFuture<'_, io::Result<ProcessExit>>;

    /// Ask the OS to kill the process; does not wait
    fn start_kill(&mut self) -> io::Result<()>;
}

/// A freshly spawned process with its stdio streams
pub struct SpawnedProcess {
    pub stdin: ProcessWriter,
    pub stdout: ProcessReader,
    pub stderr: ProcessReader,
    pub child: Box<dyn ChildProcess>,
}

/// Launches processes described by a [`LaunchPlan`]
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, plan: &LaunchPlan) -> io::Result<SpawnedProcess>;
}

/// Spawner backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, plan: &LaunchPlan) -> io::Result<SpawnedProcess> {
        let mut command = Command::new(&plan.executable);
        command
            .args(&plan.args)
            .current_dir(&plan.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        debug!("Spawned {} with pid {:?}", plan.executable, child.id());

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        Ok(SpawnedProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            child: Box::new(TokioChild(child)),
        })
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{} was not captured", name))
}

struct TokioChild(Child);

impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.0.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.0.try_wait()?.map(ProcessExit::from))
    }

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ProcessExit>> {
        Box::pin(async move { self.0.wait().await.map(ProcessExit::from) })
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }
}
