//! Scripted processes for driving sessions in tests

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;

use super::spawner::{ChildProcess, ExitReason, ProcessExit, ProcessSpawner, SpawnedProcess};
use crate::toolchain::LaunchPlan;

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct MockState {
    spawn_count: usize,
    plans: Vec<LaunchPlan>,
    failure: Option<io::ErrorKind>,
    immediate_exit: Option<i32>,
    hold_kills: bool,
    processes: VecDeque<MockProcess>,
}

/// Spawner that hands out in-memory processes
#[derive(Default)]
pub struct MockSpawner {
    state: Mutex<MockState>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following spawn fail with `kind`
    pub fn fail_with(&self, kind: io::ErrorKind) {
        self.lock().failure = Some(kind);
    }

    /// Make every following process exit with `code` right after spawning
    pub fn exit_immediately(&self, code: i32) {
        self.lock().immediate_exit = Some(code);
    }

    /// Killed processes only report their exit once `MockProcess::exit` runs
    pub fn hold_kills(&self) {
        self.lock().hold_kills = true;
    }

    /// Undo `fail_with` and `exit_immediately`
    pub fn succeed(&self) {
        let mut state = self.lock();
        state.failure = None;
        state.immediate_exit = None;
    }

    pub fn spawn_count(&self) -> usize {
        self.lock().spawn_count
    }

    pub fn plans(&self) -> Vec<LaunchPlan> {
        self.lock().plans.clone()
    }

    /// Oldest spawned process not taken yet
    pub fn take_process(&self) -> Option<MockProcess> {
        self.lock().processes.pop_front()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessSpawner for MockSpawner {
    fn spawn(&self, plan: &LaunchPlan) -> io::Result<SpawnedProcess> {
        let mut state = self.lock();
        state.spawn_count += 1;
        state.plans.push(plan.clone());
        if let Some(kind) = state.failure {
            return Err(io::Error::new(kind, format!("cannot run {}", plan.executable)));
        }

        let (stdin_process, stdin_test) = duplex(PIPE_CAPACITY);
        let (stdout_test, stdout_process) = duplex(PIPE_CAPACITY);
        let (stderr_test, stderr_process) = duplex(PIPE_CAPACITY);

        let initial = state.immediate_exit.map(|code| ProcessExit {
            exit_code: Some(code),
            reason: ExitReason::Normal,
        });
        let (exit_tx, exit_rx) = watch::channel(initial);
        let exit_tx = Arc::new(exit_tx);
        let killed = Arc::new(AtomicBool::new(false));

        state.processes.push_back(MockProcess {
            stdin: stdin_test,
            stdout: Some(stdout_test),
            stderr: Some(stderr_test),
            exit_tx: exit_tx.clone(),
            killed: killed.clone(),
        });

        Ok(SpawnedProcess {
            stdin: Box::new(stdin_process),
            stdout: Box::new(stdout_process),
            stderr: Box::new(stderr_process),
            child: Box::new(FakeChild {
                exit_tx,
                exit_rx,
                killed,
                hold_kill: state.hold_kills,
            }),
        })
    }
}

/// Test-side ends of a spawned in-memory process
pub struct MockProcess {
    stdin: DuplexStream,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    exit_tx: Arc<watch::Sender<Option<ProcessExit>>>,
    killed: Arc<AtomicBool>,
}

impl MockProcess {
    pub async fn write_stdout(&mut self, data: &[u8]) {
        if let Some(stdout) = self.stdout.as_mut() {
            stdout.write_all(data).await.unwrap();
        }
    }

    pub async fn write_stderr(&mut self, data: &[u8]) {
        if let Some(stderr) = self.stderr.as_mut() {
            stderr.write_all(data).await.unwrap();
        }
    }

    /// Read exactly `len` bytes the session wrote to stdin
    pub async fn read_stdin(&mut self, len: usize) -> String {
        let mut buf = vec![0u8; len];
        self.stdin.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    /// Close the output pipes and report an exit
    pub fn exit(&mut self, exit_code: Option<i32>) {
        self.stdout = None;
        self.stderr = None;
        let reason = match exit_code {
            Some(_) => ExitReason::Normal,
            None => ExitReason::Signal,
        };
        self.exit_tx.send_replace(Some(ProcessExit { exit_code, reason }));
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

struct FakeChild {
    exit_tx: Arc<watch::Sender<Option<ProcessExit>>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    killed: Arc<AtomicBool>,
    hold_kill: bool,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(*self.exit_rx.borrow())
    }

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ProcessExit>> {
        Box::pin(async move {
            let exit = *self
                .exit_rx
                .wait_for(Option::is_some)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "exit channel closed"))?;
            Ok(exit.unwrap_or_else(ProcessExit::unknown))
        })
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        if self.hold_kill {
            return Ok(());
        }
        self.exit_tx.send_if_modified(|exit| {
            if exit.is_some() {
                return false;
            }
            *exit = Some(ProcessExit {
                exit_code: None,
                reason: ExitReason::Signal,
            });
            true
        });
        Ok(())
    }
}
