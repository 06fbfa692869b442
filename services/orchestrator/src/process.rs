//! Process supervision.
//!
//! [`GuardedProcessPool`] spawns helper processes from argument lists, keeps a
//! guard task per child that restarts it with exponential backoff when it
//! dies unexpectedly, and kills everything together on `terminate_all`.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Pool-local identifier.
    pub id: u64,
    /// OS pid of the first spawn.
    pub pid: Option<u32>,
    pub program: String,
}

/// Spawns and tracks backend processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Spawn `argv` (program first). Errors if the process cannot be started.
    async fn submit(&self, argv: Vec<String>) -> Result<ProcessHandle>;

    /// Kill every process ever submitted and release the pool. Idempotent.
    async fn terminate_all(&self);
}

/// Exponential backoff for restarts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before restart `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt.min(16) as i32);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter = if self.jitter > 0.0 {
            rand::rng().random_range(0.0..=delay * self.jitter)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter) as u64)
    }
}

/// Restart behaviour of a pool.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Restarts allowed per process before the guard gives up.
    pub max_restarts: u32,
    pub backoff: BackoffPolicy,
    /// How long `terminate_all` waits for each guard before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            backoff: BackoffPolicy::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

struct Guard {
    id: u64,
    program: String,
    task: JoinHandle<()>,
}

/// Process pool with crash restarts.
pub struct GuardedProcessPool {
    policy: RestartPolicy,
    guards: Mutex<Vec<Guard>>,
    shutdown: watch::Sender<bool>,
    next_id: AtomicU64,
}

impl GuardedProcessPool {
    pub fn new(policy: RestartPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            policy,
            guards: Mutex::new(Vec::new()),
            shutdown,
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of guard tasks still running.
    pub fn running_count(&self) -> usize {
        self.guards
            .lock()
            .map(|guards| guards.iter().filter(|g| !g.task.is_finished()).count())
            .unwrap_or(0)
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Default for GuardedProcessPool {
    fn default() -> Self {
        Self::new(RestartPolicy::default())
    }
}

fn spawn_child(argv: &[String]) -> Result<Child> {
    let (program, args) = argv.split_first().ok_or_else(|| anyhow!("empty argument list"))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(program.clone(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(program.clone(), "stderr", stderr));
    }

    Ok(child)
}

async fn forward_output<R>(program: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(program = %program, stream, "{line}");
    }
}

async fn guard(
    id: u64,
    argv: Vec<String>,
    mut child: Child,
    policy: RestartPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let program = argv[0].clone();
    let mut restarts = 0u32;

    loop {
        // Shutdown may have been requested before this receiver subscribed.
        if *shutdown.borrow() {
            if let Err(e) = child.kill().await {
                debug!(id, program = %program, error = %e, "Kill failed, process already gone");
            }
            break;
        }

        tokio::select! {
            status = child.wait() => {
                if *shutdown.borrow() {
                    break;
                }

                match status {
                    Ok(status) => warn!(id, program = %program, %status, "Backend process exited"),
                    Err(e) => warn!(
                        id,
                        program = %program,
                        error = %e,
                        "Failed to wait for backend process"
                    ),
                }

                if restarts >= policy.max_restarts {
                    error!(
                        id,
                        program = %program,
                        restarts,
                        "Backend process keeps crashing, giving up"
                    );
                    break;
                }

                let delay = policy.backoff.delay(restarts);
                restarts += 1;
                debug!(
                    id,
                    program = %program,
                    delay_ms = delay.as_millis() as u64,
                    "Restarting backend process"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }

                match spawn_child(&argv) {
                    Ok(next) => {
                        info!(
                            id,
                            program = %program,
                            pid = ?next.id(),
                            restarts,
                            "Backend process restarted"
                        );
                        child = next;
                    }
                    Err(e) => {
                        error!(
                            id,
                            program = %program,
                            error = %e,
                            "Failed to restart backend process"
                        );
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if let Err(e) = child.kill().await {
                    debug!(id, program = %program, error = %e, "Kill failed, process already gone");
                }
                break;
            }
        }
    }
}

#[async_trait]
impl ProcessSupervisor for GuardedProcessPool {
    async fn submit(&self, argv: Vec<String>) -> Result<ProcessHandle> {
        if self.is_closed() {
            bail!("process pool is closed");
        }

        let child = spawn_child(&argv)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let program = argv[0].clone();
        let pid = child.id();

        info!(id, program = %program, pid = ?pid, args = ?&argv[1..], "Started backend process");

        let task = tokio::spawn(guard(
            id,
            argv,
            child,
            self.policy.clone(),
            self.shutdown.subscribe(),
        ));

        self.guards
            .lock()
            .map_err(|_| anyhow!("process pool lock poisoned"))?
            .push(Guard {
                id,
                program: program.clone(),
                task,
            });

        Ok(ProcessHandle { id, pid, program })
    }

    async fn terminate_all(&self) {
        self.shutdown.send_replace(true);

        let guards = match self.guards.lock() {
            Ok(mut guards) => std::mem::take(&mut *guards),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for guard in guards {
            let abort = guard.task.abort_handle();
            match tokio::time::timeout(self.policy.shutdown_grace, guard.task).await {
                Ok(_) => debug!(id = guard.id, program = %guard.program, "Backend process stopped"),
                Err(_) => {
                    warn!(
                        id = guard.id,
                        program = %guard.program,
                        "Backend guard did not stop in time, aborting"
                    );
                    abort.abort();
                }
            }
        }
    }
}
