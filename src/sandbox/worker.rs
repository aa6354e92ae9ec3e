//! Out-of-process Python worker
//!
//! One `python3 -I -u` process per run holds the namespace. The host drives it
//! with the messages in [`super::protocol`], answers its host-function calls,
//! and enforces the execution deadline by killing and replacing the process.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::protocol::{HostMessage, WorkerMessage};
use super::{
    CallError, Execution, HostCalls, Sandbox, SandboxConfig, SandboxError, SandboxFactory, Seed,
};
use crate::metrics::{SANDBOX_EXECUTIONS, SANDBOX_EXECUTION_DURATION, SANDBOX_WORKER_RESTARTS};
use crate::security::WorkerHardening;
use crate::tools::CallArgs;

/// Source of the worker loop, passed with `-c`.
const RUNNER_SOURCE: &str = include_str!("runner.py");

/// Environment variables the worker inherits; everything else is cleared.
const PRESERVED_ENV: [&str; 3] = ["PATH", "HOME", "LANG"];

const RESTART_NOTE: &str =
    "The sandbox was restarted; variables defined in earlier iterations are gone.";

/// Grace period for a worker that closed its stdout to finish exiting.
const REAP_GRACE: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Worker process
// ─────────────────────────────────────────────────────────────────────────────

enum Received {
    Message(WorkerMessage),
    Closed,
    Garbled(String),
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Worker {
    async fn spawn(
        config: &SandboxConfig,
        hardening: &Arc<WorkerHardening>,
        seed: &Seed,
    ) -> Result<Self, SandboxError> {
        let mut cmd = Command::new(&config.python);
        cmd.arg("-I")
            .arg("-u")
            .arg("-c")
            .arg(RUNNER_SOURCE)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in PRESERVED_ENV {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }

        let hardening = Arc::clone(hardening);
        // SAFETY: pre_exec runs after fork() but before exec() in the child.
        // It only issues setrlimit, capset/prctl and the seccomp install.
        unsafe {
            cmd.pre_exec(move || hardening.apply());
        }

        let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(pid = ?pid, line = %line, "worker stderr");
                }
            });
        }

        let mut worker = Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let init = HostMessage::Init {
            context: &seed.context,
            functions: &seed.functions,
        }
        .to_line()
        .map_err(|e| SandboxError::Protocol(e.to_string()))?;
        worker.send_line(&init).await.map_err(SandboxError::Spawn)?;

        match timeout(config.exec_timeout, worker.recv()).await {
            Ok(Received::Message(WorkerMessage::Ready)) => {
                debug!(pid = ?pid, functions = seed.functions.len(), "Sandbox worker ready");
                Ok(worker)
            }
            Ok(Received::Message(other)) => {
                worker.kill().await;
                Err(SandboxError::Protocol(format!(
                    "expected ready, got {:?}",
                    other
                )))
            }
            Ok(Received::Garbled(detail)) => {
                worker.kill().await;
                Err(SandboxError::Protocol(detail))
            }
            Ok(Received::Closed) => {
                let status = worker.reap().await;
                Err(SandboxError::Spawn(io::Error::new(
                    io::ErrorKind::Other,
                    format!("worker exited during startup ({})", status),
                )))
            }
            Err(_) => {
                worker.kill().await;
                Err(SandboxError::Spawn(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("worker not ready after {:?}", config.exec_timeout),
                )))
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    async fn recv(&mut self) -> Received {
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    return match WorkerMessage::parse(&line) {
                        Ok(message) => Received::Message(message),
                        Err(e) => Received::Garbled(format!("malformed worker message: {}", e)),
                    }
                }
                Ok(None) => return Received::Closed,
                Err(e) => return Received::Garbled(format!("unreadable worker output: {}", e)),
            }
        }
    }

    /// Wait briefly for a worker that hung up, then describe how it ended.
    async fn reap(&mut self) -> String {
        match timeout(REAP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => describe_exit(status),
            Ok(Err(e)) => format!("wait failed: {}", e),
            Err(_) => {
                self.kill().await;
                "worker closed its output and was killed".to_string()
            }
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Sandbox worker already gone");
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("worker exited with status {}", code),
        (None, Some(libc::SIGXCPU)) => "worker exceeded its CPU-time limit".to_string(),
        (None, Some(libc::SIGSYS)) => "worker killed by seccomp".to_string(),
        (None, Some(signal)) => format!("worker killed by signal {}", signal),
        (None, None) => "worker exited".to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PythonSandbox
// ─────────────────────────────────────────────────────────────────────────────

enum Drive {
    Done(Execution),
    TimedOut,
    Lost(String),
}

/// A [`Sandbox`] backed by one worker process.
///
/// A timed-out or dead worker is replaced with a freshly seeded one; only a
/// failure to start the replacement is an error.
pub struct PythonSandbox {
    config: SandboxConfig,
    hardening: Arc<WorkerHardening>,
    seed: Seed,
    worker: Worker,
}

impl PythonSandbox {
    pub async fn start(
        config: SandboxConfig,
        hardening: Arc<WorkerHardening>,
        seed: Seed,
    ) -> Result<Self, SandboxError> {
        let worker = Worker::spawn(&config, &hardening, &seed).await?;
        Ok(Self {
            config,
            hardening,
            seed,
            worker,
        })
    }

    /// OS process id of the current worker.
    pub fn pid(&self) -> Option<u32> {
        self.worker.child.id()
    }

    async fn restart(&mut self, reason: &'static str) -> Result<(), SandboxError> {
        self.worker.kill().await;
        self.worker = Worker::spawn(&self.config, &self.hardening, &self.seed).await?;
        SANDBOX_WORKER_RESTARTS.with_label_values(&[reason]).inc();
        warn!(reason, pid = ?self.pid(), "Sandbox worker restarted");
        Ok(())
    }

    async fn drive(&mut self, code: &str, host: &dyn HostCalls) -> Result<Drive, SandboxError> {
        let exec = HostMessage::Exec { code }
            .to_line()
            .map_err(|e| SandboxError::Protocol(e.to_string()))?;
        if let Err(e) = self.worker.send_line(&exec).await {
            return Ok(Drive::Lost(format!("worker stopped accepting input ({})", e)));
        }

        loop {
            let message = match timeout(self.config.exec_timeout, self.worker.recv()).await {
                Err(_) => return Ok(Drive::TimedOut),
                Ok(Received::Message(message)) => message,
                Ok(Received::Closed) => return Ok(Drive::Lost(self.worker.reap().await)),
                Ok(Received::Garbled(detail)) => return Ok(Drive::Lost(detail)),
            };

            match message {
                WorkerMessage::Done {
                    stdout,
                    stderr,
                    error,
                    submitted,
                } => {
                    return Ok(Drive::Done(Execution {
                        stdout,
                        stderr,
                        raised: error,
                        submitted,
                    }))
                }
                WorkerMessage::Call { name, args, kwargs } => {
                    let reply = match host.call(&name, CallArgs::new(args, kwargs)).await {
                        Ok(value) => HostMessage::success(value),
                        Err(CallError::Failed(msg)) => HostMessage::failure(msg),
                        Err(CallError::Upstream(e)) => {
                            self.worker.kill().await;
                            return Err(SandboxError::Upstream(e));
                        }
                    };
                    let line = reply
                        .to_line()
                        .map_err(|e| SandboxError::Protocol(e.to_string()))?;
                    if let Err(e) = self.worker.send_line(&line).await {
                        return Ok(Drive::Lost(format!("worker stopped accepting input ({})", e)));
                    }
                }
                WorkerMessage::Ready => {
                    warn!("Unexpected ready message from sandbox worker");
                }
            }
        }
    }
}

#[async_trait]
impl Sandbox for PythonSandbox {
    async fn execute(
        &mut self,
        code: &str,
        host: &dyn HostCalls,
    ) -> Result<Execution, SandboxError> {
        let started = Instant::now();
        let outcome = self.drive(code, host).await;
        SANDBOX_EXECUTION_DURATION.observe(started.elapsed().as_secs_f64());

        match outcome? {
            Drive::Done(execution) => {
                let status = if execution.raised.is_some() { "raised" } else { "ok" };
                SANDBOX_EXECUTIONS.with_label_values(&[status]).inc();
                Ok(execution)
            }
            Drive::TimedOut => {
                SANDBOX_EXECUTIONS.with_label_values(&["timeout"]).inc();
                warn!(timeout = ?self.config.exec_timeout, "Sandbox execution timed out");
                self.restart("timeout").await?;
                Ok(Execution::failed(
                    format!(
                        "TimeoutError: execution exceeded {} ms",
                        self.config.exec_timeout.as_millis()
                    ),
                    RESTART_NOTE,
                ))
            }
            Drive::Lost(detail) => {
                SANDBOX_EXECUTIONS.with_label_values(&["worker_exited"]).inc();
                warn!(detail = %detail, "Sandbox worker lost during execution");
                self.restart("worker_exited").await?;
                Ok(Execution::failed(format!("WorkerExited: {}", detail), RESTART_NOTE))
            }
        }
    }
}

/// Starts one hardened worker per run.
pub struct PythonSandboxFactory {
    config: SandboxConfig,
    hardening: Arc<WorkerHardening>,
}

impl PythonSandboxFactory {
    /// Compile the hardening plan once; every worker reuses it.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let hardening = WorkerHardening::prepare(
            config.limits,
            config.drop_capabilities,
            config.seccomp,
        )
        .map_err(SandboxError::Spawn)?;
        info!(
            python = %config.python,
            exec_timeout_ms = config.exec_timeout.as_millis() as u64,
            memory_bytes = ?config.limits.memory_bytes,
            cpu_seconds = ?config.limits.cpu_seconds,
            seccomp = hardening.has_seccomp(),
            "Sandbox factory ready"
        );
        Ok(Self {
            config,
            hardening: Arc::new(hardening),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

#[async_trait]
impl SandboxFactory for PythonSandboxFactory {
    async fn create(&self, seed: &Seed) -> Result<Box<dyn Sandbox>, SandboxError> {
        let sandbox =
            PythonSandbox::start(self.config.clone(), Arc::clone(&self.hardening), seed.clone())
                .await?;
        Ok(Box::new(sandbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_exit_code() {
        let status = ExitStatus::from_raw(3 << 8);
        assert_eq!(describe_exit(status), "worker exited with status 3");
    }

    #[test]
    fn test_describe_exit_signal() {
        assert_eq!(
            describe_exit(ExitStatus::from_raw(libc::SIGKILL)),
            "worker killed by signal 9"
        );
        assert_eq!(
            describe_exit(ExitStatus::from_raw(libc::SIGXCPU)),
            "worker exceeded its CPU-time limit"
        );
    }

    #[test]
    fn test_runner_source_embedded() {
        assert!(RUNNER_SOURCE.contains("def SUBMIT"));
    }
}
