//! Child process supervision: spawn with explicit stream wiring, signal,
//! wait, and an idempotent stop that also runs on drop.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use std::fmt;
use std::fs::File;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::{LoadflameError, LoadflameResult};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signal used to ask a process to wind down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    /// The profiler flushes its trace on SIGINT; SIGTERM may truncate it.
    Interrupt,
}

impl From<StopSignal> for Signal {
    fn from(value: StopSignal) -> Self {
        match value {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Interrupt => Signal::SIGINT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StderrMode {
    #[default]
    Null,
    Inherit,
}

pub enum StdinSource {
    Null,
    Inherit,
    /// Output of an upstream stage.
    Pipe(ChildStdout),
    File(File),
}

pub enum StdoutSink {
    Null,
    Inherit,
    /// Captured so a downstream stage (or the caller) can read it.
    Pipe,
    File(File),
}

impl From<StdinSource> for Stdio {
    fn from(value: StdinSource) -> Self {
        match value {
            StdinSource::Null => Stdio::null(),
            StdinSource::Inherit => Stdio::inherit(),
            StdinSource::Pipe(out) => Stdio::from(out),
            StdinSource::File(file) => Stdio::from(file),
        }
    }
}

impl From<StdoutSink> for Stdio {
    fn from(value: StdoutSink) -> Self {
        match value {
            StdoutSink::Null => Stdio::null(),
            StdoutSink::Inherit => Stdio::inherit(),
            StdoutSink::Pipe => Stdio::piped(),
            StdoutSink::File(file) => Stdio::from(file),
        }
    }
}

/// An explicit argument vector. Nothing is ever passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub stop_signal: StopSignal,
    pub stderr: StderrMode,
}

impl CommandSpec {
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            stop_signal: StopSignal::Terminate,
            stderr: StderrMode::Null,
        }
    }

    pub fn from_argv(label: impl Into<String>, argv: &[String]) -> LoadflameResult<Self> {
        let label = label.into();
        let Some((program, args)) = argv.split_first() else {
            return Err(LoadflameError::InvalidArgument(format!(
                "command for {label} is empty"
            )));
        };
        Ok(Self::new(label, program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stop_signal(mut self, stop_signal: StopSignal) -> Self {
        self.stop_signal = stop_signal;
        self
    }

    pub fn stderr(mut self, stderr: StderrMode) -> Self {
        self.stderr = stderr;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Starts children and hands out exclusively owned [`ManagedProcess`] handles.
#[derive(Debug, Clone)]
pub struct Supervisor {
    grace: Duration,
}

impl Supervisor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn spawn(
        &self,
        spec: &CommandSpec,
        stdin: StdinSource,
        stdout: StdoutSink,
    ) -> LoadflameResult<ManagedProcess> {
        tracing::debug!("spawning {}: {spec}", spec.label);
        let stderr = match spec.stderr {
            StderrMode::Null => Stdio::null(),
            StderrMode::Inherit => Stdio::inherit(),
        };
        // The Command (and any pipe end moved into it) is dropped on return,
        // so upstream stages see EOF/EPIPE once this child is gone.
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| LoadflameError::spawn(spec.program.clone(), e))?;
        let pid = child.id();
        tracing::debug!("{} started with pid {pid}", spec.label);
        Ok(ManagedProcess {
            label: spec.label.clone(),
            pid,
            child,
            stop_signal: spec.stop_signal,
            grace: self.grace,
            exit: None,
        })
    }
}

/// A supervised child. Dropping it stops the process and reaps it.
#[derive(Debug)]
pub struct ManagedProcess {
    label: String,
    pid: u32,
    child: Child,
    stop_signal: StopSignal,
    grace: Duration,
    exit: Option<ExitStatus>,
}

impl ManagedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking exit check. Caches the status once known.
    pub fn poll(&mut self) -> LoadflameResult<Option<ExitStatus>> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        let status = self.child.try_wait()?;
        self.exit = status;
        Ok(status)
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.poll(), Ok(None))
    }

    /// Sends `sig` if the process has not been reaped yet. A process that
    /// exited on its own in the meantime is not an error.
    pub fn signal(&mut self, sig: Signal) -> LoadflameResult<()> {
        if self.poll()?.is_some() {
            return Ok(());
        }
        match signal::kill(Pid::from_raw(self.pid as i32), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(LoadflameError::Signal {
                pid: self.pid,
                source,
            }),
        }
    }

    pub fn wait(&mut self) -> LoadflameResult<ExitStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.exit = Some(status);
        Ok(status)
    }

    /// Asks the process to stop with its graceful signal. With `wait`, blocks
    /// until it exits, escalating to SIGKILL after the grace period. Safe to
    /// call any number of times; never fails.
    pub fn stop(&mut self, wait: bool) -> Option<ExitStatus> {
        match self.poll() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("cannot query {} (pid {}): {err}", self.label, self.pid);
                return None;
            }
        }
        tracing::debug!(
            "stopping {} (pid {}) with {:?}",
            self.label,
            self.pid,
            Signal::from(self.stop_signal)
        );
        if let Err(err) = self.signal(self.stop_signal.into()) {
            tracing::warn!("{err}");
        }
        if wait { self.wait_with_grace() } else { None }
    }

    fn wait_with_grace(&mut self) -> Option<ExitStatus> {
        let deadline = Instant::now() + self.grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.exit = Some(status);
                    return Some(status);
                }
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    tracing::warn!("wait on {} (pid {}) failed: {err}", self.label, self.pid);
                    return None;
                }
            }
        }

        tracing::warn!(
            "{} (pid {}) ignored {:?} for {:?}; killing",
            self.label,
            self.pid,
            Signal::from(self.stop_signal),
            self.grace
        );
        if let Err(err) = self.child.kill() {
            tracing::warn!("kill {} (pid {}) failed: {err}", self.label, self.pid);
        }
        match self.child.wait() {
            Ok(status) => {
                self.exit = Some(status);
                Some(status)
            }
            Err(err) => {
                tracing::warn!("reap {} (pid {}) failed: {err}", self.label, self.pid);
                None
            }
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            self.stop(true);
        }
    }
}
