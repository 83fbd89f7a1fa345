//! Attaches a sampling profiler (`perf record`) to the server and bounds the
//! sampling window to the load phase.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::platform::fsutil;
use crate::platform::process::{
    CommandSpec, ManagedProcess, StdinSource, StdoutSink, StopSignal, Supervisor,
};
use crate::{LoadflameResult, ProfilerConfig};

/// What the profiler left behind once it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TraceStatus {
    Ready { path: PathBuf, bytes: u64 },
    Missing { path: PathBuf },
    Empty { path: PathBuf },
}

impl TraceStatus {
    pub fn inspect(path: &Path) -> Self {
        let path = path.to_path_buf();
        match fsutil::non_empty_len(&path) {
            Some(bytes) => Self::Ready { path, bytes },
            None if path.exists() => Self::Empty { path },
            None => Self::Missing { path },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Ready { path, .. } | Self::Missing { path } | Self::Empty { path } => path,
        }
    }
}

pub struct ProfilingController {
    supervisor: Supervisor,
    config: ProfilerConfig,
}

impl ProfilingController {
    pub fn new(supervisor: Supervisor, config: ProfilerConfig) -> Self {
        Self { supervisor, config }
    }

    pub fn trace_path(&self) -> &Path {
        &self.config.trace_path
    }

    pub fn command(&self, pid: u32) -> CommandSpec {
        let mut spec = CommandSpec::new("profiler", self.config.program.clone())
            .arg("record")
            .arg("-o")
            .arg(self.config.trace_path.to_string_lossy())
            .arg("-F")
            .arg(self.config.frequency.to_string());
        if self.config.call_graph {
            spec = spec.arg("-g");
        }
        spec.arg("--pid")
            .arg(pid.to_string())
            .stop_signal(StopSignal::Interrupt)
    }

    /// Starts sampling `pid`. Any trace left by an earlier run is removed
    /// first so it can never be mistaken for this run's.
    pub fn start(&self, pid: u32) -> LoadflameResult<ProfilerSession> {
        fsutil::remove_stale(&self.config.trace_path)?;
        let process = self.supervisor.spawn(
            &self.command(pid),
            StdinSource::Null,
            StdoutSink::Null,
        )?;
        tracing::info!(
            "profiler pid {} attached to pid {pid}, writing {}",
            process.pid(),
            self.config.trace_path.display()
        );
        Ok(ProfilerSession {
            process,
            trace_path: self.config.trace_path.clone(),
            target_pid: pid,
        })
    }
}

pub struct ProfilerSession {
    process: ManagedProcess,
    trace_path: PathBuf,
    target_pid: u32,
}

impl ProfilerSession {
    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn target_pid(&self) -> u32 {
        self.target_pid
    }

    pub fn is_running(&mut self) -> bool {
        self.process.is_running()
    }

    /// Interrupts the profiler and blocks until it has exited, so the trace
    /// is flushed and closed before anyone reads it.
    pub fn stop_and_wait(mut self) -> TraceStatus {
        match self.process.stop(true) {
            Some(status) if status.success() => {
                tracing::debug!("profiler pid {} exited cleanly", self.process.pid());
            }
            Some(status) => {
                tracing::warn!("profiler pid {} exited with {status}", self.process.pid());
            }
            None => tracing::warn!("profiler pid {} exit status unknown", self.process.pid()),
        }
        let trace = TraceStatus::inspect(&self.trace_path);
        match &trace {
            TraceStatus::Ready { bytes, .. } => {
                tracing::info!("trace {} holds {bytes} bytes", self.trace_path.display());
            }
            TraceStatus::Missing { path } => {
                tracing::warn!("trace {} was not written", path.display());
            }
            TraceStatus::Empty { path } => tracing::warn!("trace {} is empty", path.display()),
        }
        trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_profiler, temp_dir, write_script};
    use std::time::{Duration, Instant};

    fn controller(program: &Path, trace_path: PathBuf) -> ProfilingController {
        ProfilingController::new(
            Supervisor::new(Duration::from_secs(5)),
            ProfilerConfig {
                program: program.to_string_lossy().to_string(),
                trace_path,
                ..ProfilerConfig::default()
            },
        )
    }

    #[test]
    fn command_carries_trace_frequency_and_pid() {
        let ctl = ProfilingController::new(
            Supervisor::new(Duration::from_secs(1)),
            ProfilerConfig::default(),
        );
        let spec = ctl.command(4242);
        assert_eq!(spec.to_string(), "perf record -o perf.data -F 99 -g --pid 4242");
        assert_eq!(spec.stop_signal, StopSignal::Interrupt);

        let no_graph = ProfilingController::new(
            Supervisor::new(Duration::from_secs(1)),
            ProfilerConfig {
                call_graph: false,
                frequency: 499,
                ..ProfilerConfig::default()
            },
        );
        assert_eq!(
            no_graph.command(1).to_string(),
            "perf record -o perf.data -F 499 --pid 1"
        );
    }

    #[test]
    fn interrupt_flushes_trace_before_returning() {
        let dir = temp_dir("flush");
        let program = fake_profiler(&dir, r#"printf 'samples' > "$out""#);
        let trace = dir.join("perf.data");
        let session = controller(&program, trace.clone())
            .start(std::process::id())
            .expect("start");
        std::thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let status = session.stop_and_wait();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(status, TraceStatus::Ready { path: trace, bytes: 7 });
    }

    #[test]
    fn interrupt_handler_may_contain_quotes() {
        let dir = temp_dir("quoted");
        let program = fake_profiler(&dir, r#"printf 'main;serve 1\n' > "$out""#);
        let trace = dir.join("perf.data");
        let session = controller(&program, trace.clone())
            .start(std::process::id())
            .expect("start");
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(
            session.stop_and_wait(),
            TraceStatus::Ready {
                path: trace.clone(),
                bytes: 13
            }
        );
        assert_eq!(std::fs::read_to_string(&trace).expect("trace"), "main;serve 1\n");
    }

    #[test]
    fn empty_trace_is_reported_not_raised() {
        let dir = temp_dir("empty");
        let program = fake_profiler(&dir, r#": > "$out""#);
        let trace = dir.join("perf.data");
        let session = controller(&program, trace.clone())
            .start(std::process::id())
            .expect("start");
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(session.stop_and_wait(), TraceStatus::Empty { path: trace });
    }

    #[test]
    fn profiler_that_dies_early_leaves_trace_missing() {
        let dir = temp_dir("missing");
        let program = dir.join("broken-perf");
        write_script(&program, "exit 1");
        let trace = dir.join("perf.data");
        let mut session = controller(&program, trace.clone())
            .start(std::process::id())
            .expect("start");
        std::thread::sleep(Duration::from_millis(200));
        assert!(!session.is_running());
        let status = session.stop_and_wait();
        assert_eq!(status, TraceStatus::Missing { path: trace });
        assert!(!status.is_ready());
    }

    #[test]
    fn start_removes_stale_trace() {
        let dir = temp_dir("stale");
        let program = dir.join("idle-perf");
        write_script(&program, "exit 0");
        let trace = dir.join("perf.data");
        std::fs::write(&trace, b"old run").expect("stale trace");
        let session = controller(&program, trace.clone())
            .start(std::process::id())
            .expect("start");
        assert_eq!(session.stop_and_wait(), TraceStatus::Missing { path: trace });
    }

    #[test]
    fn missing_profiler_binary_fails_to_start() {
        let dir = temp_dir("nobin");
        let result = controller(&dir.join("no-such-perf"), dir.join("perf.data")).start(1);
        assert!(result.is_err());
    }
}
