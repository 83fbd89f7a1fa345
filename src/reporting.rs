//! Run summary and milestone reporting.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;

use crate::{Artifact, ShotOutcome, TraceStatus, exit_code};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    ArtifactCreated,
    /// Profiling left no usable trace; the pipeline was skipped.
    TraceMissing,
    RenderFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotStats {
    pub planned: usize,
    pub fired: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Responses per HTTP status code; transport errors are under `"error"`.
    pub by_status: BTreeMap<String, u64>,
}

impl ShotStats {
    pub fn planned(planned: usize) -> Self {
        Self {
            planned,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &ShotOutcome) {
        self.fired += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        let key = match outcome.status {
            Some(code) => code.to_string(),
            None => "error".to_string(),
        };
        *self.by_status.entry(key).or_default() += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub seed: u64,
    pub status: RunStatus,
    pub server_pid: u32,
    pub profiler_pid: u32,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub shots: ShotStats,
    pub trace: TraceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(default)]
    pub findings: Vec<String>,
}

impl RunSummary {
    pub fn artifact_created(&self) -> bool {
        self.status == RunStatus::ArtifactCreated && self.artifact.is_some()
    }

    pub fn exit_code(&self) -> u8 {
        if self.artifact_created() {
            exit_code::ARTIFACT_CREATED
        } else {
            exit_code::NO_ARTIFACT
        }
    }

    /// The one-line verdict printed at the end of a run.
    pub fn status_line(&self) -> String {
        match (&self.status, &self.artifact) {
            (RunStatus::ArtifactCreated, Some(artifact)) => format!(
                "artifact created: {} ({} bytes)",
                artifact.path.display(),
                artifact.bytes
            ),
            (RunStatus::TraceMissing, _) => match &self.trace {
                TraceStatus::Empty { path } => {
                    format!("artifact not created: trace {} is empty", path.display())
                }
                other => format!(
                    "artifact not created: trace {} is missing",
                    other.path().display()
                ),
            },
            _ => "artifact not created: rendering failed".to_string(),
        }
    }
}

/// Phase transitions of a run, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "milestone", rename_all = "snake_case")]
pub enum Milestone {
    ServerStarted { pid: u32 },
    ProfilerAttached { pid: u32, target_pid: u32 },
    ShootingComplete { fired: usize },
    ProfilerStopped { trace_ready: bool },
    ServerStopped { pid: u32 },
    ArtifactRendered { bytes: u64 },
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerStarted { pid } => write!(f, "Server started (pid {pid})"),
            Self::ProfilerAttached { pid, target_pid } => {
                write!(f, "Profiler {pid} attached to {target_pid}")
            }
            Self::ShootingComplete { .. } => write!(f, "Shooting complete"),
            Self::ProfilerStopped { .. } => write!(f, "Profiler stopped"),
            Self::ServerStopped { pid } => write!(f, "Server {pid} stopped"),
            Self::ArtifactRendered { bytes } => write!(f, "Flame graph rendered ({bytes} bytes)"),
        }
    }
}

pub trait RunObserver {
    fn milestone(&self, milestone: &Milestone);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn outcome(status: Option<u16>, error: Option<&str>) -> ShotOutcome {
        ShotOutcome {
            url: "http://localhost:8080/api/v1/maps".to_string(),
            status,
            error: error.map(str::to_string),
            elapsed_ms: 1,
        }
    }

    fn summary(status: RunStatus, trace: TraceStatus, artifact: Option<Artifact>) -> RunSummary {
        RunSummary {
            run_id: "r1".to_string(),
            seed: 7,
            status,
            server_pid: 10,
            profiler_pid: 11,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            finished_at: "2026-01-01T00:00:01Z".to_string(),
            duration_ms: 1000,
            shots: ShotStats::planned(3),
            trace,
            artifact,
            findings: Vec::new(),
        }
    }

    #[test]
    fn shot_stats_bucket_by_status() {
        let mut stats = ShotStats::planned(4);
        stats.record(&outcome(Some(200), None));
        stats.record(&outcome(Some(200), None));
        stats.record(&outcome(Some(404), None));
        stats.record(&outcome(None, Some("connection refused")));
        assert_eq!(stats.fired, 4);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.by_status.get("200"), Some(&2));
        assert_eq!(stats.by_status.get("404"), Some(&1));
        assert_eq!(stats.by_status.get("error"), Some(&1));
    }

    #[test]
    fn status_line_distinguishes_outcomes() {
        let created = summary(
            RunStatus::ArtifactCreated,
            TraceStatus::Ready {
                path: PathBuf::from("perf.data"),
                bytes: 10,
            },
            Some(Artifact {
                path: PathBuf::from("graph.svg"),
                bytes: 2048,
            }),
        );
        assert!(created.artifact_created());
        assert_eq!(created.exit_code(), exit_code::ARTIFACT_CREATED);
        assert_eq!(created.status_line(), "artifact created: graph.svg (2048 bytes)");

        let empty = summary(
            RunStatus::TraceMissing,
            TraceStatus::Empty {
                path: PathBuf::from("perf.data"),
            },
            None,
        );
        assert!(!empty.artifact_created());
        assert_eq!(empty.exit_code(), exit_code::NO_ARTIFACT);
        assert_eq!(empty.status_line(), "artifact not created: trace perf.data is empty");

        let failed = summary(
            RunStatus::RenderFailed,
            TraceStatus::Ready {
                path: PathBuf::from("perf.data"),
                bytes: 10,
            },
            None,
        );
        assert_eq!(failed.status_line(), "artifact not created: rendering failed");
        assert_eq!(failed.exit_code(), exit_code::NO_ARTIFACT);
    }

    #[test]
    fn summary_json_uses_snake_case_tags() {
        let s = summary(
            RunStatus::TraceMissing,
            TraceStatus::Missing {
                path: PathBuf::from("perf.data"),
            },
            None,
        );
        let value = serde_json::to_value(&s).expect("json");
        assert_eq!(value["status"], serde_json::json!("trace_missing"));
        assert_eq!(value["trace"]["state"], serde_json::json!("missing"));
        assert!(value.get("artifact").is_none());
    }

    #[test]
    fn shooting_complete_prints_the_milestone_text() {
        assert_eq!(
            Milestone::ShootingComplete { fired: 100 }.to_string(),
            "Shooting complete"
        );
    }
}
