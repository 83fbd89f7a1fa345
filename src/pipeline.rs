//! Trace -> flame graph rendering through external tools.
//!
//! Stages run concurrently, each stage's stdout wired straight into the next
//! stage's stdin; the last stage writes the diagram file. The orchestrator
//! only plumbs descriptors and checks exit statuses.

use serde::{Deserialize, Serialize};

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::platform::fsutil;
use crate::platform::process::{
    CommandSpec, ManagedProcess, StderrMode, StdinSource, StdoutSink, Supervisor,
};
use crate::{LoadflameError, LoadflameResult, PipelineConfig};

pub const TRACE_PLACEHOLDER: &str = "{trace}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct ArtifactPipeline {
    supervisor: Supervisor,
    stages: Vec<CommandSpec>,
    output: PathBuf,
}

impl ArtifactPipeline {
    pub fn new(
        supervisor: Supervisor,
        stages: Vec<CommandSpec>,
        output: PathBuf,
    ) -> LoadflameResult<Self> {
        if stages.is_empty() {
            return Err(LoadflameError::InvalidArgument(
                "pipeline needs at least one stage".to_string(),
            ));
        }
        Ok(Self {
            supervisor,
            stages,
            output,
        })
    }

    /// Extraction, folding and rendering stages from config, with `{trace}`
    /// expanded to `trace`.
    pub fn from_config(
        supervisor: Supervisor,
        config: &PipelineConfig,
        trace: &Path,
    ) -> LoadflameResult<Self> {
        let trace = trace.to_string_lossy();
        let mut stages = Vec::with_capacity(3);
        for (label, argv) in [
            ("extract", &config.extract),
            ("fold", &config.fold),
            ("render", &config.render),
        ] {
            let argv: Vec<String> = argv
                .iter()
                .map(|a| a.replace(TRACE_PLACEHOLDER, &trace))
                .collect();
            stages.push(CommandSpec::from_argv(label, &argv)?.stderr(StderrMode::Inherit));
        }
        Self::new(supervisor, stages, config.output.clone())
    }

    pub fn stages(&self) -> &[CommandSpec] {
        &self.stages
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Runs every stage to completion. On any failure the partially written
    /// output is removed, so a returned error never leaves a diagram behind.
    pub fn render(&self) -> LoadflameResult<Artifact> {
        if let Err(err) = self.run_stages() {
            self.discard_output();
            return Err(err);
        }
        match fsutil::non_empty_len(&self.output) {
            Some(bytes) => Ok(Artifact {
                path: self.output.clone(),
                bytes,
            }),
            None => {
                self.discard_output();
                Err(LoadflameError::EmptyArtifact {
                    path: self.output.clone(),
                })
            }
        }
    }

    fn run_stages(&self) -> LoadflameResult<()> {
        let out = File::create(&self.output)?;
        let last = self.stages.len() - 1;
        let mut running: Vec<ManagedProcess> = Vec::with_capacity(self.stages.len());
        let mut upstream = None;

        for (i, spec) in self.stages.iter().enumerate() {
            let stdin = match upstream.take() {
                Some(pipe) => StdinSource::Pipe(pipe),
                None => StdinSource::Null,
            };
            let stdout = if i == last {
                StdoutSink::File(out.try_clone()?)
            } else {
                StdoutSink::Pipe
            };
            // Stages already running are stopped by drop if this fails.
            let mut stage = self.supervisor.spawn(spec, stdin, stdout)?;
            upstream = stage.take_stdout();
            running.push(stage);
        }
        drop(out);

        let mut failure = None;
        for stage in &mut running {
            let status = stage.wait()?;
            tracing::debug!("stage {} exited with {status}", stage.label());
            if !status.success() && failure.is_none() {
                failure = Some(LoadflameError::StageFailed {
                    stage: stage.label().to_string(),
                    status,
                });
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn discard_output(&self) {
        if let Err(err) = fsutil::remove_stale(&self.output) {
            tracing::warn!("cannot remove {}: {err}", self.output.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_dir;
    use std::time::Duration;

    fn supervisor() -> Supervisor {
        Supervisor::new(Duration::from_secs(5))
    }

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn config(extract: &[&str], fold: &[&str], render: &[&str], output: PathBuf) -> PipelineConfig {
        PipelineConfig {
            extract: argv(extract),
            fold: argv(fold),
            render: argv(render),
            output,
        }
    }

    fn write_trace(dir: &Path) -> PathBuf {
        let trace = dir.join("perf.data");
        std::fs::write(&trace, "main;serve;parse\nmain;serve;render\nmain;serve;parse\n")
            .expect("trace");
        trace
    }

    #[test]
    fn from_config_expands_trace_placeholder() {
        let pipeline = ArtifactPipeline::from_config(
            supervisor(),
            &PipelineConfig::default(),
            Path::new("/tmp/run/perf.data"),
        )
        .expect("pipeline");
        let rendered: Vec<String> = pipeline.stages().iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "perf script -i /tmp/run/perf.data".to_string(),
                "./FlameGraph/stackcollapse-perf.pl".to_string(),
                "./FlameGraph/flamegraph.pl".to_string(),
            ]
        );
        assert_eq!(pipeline.output(), Path::new("graph.svg"));
    }

    #[test]
    fn chained_stages_produce_the_diagram() {
        let dir = temp_dir("ok");
        let trace = write_trace(&dir);
        let output = dir.join("graph.svg");
        let cfg = config(
            &["cat", "{trace}"],
            &["sort"],
            &["sh", "-c", "printf '<svg>'; uniq -c; printf '</svg>'"],
            output.clone(),
        );
        let artifact = ArtifactPipeline::from_config(supervisor(), &cfg, &trace)
            .expect("pipeline")
            .render()
            .expect("render");

        let body = std::fs::read_to_string(&output).expect("read svg");
        assert_eq!(artifact.path, output);
        assert_eq!(artifact.bytes, body.len() as u64);
        assert!(body.starts_with("<svg>"));
        assert!(body.ends_with("</svg>"));
        assert!(body.contains("2 main;serve;parse"));
    }

    #[test]
    fn failing_stage_is_reported_and_no_diagram_is_left() {
        let dir = temp_dir("fail");
        let trace = write_trace(&dir);
        let output = dir.join("graph.svg");
        let cfg = config(
            &["cat", "{trace}"],
            &["sort"],
            &["sh", "-c", "cat; exit 3"],
            output.clone(),
        );
        let err = ArtifactPipeline::from_config(supervisor(), &cfg, &trace)
            .expect("pipeline")
            .render()
            .expect_err("render must fail");
        match err {
            LoadflameError::StageFailed { stage, status } => {
                assert_eq!(stage, "render");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn empty_output_is_not_an_artifact() {
        let dir = temp_dir("empty");
        let trace = write_trace(&dir);
        let output = dir.join("graph.svg");
        let cfg = config(
            &["cat", "{trace}"],
            &["sort"],
            &["sh", "-c", "cat > /dev/null"],
            output.clone(),
        );
        let err = ArtifactPipeline::from_config(supervisor(), &cfg, &trace)
            .expect("pipeline")
            .render()
            .expect_err("empty");
        assert!(matches!(err, LoadflameError::EmptyArtifact { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn unspawnable_stage_aborts_and_cleans_up() {
        let dir = temp_dir("nospawn");
        let trace = write_trace(&dir);
        let output = dir.join("graph.svg");
        let cfg = config(
            &["cat", "{trace}"],
            &["/nonexistent/stackcollapse-perf.pl"],
            &["cat"],
            output.clone(),
        );
        let err = ArtifactPipeline::from_config(supervisor(), &cfg, &trace)
            .expect("pipeline")
            .render()
            .expect_err("spawn failure");
        assert!(matches!(err, LoadflameError::Spawn { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn empty_stage_list_is_rejected() {
        assert!(ArtifactPipeline::new(supervisor(), Vec::new(), PathBuf::from("x.svg")).is_err());
    }
}
