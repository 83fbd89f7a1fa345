//! `loadflame.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{Generator, LoadDuration, LoadflameError, LoadflameResult};

pub const DEFAULT_CONFIG_FILE: &str = "loadflame.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process blocking HTTP client.
    #[default]
    Http,
    /// One `curl` child per shot.
    Curl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Prefix for targets that are not already absolute URLs.
    pub base_url: String,

    /// Endpoints eligible for selection. Must not be empty.
    pub targets: Vec<String>,

    /// Pseudo-random generator behind target selection.
    pub generator: Generator,
    pub seed: u64,
    pub shot_count: usize,

    /// Upper bound of the raw random draw before reducing by the target count.
    pub random_limit: u64,

    pub cooldown: LoadDuration,
    pub request_timeout: LoadDuration,
    pub server_warmup: LoadDuration,
    pub attach_settle: LoadDuration,
    pub pre_stop_settle: LoadDuration,

    /// How long a stopped process may take before it is killed.
    pub stop_grace: LoadDuration,

    pub transport: TransportKind,
    pub profiler: ProfilerConfig,
    pub pipeline: PipelineConfig,

    pub report_path: Option<PathBuf>,
    pub timeline_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ProfilerConfig {
    pub program: String,
    /// Sampling frequency in Hz.
    pub frequency: u32,
    pub call_graph: bool,
    pub trace_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PipelineConfig {
    /// Argument vector of the extraction stage. `{trace}` expands to the trace path.
    pub extract: Vec<String>,
    pub fold: Vec<String>,
    pub render: Vec<String>,
    pub output: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            targets: vec!["/api/v1/maps/map1".to_string(), "/api/v1/maps".to_string()],
            generator: Generator::default(),
            seed: 123_456_789,
            shot_count: 100,
            random_limit: 1000,
            cooldown: LoadDuration::from_millis(100),
            request_timeout: LoadDuration::from_secs(5),
            server_warmup: LoadDuration::from_secs(1),
            attach_settle: LoadDuration::from_secs(1),
            pre_stop_settle: LoadDuration::from_millis(0),
            stop_grace: LoadDuration::from_secs(10),
            transport: TransportKind::default(),
            profiler: ProfilerConfig::default(),
            pipeline: PipelineConfig::default(),
            report_path: None,
            timeline_path: None,
        }
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            program: "perf".to_string(),
            frequency: 99,
            call_graph: true,
            trace_path: PathBuf::from("perf.data"),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract: vec![
                "perf".to_string(),
                "script".to_string(),
                "-i".to_string(),
                "{trace}".to_string(),
            ],
            fold: vec!["./FlameGraph/stackcollapse-perf.pl".to_string()],
            render: vec!["./FlameGraph/flamegraph.pl".to_string()],
            output: PathBuf::from("graph.svg"),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> LoadflameResult<()> {
        if self.targets.is_empty() {
            return Err(LoadflameError::Config(
                "targets must list at least one endpoint".to_string(),
            ));
        }
        if self.random_limit == 0 || self.random_limit < self.targets.len() as u64 {
            return Err(LoadflameError::Config(format!(
                "random_limit ({}) must be at least the number of targets ({})",
                self.random_limit,
                self.targets.len()
            )));
        }
        if self.profiler.frequency == 0 || self.profiler.frequency > 10_000 {
            return Err(LoadflameError::Config(format!(
                "profiler frequency must be between 1 and 10000 Hz, got {}",
                self.profiler.frequency
            )));
        }
        for (stage, argv) in [
            ("extract", &self.pipeline.extract),
            ("fold", &self.pipeline.fold),
            ("render", &self.pipeline.render),
        ] {
            if argv.is_empty() {
                return Err(LoadflameError::Config(format!(
                    "pipeline.{stage} must name a program"
                )));
            }
        }
        Ok(())
    }

    /// Full URL for a target entry.
    pub fn resolve_target(&self, target: &str) -> String {
        if target.contains("://") {
            return target.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if target.starts_with('/') {
            format!("{base}{target}")
        } else {
            format!("{base}/{target}")
        }
    }

    pub fn resolved_targets(&self) -> Vec<String> {
        self.targets.iter().map(|t| self.resolve_target(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_load_shape() {
        let cfg = Config::default();
        assert_eq!(cfg.seed, 123_456_789);
        assert_eq!(cfg.shot_count, 100);
        assert_eq!(cfg.random_limit, 1000);
        assert_eq!(cfg.cooldown, LoadDuration::from_millis(100));
        assert_eq!(
            cfg.resolved_targets(),
            vec![
                "http://localhost:8080/api/v1/maps/map1".to_string(),
                "http://localhost:8080/api/v1/maps".to_string(),
            ]
        );
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            shot_count = 1000
            cooldown = "10ms"
            targets = ["http://127.0.0.1:9000/health", "status"]

            [profiler]
            frequency = 499
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.shot_count, 1000);
        assert_eq!(cfg.cooldown, LoadDuration::from_millis(10));
        assert_eq!(cfg.profiler.frequency, 499);
        assert_eq!(cfg.generator, Generator::Chacha20);
        assert_eq!(cfg.profiler.program, "perf");
        assert_eq!(cfg.seed, 123_456_789);
        assert_eq!(
            cfg.resolved_targets(),
            vec![
                "http://127.0.0.1:9000/health".to_string(),
                "http://localhost:8080/status".to_string(),
            ]
        );
    }

    #[test]
    fn generator_is_selectable_by_name() {
        let cfg: Config = toml::from_str(r#"generator = "mt19937""#).expect("parse");
        assert_eq!(cfg.generator, Generator::Mt19937);
        assert!(toml::from_str::<Config>(r#"generator = "xorshift""#).is_err());
    }

    #[test]
    fn validate_rejects_empty_targets_and_small_limit() {
        let mut cfg = Config {
            targets: Vec::new(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        cfg.targets = vec!["a".into(), "b".into(), "c".into()];
        cfg.random_limit = 2;
        assert!(cfg.validate().is_err());

        cfg.random_limit = 3;
        cfg.validate().expect("limit equal to target count is fine");

        cfg.profiler.frequency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_optional_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("loadflame-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");

        let missing = Config::load_optional(&dir.join("absent.toml"));
        assert_eq!(missing.shot_count, 100);

        let broken = dir.join("broken.toml");
        std::fs::write(&broken, "shot_count = \"many\"").expect("write");
        assert_eq!(Config::load_optional(&broken).shot_count, 100);

        let good = dir.join("good.toml");
        std::fs::write(&good, "seed = 7").expect("write");
        assert_eq!(Config::load_optional(&good).seed, 7);
    }
}
