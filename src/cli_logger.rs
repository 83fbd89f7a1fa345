use anyhow::Result;
use loadflame::{
    Ammunition, Generator, Milestone, RunObserver, RunStatus, RunSummary, TraceStatus, WorkloadPlan,
};
use serde::Serialize;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

#[derive(Serialize)]
struct PlannedShot<'a> {
    index: usize,
    target_index: usize,
    url: &'a str,
}

#[derive(Serialize)]
struct PlanDoc<'a> {
    generator: Generator,
    seed: u64,
    random_limit: u64,
    shots: Vec<PlannedShot<'a>>,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_run_summary(&self, summary: &RunSummary) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(summary)?);
            return Ok(());
        }

        let status_style = match summary.status {
            RunStatus::ArtifactCreated => self.style("CREATED", "32;1"),
            RunStatus::TraceMissing => self.style("NO TRACE", "33;1"),
            RunStatus::RenderFailed => self.style("RENDER FAILED", "31;1"),
        };

        let mut out = String::new();
        out.push_str(&format!("{} {}\n", self.style("loadflame", "36;1"), status_style));
        out.push_str(&format!("{} {}\n", self.style("run", "90"), summary.run_id));
        out.push_str(&format!("{} {}\n", self.style("seed", "90"), summary.seed));
        out.push_str(&format!(
            "{} {}ms\n",
            self.style("duration", "90"),
            summary.duration_ms
        ));

        let shots = &summary.shots;
        let codes = shots
            .by_status
            .iter()
            .map(|(code, n)| format!("{code}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!(
            "{} planned={} fired={} ok={} failed={} {}\n",
            self.style("shots", "90"),
            shots.planned,
            shots.fired,
            shots.succeeded,
            shots.failed,
            codes
        ));

        let trace = match &summary.trace {
            TraceStatus::Ready { path, bytes } => format!("{} ({bytes} bytes)", path.display()),
            TraceStatus::Empty { path } => format!("{} (empty)", path.display()),
            TraceStatus::Missing { path } => format!("{} (missing)", path.display()),
        };
        out.push_str(&format!("{} {trace}\n", self.style("trace", "90")));
        if let Some(artifact) = &summary.artifact {
            out.push_str(&format!(
                "{} {}\n",
                self.style("artifact", "90"),
                artifact.path.display()
            ));
        }

        if !summary.findings.is_empty() {
            out.push_str(&format!("{}\n", self.style("findings", "33;1")));
            for finding in &summary.findings {
                out.push_str(&format!("  - {finding}\n"));
            }
        }
        out.push_str(&summary.status_line());

        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_plan(&self, ammo: &Ammunition, plan: &WorkloadPlan) -> Result<()> {
        let doc = PlanDoc {
            generator: plan.generator,
            seed: plan.seed,
            random_limit: plan.random_limit,
            shots: plan
                .targets(ammo)
                .enumerate()
                .map(|(index, (target_index, url))| PlannedShot {
                    index,
                    target_index,
                    url,
                })
                .collect(),
        };
        if self.json {
            println!("{}", serde_json::to_string(&doc)?);
            return Ok(());
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{} generator={:?} seed={} random_limit={} shots={}\n",
            self.style("plan", "36;1"),
            doc.generator,
            doc.seed,
            doc.random_limit,
            doc.shots.len()
        ));
        for shot in &doc.shots {
            out.push_str(&format!(
                "{:>5} {} {}\n",
                shot.index,
                self.style(&format!("[{}]", shot.target_index), "90"),
                shot.url
            ));
        }
        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

impl RunObserver for CliLogger {
    fn milestone(&self, milestone: &Milestone) {
        if self.json {
            match serde_json::to_string(milestone) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::warn!("cannot encode milestone: {err}"),
            }
            return;
        }
        match milestone {
            Milestone::ShootingComplete { .. } => {
                println!("{}", self.style(&milestone.to_string(), "37;1"));
            }
            other => tracing::info!("{other}"),
        }
    }
}
