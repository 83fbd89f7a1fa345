//! One complete run: server up, profiler attached, deterministic load,
//! profiler flushed, server down, flame graph rendered.
//!
//! Every child is a [`ManagedProcess`](crate::platform::process::ManagedProcess)
//! owned by this function's stack frame, so an early `?` return still stops
//! whatever was already started.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use std::time::Instant;

use crate::platform::fsutil;
use crate::platform::process::{CommandSpec, StdinSource, StdoutSink, Supervisor};
use crate::runtime::timeline::{ShotRecord, write_timeline};
use crate::{
    Ammunition, ArtifactPipeline, Config, LoadflameError, LoadflameResult, Milestone,
    ProfilingController, RunObserver, RunStatus, RunSummary, ShotStats, Shooter, Transport,
    WorkloadPlan,
};

/// Builds the deterministic plan for `config` without starting anything.
pub fn plan_for(config: &Config) -> LoadflameResult<(Ammunition, WorkloadPlan)> {
    config.validate()?;
    let ammo = Ammunition::new(config.resolved_targets())?;
    let plan = WorkloadPlan::generate(
        config.generator,
        config.seed,
        config.random_limit,
        &ammo,
        config.shot_count,
    )?;
    Ok((ammo, plan))
}

pub fn run<T: Transport>(
    config: &Config,
    server_argv: &[String],
    transport: T,
    observer: &dyn RunObserver,
) -> LoadflameResult<RunSummary> {
    let (ammo, plan) = plan_for(config)?;
    let server_spec = CommandSpec::from_argv("server", server_argv)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = now_rfc3339();
    let started = Instant::now();
    let mut findings = Vec::new();
    let supervisor = Supervisor::new(config.stop_grace.get());

    let mut server = supervisor.spawn(&server_spec, StdinSource::Null, StdoutSink::Null)?;
    let server_pid = server.pid();
    tracing::info!("server {server_spec} started with pid {server_pid}");
    observer.milestone(&Milestone::ServerStarted { pid: server_pid });

    std::thread::sleep(config.server_warmup.get());
    if let Some(status) = server.poll()? {
        return Err(LoadflameError::ServerExited { status });
    }

    let controller = ProfilingController::new(supervisor.clone(), config.profiler.clone());
    let mut profiler = controller.start(server_pid)?;
    let profiler_pid = profiler.pid();
    observer.milestone(&Milestone::ProfilerAttached {
        pid: profiler_pid,
        target_pid: profiler.target_pid(),
    });

    std::thread::sleep(config.attach_settle.get());
    if !profiler.is_running() {
        tracing::warn!("profiler pid {profiler_pid} exited before the load phase");
        findings.push("profiler exited before the load phase started".to_string());
    }

    let mut shooter = Shooter::new(transport, config.cooldown.get());
    let mut stats = ShotStats::planned(plan.len());
    let mut records = Vec::with_capacity(plan.len());
    let load_started = Instant::now();
    tracing::info!(
        "firing {} shots (seed {}, cooldown {:?})",
        plan.len(),
        config.seed,
        shooter.cooldown()
    );
    for (index, (target_index, url)) in plan.targets(&ammo).enumerate() {
        let offset_ms = load_started.elapsed().as_millis() as u64;
        let outcome = shooter.shoot(url);
        stats.record(&outcome);
        records.push(ShotRecord {
            index,
            target_index,
            offset_ms,
            outcome,
        });
    }
    if stats.failed > 0 {
        tracing::warn!("{} of {} shots failed", stats.failed, stats.fired);
    }
    observer.milestone(&Milestone::ShootingComplete { fired: stats.fired });

    std::thread::sleep(config.pre_stop_settle.get());
    let trace = profiler.stop_and_wait();
    observer.milestone(&Milestone::ProfilerStopped {
        trace_ready: trace.is_ready(),
    });

    match server.stop(true) {
        Some(status) => tracing::info!("server pid {server_pid} stopped ({status})"),
        None => tracing::warn!("server pid {server_pid} stop not confirmed"),
    }
    drop(server);
    observer.milestone(&Milestone::ServerStopped { pid: server_pid });

    let (status, artifact) = if trace.is_ready() {
        let pipeline = ArtifactPipeline::from_config(supervisor, &config.pipeline, trace.path())?;
        match pipeline.render() {
            Ok(artifact) => {
                observer.milestone(&Milestone::ArtifactRendered {
                    bytes: artifact.bytes,
                });
                (RunStatus::ArtifactCreated, Some(artifact))
            }
            Err(err) => {
                tracing::warn!("flame graph rendering failed: {err}");
                findings.push(format!("render failed: {err}"));
                (RunStatus::RenderFailed, None)
            }
        }
    } else {
        // A diagram from an older run must not pass for this run's output.
        if let Err(err) = fsutil::remove_stale(&config.pipeline.output) {
            tracing::warn!("cannot remove {}: {err}", config.pipeline.output.display());
        }
        findings.push(format!(
            "pipeline skipped: no usable trace at {}",
            trace.path().display()
        ));
        (RunStatus::TraceMissing, None)
    };

    if let Some(path) = &config.timeline_path
        && let Err(err) = write_timeline(&records, path)
    {
        tracing::warn!("cannot write timeline {}: {err}", path.display());
        findings.push(format!("timeline not written: {err}"));
    }

    let summary = RunSummary {
        run_id,
        seed: config.seed,
        status,
        server_pid,
        profiler_pid,
        started_at,
        finished_at: now_rfc3339(),
        duration_ms: started.elapsed().as_millis() as u64,
        shots: stats,
        trace,
        artifact,
        findings,
    };

    if let Some(path) = &config.report_path
        && let Err(err) = fsutil::write_json(path, &summary)
    {
        tracing::warn!("cannot write report {}: {err}", path.display());
    }
    Ok(summary)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
