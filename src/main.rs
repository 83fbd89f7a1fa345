mod cli_logger;

use anyhow::Context as _;
use clap::Parser;
use loadflame::platform::process::Supervisor;
use loadflame::{
    Config, CurlTransport, DEFAULT_CONFIG_FILE, LoadDuration, LoadflameError, Transport,
    TransportKind, UreqTransport, exit_code,
};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use crate::cli_logger::CliLogger;

/// Start a server under a sampling profiler, drive a seeded request load at
/// it, and render the samples as a flame graph.
#[derive(Debug, Parser)]
#[command(name = "loadflame", version)]
struct Cli {
    /// Server executable to launch and profile.
    #[arg(value_name = "SERVER")]
    server: String,

    /// Arguments forwarded to the server verbatim.
    #[arg(value_name = "SERVER_ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Config file; a missing file means built-in defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Seed for the workload selector.
    #[arg(long)]
    seed: Option<u64>,

    /// Number of requests to fire.
    #[arg(long)]
    shots: Option<usize>,

    /// Pause after every request, e.g. `100ms`.
    #[arg(long)]
    cooldown: Option<LoadDuration>,

    /// Print the workload plan and exit without starting anything.
    #[arg(long)]
    plan: bool,

    /// Emit milestones and the summary as JSON lines.
    #[arg(long)]
    json: bool,

    /// Disable ANSI colours in text output.
    #[arg(long)]
    no_color: bool,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let logger = CliLogger::new(cli.json, cli.no_color);

    match run(&cli, &logger) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            match err.downcast_ref::<LoadflameError>() {
                Some(e) => ExitCode::from(e.exit_code()),
                None => ExitCode::from(exit_code::GENERAL_ERROR),
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, logger: &CliLogger) -> anyhow::Result<u8> {
    let mut config = Config::load_optional(&cli.config);
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(shots) = cli.shots {
        config.shot_count = shots;
    }
    if let Some(cooldown) = cli.cooldown {
        config.cooldown = cooldown;
    }

    if cli.plan {
        let (ammo, plan) = loadflame::plan_for(&config)?;
        logger.print_plan(&ammo, &plan)?;
        return Ok(exit_code::SUCCESS);
    }

    let timeout = config.request_timeout.get();
    let transport: Box<dyn Transport> = match config.transport {
        TransportKind::Http => Box::new(UreqTransport::new(timeout)),
        TransportKind::Curl => Box::new(CurlTransport::new(
            Supervisor::new(config.stop_grace.get()),
            timeout,
        )),
    };

    let mut server_argv = Vec::with_capacity(cli.server_args.len() + 1);
    server_argv.push(cli.server.clone());
    server_argv.extend(cli.server_args.iter().cloned());

    let summary = loadflame::run(&config, &server_argv, transport, logger)
        .with_context(|| format!("profiling run of {} failed", cli.server))?;
    logger.print_run_summary(&summary)?;
    Ok(summary.exit_code())
}
