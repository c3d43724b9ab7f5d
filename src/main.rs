use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use research_runner::executor::{install_signal_handlers, is_shutdown_requested, kill_all_children};
use research_runner::log::parse_log_level;
use research_runner::orchestrator::{run_pipeline, PipelineOutcome};
use research_runner::report::success_matrix;
use research_runner::{config, lock, preflight};
use research_runner::{log_error, log_info, log_warn};

#[derive(Parser)]
#[command(name = "runner", about = "Autonomous research-pipeline orchestrator")]
struct Cli {
    /// Project folder to run the pipeline against
    project_folder: PathBuf,

    /// Validate the plan and log what would run, without executing phases
    /// or touching disk
    #[arg(long)]
    dry_run: bool,

    /// Skip the purge phase (bytecode caches, temp/, outputs/ rotation)
    #[arg(long)]
    skip_purge: bool,

    /// Path to config file (defaults to {project_folder}/runner.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match parse_log_level(&cli.log_level) {
        Ok(level) => research_runner::log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    match handle_run(&cli).await {
        Ok(success) => std::process::exit(if success { 0 } else { 1 }),
        Err(e) => {
            log_error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn handle_run(cli: &Cli) -> Result<bool, String> {
    install_signal_handlers()?;

    log_info!("--- Research Runner ---");
    log_info!("");

    log_info!("[pre] Acquiring lock...");
    let runtime_dir = cli.project_folder.join(".research-runner");
    let _lock = lock::try_acquire(&runtime_dir)?;

    let runner_config = config::load_config_from(cli.config.as_deref(), &cli.project_folder)?;

    log_info!("[pre] Running preflight checks...");
    if let Err(errors) = preflight::run_preflight(&runner_config, &cli.project_folder) {
        log_error!("[pre] Preflight FAILED:");
        for error in &errors {
            log_error!("  {}", error);
        }
        return Err(format!("{} preflight error(s) — fix all issues before running", errors.len()));
    }
    log_info!("[pre] Preflight passed.");

    let phase_names: Vec<&str> = runner_config.project.phases.iter().map(|p| p.id.as_str()).collect();
    log_info!("[config] Phases: {}", phase_names.join(" -> "));
    log_info!(
        "[config] Execution: phase_timeout={}s, deliberation_fan_out={}",
        runner_config.execution.phase_timeout_seconds, runner_config.execution.deliberation_fan_out
    );
    if cli.dry_run {
        log_info!("[config] Dry run: no phase scripts will be executed");
    }
    if cli.skip_purge {
        log_info!("[config] Purge phase skipped");
    }

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let shutdown_monitor = tokio::spawn(async move {
        loop {
            if is_shutdown_requested() {
                cancel_clone.cancel();
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    log_info!("");
    let run_id = format!("run-{}", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
    let run = run_pipeline(&runner_config, &cli.project_folder, run_id, cli.skip_purge, cli.dry_run, cancel).await?;

    kill_all_children();
    shutdown_monitor.abort();

    log_info!("");
    log_info!("{}", success_matrix(&run.run_result));

    match run.outcome {
        PipelineOutcome::Success => Ok(true),
        PipelineOutcome::Degraded => {
            log_warn!("Run finished degraded: a majority of phases still succeeded.");
            Ok(true)
        }
        PipelineOutcome::Failed => Ok(false),
    }
}
