use npt_langevin::{RunConfig, RunStatus, Scenario, StopHandle};

use anyhow::{Context, Result};
use clap::Parser;

use std::path::{Path, PathBuf};

/// NPT molecular dynamics with a Langevin thermostat and a rescaling barostat
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Run configuration (YAML)
    #[arg(short, long, default_value = "md_config.yaml")]
    config: PathBuf,

    /// Restart artifact to continue from; overrides `resume_from` in the config
    #[arg(short, long)]
    resume: Option<PathBuf>,
}

// load here to keep main clean
fn load_config(args: &Args) -> Result<(RunConfig, PathBuf)> {
    let mut cfg = RunConfig::from_path(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(resume) = &args.resume {
        // given on the command line, so relative to the working directory
        cfg.resume_from = Some(std::env::current_dir()?.join(resume));
    }
    let base = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok((cfg, base))
}

/// First Ctrl-C stops the run at the next step boundary, a second one exits
fn install_interrupt_handler(stop: StopHandle) -> Result<()> {
    ctrlc::set_handler(move || {
        if stop.is_requested() {
            log::warn!("second interrupt, exiting without a final checkpoint");
            std::process::exit(130);
        }
        log::warn!("interrupt received, stopping after the current step...");
        stop.request_stop();
    })
    .context("failed to install the Ctrl-C handler")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let (cfg, base) = load_config(&args)?;

    let scenario = Scenario::build_scenario(cfg, &base).context("failed to build the run")?;
    let mut simulation = scenario.into_simulation().context("failed to prepare the run")?;
    install_interrupt_handler(simulation.stop_handle())?;
    let outcome = simulation.run().context("MD run failed")?;

    match outcome.status {
        RunStatus::Completed => log::info!("completed {} steps", outcome.steps_completed),
        other => log::warn!("run ended as {other:?} after {} steps", outcome.steps_completed),
    }
    Ok(())
}
