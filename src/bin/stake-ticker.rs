use std::{path::PathBuf, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use stake_cli::{
    config,
    service::StakingService,
    stake_core::{clock::SystemClock, format_amount},
    store::JsonFileStore,
};

/// Periodic release timer: accrues every open package on each pass.
#[derive(Parser)]
#[command(name = "stake-ticker")]
struct Args {
    #[arg(long, value_name = "FILE", default_value = "stake_state.json")]
    state: PathBuf,

    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds between passes
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

fn pass(args: &Args) -> Result<()> {
    let params = config::load_params(args.config.as_deref())?;
    // Reopen each pass so writes made by stakectl in between are picked up.
    let svc = StakingService::open(JsonFileStore::new(&args.state), SystemClock, params)
        .with_context(|| format!("opening ledger {}", args.state.display()))?;
    let report = svc.tick_all()?;
    info!(
        "pass at {}: ticked {} packages, released {}, {} newly eligible",
        svc.now(),
        report.ticked,
        format_amount(report.released),
        report.newly_eligible.len()
    );
    for id in &report.newly_eligible {
        info!("package {id} reached its cap and may exit");
    }
    for failure in &report.failed {
        warn!("package {} not ticked: {}", failure.package, failure.error);
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    loop {
        if let Err(err) = pass(&args) {
            if args.once {
                eprintln!("error: {err:#}");
                std::process::exit(2);
            }
            error!("tick pass failed: {err:#}");
        }
        if args.once {
            break;
        }
        thread::sleep(Duration::from_secs(args.interval.max(1)));
    }
}
