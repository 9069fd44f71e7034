use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use stake_cli::{
    config,
    service::StakingService,
    stake_core::{
        clock::{Clock, ManualClock, SystemClock},
        format_amount, parse_amount,
        params::StakingParams,
        PackageId, Timestamp,
    },
    store::JsonFileStore,
};

#[derive(Parser)]
#[command(name = "stakectl")]
#[command(about = "Package staking ledger: register, stake, accrue and exit")]
struct Cli {
    /// Ledger snapshot file
    #[arg(long, value_name = "FILE", default_value = "stake_state.json", global = true)]
    state: PathBuf,

    /// TOML file with a [staking] table of pool parameters
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Evaluate at this unix time instead of the system clock
    #[arg(long, value_name = "UNIX", global = true)]
    at: Option<Timestamp>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty ledger with the configured pool parameters
    Init(InitArgs),
    /// Register an account, optionally under a referral code
    Register {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        referrer_code: Option<String>,
    },
    /// Open a staking package
    Stake {
        #[arg(long)]
        owner: String,
        /// Principal in tokens, e.g. 100 or 250.5
        #[arg(long, value_parser = parse_token_amount)]
        amount: u64,
        /// Client request id; retrying with the same id does not stake twice
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Accrue one package up to now
    Tick {
        #[arg(long)]
        package: PackageId,
    },
    /// Accrue every open package up to now
    TickAll,
    /// Exit a package that reached its cap
    Exit {
        #[arg(long)]
        package: PackageId,
    },
    /// Staked amount, level, referrals and team performance of an account
    Summary {
        #[arg(long)]
        owner: String,
    },
    /// Packages owned by an account
    Packages {
        #[arg(long)]
        owner: String,
    },
    /// Level requirements and bonuses
    Levels,
    /// Pool-wide totals
    Stats,
    /// Ledger events from a cursor
    Events {
        #[arg(long, default_value_t = 0)]
        since: usize,
    },
    /// Merkle root over the persisted ledger state
    StateRoot,
}

#[derive(Args)]
struct InitArgs {
    /// Overwrite an existing ledger
    #[arg(long)]
    force: bool,
    #[arg(long)]
    daily_rate_ppm: Option<u64>,
    #[arg(long)]
    cap_multiplier_bps: Option<u64>,
    /// Minimum principal in tokens
    #[arg(long, value_parser = parse_token_amount)]
    min_principal: Option<u64>,
    #[arg(long)]
    direct_bonus_bps: Option<u64>,
    #[arg(long)]
    indirect_bonus_bps: Option<u64>,
    #[arg(long)]
    primary_share_bps: Option<u64>,
}

impl InitArgs {
    fn apply(&self, mut params: StakingParams) -> StakingParams {
        if let Some(v) = self.daily_rate_ppm {
            params.daily_rate_ppm = v;
        }
        if let Some(v) = self.cap_multiplier_bps {
            params.cap_multiplier_bps = v;
        }
        if let Some(v) = self.min_principal {
            params.min_principal = v;
        }
        if let Some(v) = self.direct_bonus_bps {
            params.direct_bonus_bps = v;
        }
        if let Some(v) = self.indirect_bonus_bps {
            params.indirect_bonus_bps = v;
        }
        if let Some(v) = self.primary_share_bps {
            params.primary_share_bps = v;
        }
        params
    }
}

fn parse_token_amount(text: &str) -> Result<u64, String> {
    parse_amount(text).ok_or_else(|| format!("invalid token amount '{text}'"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(2);
    }
}

fn run(cli: Cli) -> Result<()> {
    let params = config::load_params(cli.config.as_deref())?;
    let clock = ManualClock::new(cli.at.unwrap_or_else(|| SystemClock.now()));
    let store = JsonFileStore::new(&cli.state);

    if let Command::Init(args) = &cli.command {
        if store.exists() && !args.force {
            bail!(
                "{} already exists; pass --force to overwrite",
                cli.state.display()
            );
        }
        let svc = StakingService::init(store, clock, args.apply(params))?;
        println!("Initialised ledger → {}", cli.state.display());
        return print_json(&svc.params());
    }

    let svc = StakingService::open(store, clock, params)
        .with_context(|| format!("opening ledger {}", cli.state.display()))?;

    match cli.command {
        Command::Init(_) => unreachable!("handled above"),
        Command::Register {
            owner,
            referrer_code,
        } => {
            let account = svc.create_account(&owner, referrer_code.as_deref())?;
            println!("Registered {} (referral code {})", account.owner, account.referral_code);
            print_json(&account)
        }
        Command::Stake {
            owner,
            amount,
            request_id,
        } => {
            let package = svc.create_package(&owner, amount, request_id.as_deref())?;
            println!(
                "Package {} opened: principal {}, cap {}",
                package.id,
                format_amount(package.principal),
                format_amount(package.cap)
            );
            print_json(&package)
        }
        Command::Tick { package } => {
            let step = svc.tick_detailed(package, svc.now())?;
            println!("Released {}", format_amount(step.released));
            print_json(&step)?;
            print_json(&svc.package(package)?)
        }
        Command::TickAll => {
            let report = svc.tick_all()?;
            println!(
                "Ticked {} packages, released {}, skipped {}",
                report.ticked,
                format_amount(report.released),
                report.failed.len()
            );
            print_json(&report)
        }
        Command::Exit { package } => {
            let split = svc.exit_package(package)?;
            println!(
                "Package {package} exited: primary {}, secondary {}",
                format_amount(split.primary),
                format_amount(split.secondary)
            );
            print_json(&split)
        }
        Command::Summary { owner } => print_json(&svc.summary(&owner)?),
        Command::Packages { owner } => print_json(&svc.packages_of(&owner)?),
        Command::Levels => {
            for tier in svc.level_table() {
                println!(
                    "L{}  {:<40} team +{}%  dividend {}%",
                    tier.level,
                    tier.requirement.to_string(),
                    tier.team_acceleration_bps as f64 / 100.0,
                    tier.global_dividend_bps as f64 / 100.0
                );
            }
            Ok(())
        }
        Command::Stats => print_json(&svc.pool_stats()),
        Command::Events { since } => print_json(&svc.events_since(since)),
        Command::StateRoot => {
            println!("{}", hex::encode(svc.state_root()));
            Ok(())
        }
    }
}
