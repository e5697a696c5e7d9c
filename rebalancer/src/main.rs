//! CLI entry point for the basketbook rebalancer.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};

use basketbook_rebalancer::config::Config;
use basketbook_rebalancer::error::{Error, ErrorKind};
use basketbook_rebalancer::runner::{self, RunOptions};
use basketbook_rebalancer::scenario::Scenario;

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Multi-basket rebalancer: propose, net, trade, settle")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, confirm, and drive one rebalance epoch for a scenario
    Run {
        /// Path to scenario.json
        scenario: PathBuf,

        /// Show plan without proposing trades
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt (for automation/cron)
        #[arg(long)]
        force: bool,
    },

    /// Show which baskets need rebalancing and the netted trades
    Plan {
        /// Path to scenario.json
        scenario: PathBuf,
    },

    /// Validate the config file
    CheckConfig,
}

fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    Scenario::load(path).with_context(|| format!("loading scenario {}", path.display()))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Run {
            scenario,
            dry_run,
            force,
        } => {
            let spec = load_scenario(&scenario).unwrap_or_else(|e| {
                eprintln!("Error: {e:#}");
                process::exit(1);
            });
            let opts = RunOptions {
                dry_run,
                force,
                scenario_file: scenario.display().to_string(),
            };
            runner::run(&config, &spec, &opts)
        }
        Command::Plan { scenario } => {
            let spec = load_scenario(&scenario).unwrap_or_else(|e| {
                eprintln!("Error: {e:#}");
                process::exit(1);
            });
            runner::plan(&config, &spec)
        }
        Command::CheckConfig => {
            let m = config.manager_config();
            println!(
                "Config OK: retry limit {}, step delay {}s, swap fee {} bps, audit log {}",
                m.retry_limit,
                m.step_delay,
                m.swap_fee,
                config.audit_path().display()
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        match &e {
            Error::Aborted(msg) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            Error::EpochIncomplete { .. } => {
                eprintln!("\nIncomplete: {e}");
                process::exit(3);
            }
            _ if e.kind() == ErrorKind::Economic => {
                eprintln!("\nAborted: {e}");
                process::exit(2);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}
