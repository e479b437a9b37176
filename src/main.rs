mod booking;
mod client;
mod commands;
mod config;
mod models;
mod scheduler;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use config::{Overrides, Settings};

const DEFAULT_CONFIG: &str = "config.toml";
const DEFAULT_ENV_FILE: &str = ".env";

/// cult-booker — wait for a cult.fit date to open and book a class.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log API response bodies and other debug detail
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Path to config file (optional when everything comes from the environment)
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Env file with CULT_API_KEY, CULT_AT_TOKEN, CULT_ST_TOKEN, ...
    #[arg(long, global = true, default_value = DEFAULT_ENV_FILE)]
    env_file: PathBuf,
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Center ID to book at
    #[arg(long)]
    center: Option<String>,

    /// Class start time exactly as the schedule lists it, e.g. "19:00:00"
    #[arg(short = 't', long)]
    time: Option<String>,

    /// Workout name, matched exactly (e.g. "HRX WORKOUT")
    #[arg(short = 'w', long)]
    workout: Option<String>,

    /// Book this many days from today
    #[arg(short = 'a', long)]
    days_in_advance: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll until the target date opens, then book the matching class
    ///
    /// Exit codes: 0 booked, 1 config error, 2 auth failure, 3 no matching class,
    /// 4 no classes / date closed, 5 retries exhausted.
    Book {
        #[command(flatten)]
        target: TargetArgs,

        /// Stop after this many retries instead of polling indefinitely
        #[arg(long)]
        max_retries: Option<u32>,

        /// Dry run — find the class but do not book it
        #[arg(short = 'd', long)]
        dry_run: bool,
    },

    /// Fetch the schedule once and list the classes for the target date
    Classes {
        #[command(flatten)]
        target: TargetArgs,

        /// List this date (YYYY-MM-DD) instead of the computed target date
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn resolve_settings(cli: &Cli, target: &TargetArgs, max_retries: Option<u32>) -> Result<Settings> {
    config::load_env_file(&cli.env_file, cli.env_file != Path::new(DEFAULT_ENV_FILE))?;
    let file = config::load_config(&cli.config, cli.config != Path::new(DEFAULT_CONFIG))?;
    let overrides = Overrides {
        center_id: target.center.clone(),
        preferred_time: target.time.clone(),
        workout_name: target.workout.clone(),
        days_in_advance: target.days_in_advance,
        max_retries,
    };
    Settings::resolve(file, &overrides, |key| std::env::var(key).ok())
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Book {
            target,
            max_retries,
            dry_run,
        } => {
            let settings = resolve_settings(cli, target, *max_retries)?;
            info!("--- Cult.fit Booking Bot Started ---");
            let outcome = commands::run_book(&settings, *dry_run).await?;
            info!("--- Cult.fit Booking Bot Finished: {:?} ---", outcome);
            Ok(outcome.exit_code())
        }
        Command::Classes { target, date } => {
            let settings = resolve_settings(cli, target, None)?;
            commands::run_classes(&settings, *date).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Initialization failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
