mod compose;
mod config;
mod confirm;
mod error;
mod fee;
mod rpc_manager;
mod token;
mod transfer;
mod wallet;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::compose::{ClaimOptions, MineOptions, ServiceKind, CLAIM_IMAGE, MINE_IMAGE};
use crate::config::Config;
use crate::fee::FeeEstimator;
use crate::transfer::{TransferService, TransferSettings};

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Sweep SPL token balances into one wallet and generate ore miner compose files"
)]
struct Args {
    /// Path to config file
    #[clap(short, long, default_value = "config.json")]
    config: String,

    /// Generate default config file
    #[clap(short, long)]
    init: bool,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transfer every wallet's token balance to the beneficiary (default)
    Transfer {
        /// Build and sign, but never create accounts or submit
        #[clap(long)]
        dry_run: bool,
    },

    /// Show the address of every valid key in the key file
    Wallets,

    /// Generate a compose file with one service per key
    Compose {
        #[clap(subcommand)]
        kind: ComposeCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ComposeCommand {
    /// Mining services
    Mine {
        #[clap(flatten)]
        common: ComposeArgs,

        /// Miner threads per container
        #[clap(long, default_value_t = 1)]
        threads: u32,

        /// Priority fee in micro-lamports
        #[clap(long, default_value_t = 0)]
        fee: u64,

        #[clap(long, default_value = MINE_IMAGE)]
        image: String,
    },

    /// Reward claim services
    Claim {
        #[clap(flatten)]
        common: ComposeArgs,

        #[clap(long)]
        jito_enable: bool,

        #[clap(long)]
        jito_fee: Option<String>,

        #[clap(long, default_value = "0")]
        priority_fee: String,

        #[clap(long, default_value = "1")]
        threads: String,

        #[clap(long, default_value = CLAIM_IMAGE)]
        image: String,
    },
}

#[derive(clap::Args, Debug)]
struct ComposeArgs {
    /// Group name used in service names
    #[clap(short, long)]
    group: String,

    /// RPC endpoint handed to every container
    #[clap(short, long)]
    rpc: String,

    /// Newline-delimited private keys
    #[clap(short, long, default_value = "PrivateKeys.txt")]
    keys: PathBuf,

    #[clap(short, long, default_value = "output-mine.yaml")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ore_sweep=info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    if args.init {
        let config = Config::default();
        config.save(&args.config)?;
        println!("Default config generated at: {}", args.config);
        println!("Set spl_token and beneficiary before running transfers");
        return Ok(());
    }

    match args.command.unwrap_or(Command::Transfer { dry_run: false }) {
        Command::Transfer { dry_run } => run_transfers(&args.config, dry_run).await,
        Command::Wallets => show_wallets(&args.config),
        Command::Compose { kind } => run_compose(kind),
    }
}

async fn run_transfers(config_path: &str, dry_run: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let settings = TransferSettings::from_config(&config, dry_run)
        .context("spl_token and beneficiary must be set to run transfers")?;

    println!("Using RPC endpoint: {}", config.rpc_url);
    println!("Token mint: {}", settings.mint);
    println!("Target address: {}", settings.beneficiary);

    let loaded = wallet::load_keys(&config.keys_file)?;

    // One connection for the whole batch
    let client = rpc_manager::connect(&config);
    println!("Testing RPC endpoint...");
    rpc_manager::probe(&client).await?;

    let fees = FeeEstimator::new(config.fee_tracker_url.clone())?;
    let service = TransferService::new(client, fees, settings);

    let report = service.run_batch(&loaded.keys).await;
    report.print_summary();
    if !loaded.rejected.is_empty() {
        println!("Invalid keys skipped: {}", loaded.rejected.len());
    }

    tokio::time::sleep(config.settle_delay()).await;
    Ok(())
}

fn show_wallets(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let loaded = wallet::load_keys(&config.keys_file)?;

    for (index, key) in loaded.keys.iter().enumerate() {
        println!("{:>4}  {}", index + 1, wallet::owner_of(key)?);
    }
    for rejected in &loaded.rejected {
        println!("line {}: {}", rejected.line, rejected.reason);
    }
    println!("Please fund these wallets with SOL for fees before running transfers");
    Ok(())
}

fn run_compose(command: ComposeCommand) -> Result<()> {
    let (kind, common) = match command {
        ComposeCommand::Mine {
            common,
            threads,
            fee,
            image,
        } => (ServiceKind::Mine(MineOptions { threads, fee, image }), common),
        ComposeCommand::Claim {
            common,
            jito_enable,
            jito_fee,
            priority_fee,
            threads,
            image,
        } => (
            ServiceKind::Claim(ClaimOptions {
                jito_enable,
                jito_fee,
                priority_fee,
                threads,
                image,
            }),
            common,
        ),
    };

    let written = compose::write_compose(
        &common.keys,
        &common.output,
        &kind,
        &common.group,
        &common.rpc,
    )?;
    println!("{} services written to {}", written, common.output.display());
    Ok(())
}
