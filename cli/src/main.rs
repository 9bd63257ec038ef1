//! lp-withdraw - remove liquidity from a Raydium AMM v4 pool
//!
//! Resolves the OpenBook market for a (token, WSOL) pair, derives the pool
//! keys, reads the wallet's LP balance and burns it for the underlying pair
//! on devnet or mainnet.

use clap::Parser;
use colored::Colorize;
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;

mod accounts;
mod client;
mod config;
mod error;
mod liquidity;
mod market;
mod pool;
mod transaction;

use config::{ConfigSettings, NetworkConfig, TxVersion};
use liquidity::{RemovalOutcome, RemoveLiquidityOptions};
use pool::MarketSelection;

#[derive(Parser)]
#[command(name = "lp-withdraw")]
#[command(about = "Withdraw liquidity from a Raydium AMM v4 pool", long_about = None)]
#[command(version)]
struct Cli {
    /// Base token mint of the pool (quote is always WSOL)
    #[arg(env = "PROGRAM_ADDRESS")]
    mint: Pubkey,

    /// Use devnet instead of mainnet
    #[arg(
        long,
        env = "DEVNET_MODE",
        action = clap::ArgAction::Set,
        value_parser = parse_devnet_mode,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    devnet: bool,

    /// RPC URL (required on mainnet)
    #[arg(short, long, env = "MAINNET_RPC_URL")]
    url: Option<String>,

    /// Keypair file, used when PAYER_SECRET_KEY is not set
    #[arg(short, long)]
    keypair: Option<PathBuf>,

    /// Transaction format
    #[arg(long, env = "TX_VERSION", value_enum, default_value_t = TxVersion::V0)]
    tx_version: TxVersion,

    /// Use this market instead of searching by mint pair
    #[arg(long)]
    market: Option<Pubkey>,

    /// Fail when more than one market matches the mint pair
    #[arg(long, conflicts_with = "market")]
    strict_market: bool,

    /// Raw LP amount to burn (defaults to the whole balance)
    #[arg(long)]
    amount: Option<u64>,

    /// Compute unit price in micro-lamports
    #[arg(long)]
    priority_fee: Option<u64>,

    /// Build the transactions without sending them
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Only the literal `true` selects devnet
fn parse_devnet_mode(value: &str) -> Result<bool, String> {
    Ok(value == "true")
}

impl Cli {
    fn selection(&self) -> MarketSelection {
        match (self.market, self.strict_market) {
            (Some(market), _) => MarketSelection::Pinned(market),
            (None, true) => MarketSelection::RejectAmbiguous,
            (None, false) => MarketSelection::LowestAddress,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let config = NetworkConfig::new(ConfigSettings {
        devnet: cli.devnet,
        rpc_url: cli.url.clone(),
        secret_key: std::env::var("PAYER_SECRET_KEY").ok(),
        keypair_path: cli.keypair.clone(),
        tx_version: cli.tx_version,
    })?;

    println!("{} {}", "Payer:".bright_cyan(), config.pubkey());
    println!("{} {}", "Mode:".bright_cyan(), config.network);
    if cli.verbose {
        println!("{} {}", "RPC URL:".bright_cyan(), config.rpc_url);
        println!("{} {:?}", "Tx Version:".bright_cyan(), config.tx_version);
        println!("{} {}", "AMM Program:".bright_cyan(), config.program_ids.amm_v4);
        println!("{} {}", "Market Program:".bright_cyan(), config.program_ids.openbook_market);
    }

    let rpc_client = client::create_rpc_client(&config);
    let options = RemoveLiquidityOptions {
        mint: cli.mint,
        selection: cli.selection(),
        amount: cli.amount,
        priority_fee: cli.priority_fee,
        dry_run: cli.dry_run,
    };

    match liquidity::remove_liquidity(&config, &rpc_client, &options).await {
        Ok(RemovalOutcome::Removed { lp_amount, signatures }) => {
            println!(
                "\n{} {} LP in {} transaction(s)",
                "LP Remove Success!".bright_green().bold(),
                lp_amount.to_ui_string(),
                signatures.len()
            );
        }
        Ok(RemovalOutcome::DryRun { lp_amount, transactions }) => {
            println!(
                "{} would burn {} LP in {} transaction(s)",
                "Dry run:".yellow(),
                lp_amount.to_ui_string(),
                transactions.len()
            );
            for (i, tx) in transactions.iter().enumerate() {
                println!("  {} #{}: {} instructions", "Transaction".dimmed(), i + 1, tx.instruction_count());
            }
        }
        Ok(RemovalOutcome::NothingToRemove { lp_mint }) => {
            log::info!("Wallet holds no LP tokens of {}", lp_mint);
        }
        Ok(RemovalOutcome::MarketNotFound) => {}
        Err(e) => {
            if let Some(submit) = e.downcast_ref::<error::SubmitError>() {
                for signature in &submit.confirmed {
                    println!(
                        "{} {}",
                        "Already confirmed:".yellow(),
                        client::format_signature(signature, config.network)
                    );
                }
            }
            println!("{}", "LP Remove Failed".red().bold());
            return Err(e);
        }
    }

    Ok(())
}
