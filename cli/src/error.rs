//! Error types for conditions callers need to tell apart

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PAYER_SECRET_KEY is not set and no --keypair file was given")]
    MissingSecretKey,

    #[error("MAINNET_RPC_URL is required when DEVNET_MODE is not \"true\"")]
    MissingRpcUrl,

    #[error("PAYER_SECRET_KEY is neither a JSON byte array nor a base58 secret key: {0}")]
    InvalidSecretKey(String),

    #[error("Failed to load keypair file {path}: {reason}")]
    KeypairFile { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("{count} markets found for {base}/{quote}; pin one with --market")]
    AmbiguousMarket {
        base: Pubkey,
        quote: Pubkey,
        count: usize,
    },

    #[error("No valid market authority for market {0}")]
    MarketAuthorityNotFound(Pubkey),

    #[error("Nothing to remove: LP balance for {lp_mint} is zero")]
    NothingToRemove { lp_mint: Pubkey },

    #[error("Requested {requested} LP exceeds wallet balance {balance}")]
    AmountExceedsBalance { requested: u64, balance: u64 },

    #[error("No token account for LP mint {0} in wallet")]
    LpAccountMissing(Pubkey),

    #[error("Mint {mint} is owned by {owner}, not the SPL token program")]
    InvalidMintOwner { mint: Pubkey, owner: Pubkey },

    #[error("Account {address} is not a valid market state: {reason}")]
    InvalidMarketData { address: Pubkey, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStage {
    Sign,
    Send,
    Confirm,
}

impl fmt::Display for SubmitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitStage::Sign => write!(f, "sign"),
            SubmitStage::Send => write!(f, "send"),
            SubmitStage::Confirm => write!(f, "confirm"),
        }
    }
}

/// A bundle stopped part way. Everything in `confirmed` already landed on chain.
#[derive(Debug, Error)]
#[error(
    "Transaction {} of {total} failed to {stage} ({} already confirmed): {source}",
    .index + 1,
    .confirmed.len()
)]
pub struct SubmitError {
    pub index: usize,
    pub total: usize,
    pub stage: SubmitStage,
    pub confirmed: Vec<Signature>,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}
