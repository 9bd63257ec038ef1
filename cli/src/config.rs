//! Network configuration and keypair management

use anyhow::{Context, Result};
use clap::ValueEnum;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";

/// Raydium's shared lookup table, only deployed on mainnet
pub const MAINNET_LOOKUP_TABLE: Pubkey = pubkey!("2immgwYNHBbyVQKVGCEkgWpi53bLwWNRMB5G2nbgYV17");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Devnet,
    Mainnet,
}

impl Network {
    pub fn from_devnet_flag(devnet: bool) -> Self {
        if devnet {
            Network::Devnet
        } else {
            Network::Mainnet
        }
    }

    /// Cluster name as used by explorer links
    pub fn cluster(&self) -> &'static str {
        match self {
            Network::Devnet => "devnet",
            Network::Mainnet => "mainnet-beta",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Devnet => write!(f, "devnet"),
            Network::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// Program ids the withdrawal touches on a given network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramIds {
    pub amm_v4: Pubkey,
    pub openbook_market: Pubkey,
}

impl ProgramIds {
    pub const MAINNET: Self = Self {
        amm_v4: pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8"),
        openbook_market: pubkey!("srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX"),
    };

    pub const DEVNET: Self = Self {
        amm_v4: pubkey!("HWy1jotHpo6UqeQxx49dpYYdQB8wj9Qk9MdxwjLvDHB8"),
        openbook_market: pubkey!("EoTcMgcDRTJVZDMZWBoU6rhYHZfkNTVEAfz3uUJRcYGj"),
    };

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Devnet => Self::DEVNET,
            Network::Mainnet => Self::MAINNET,
        }
    }
}

pub fn lookup_table_for_network(network: Network) -> Option<Pubkey> {
    match network {
        Network::Devnet => None,
        Network::Mainnet => Some(MAINNET_LOOKUP_TABLE),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TxVersion {
    #[default]
    V0,
    Legacy,
}

/// Raw inputs gathered from flags and the environment
#[derive(Default)]
pub struct ConfigSettings {
    pub devnet: bool,
    pub rpc_url: Option<String>,
    pub secret_key: Option<String>,
    pub keypair_path: Option<PathBuf>,
    pub tx_version: TxVersion,
}

pub struct NetworkConfig {
    pub network: Network,
    pub rpc_url: String,
    pub keypair: Keypair,
    pub program_ids: ProgramIds,
    pub lookup_table: Option<Pubkey>,
    pub tx_version: TxVersion,
    pub commitment: CommitmentConfig,
}

impl NetworkConfig {
    /// Everything here runs before the first RPC call, so a bad setup halts early
    pub fn new(settings: ConfigSettings) -> Result<Self> {
        let network = Network::from_devnet_flag(settings.devnet);

        let rpc_url = match (network, settings.rpc_url) {
            (_, Some(url)) if !url.trim().is_empty() => url,
            (Network::Devnet, _) => DEVNET_RPC_URL.to_string(),
            (Network::Mainnet, _) => return Err(ConfigError::MissingRpcUrl.into()),
        };

        let keypair = match (settings.secret_key, settings.keypair_path) {
            (Some(secret), _) => keypair_from_secret(&secret)?,
            (None, Some(path)) => load_keypair(&path)?,
            (None, None) => return Err(ConfigError::MissingSecretKey.into()),
        };

        Ok(Self {
            network,
            rpc_url,
            keypair,
            program_ids: ProgramIds::for_network(network),
            lookup_table: lookup_table_for_network(network),
            tx_version: settings.tx_version,
            commitment: CommitmentConfig::confirmed(),
        })
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

/// Decode secret key material: a JSON byte array or a base58 string
pub fn keypair_from_secret(secret: &str) -> Result<Keypair, ConfigError> {
    let secret = secret.trim();

    let bytes = if secret.starts_with('[') {
        serde_json::from_str::<Vec<u8>>(secret)
            .map_err(|e| ConfigError::InvalidSecretKey(e.to_string()))?
    } else {
        bs58::decode(secret)
            .into_vec()
            .map_err(|e| ConfigError::InvalidSecretKey(e.to_string()))?
    };

    Keypair::try_from(&bytes[..]).map_err(|e| ConfigError::InvalidSecretKey(e.to_string()))
}

/// Load a keypair from a Solana CLI JSON file, expanding `~`
fn load_keypair(path: &Path) -> Result<Keypair> {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());

    if !expanded.exists() {
        return Err(ConfigError::KeypairFile {
            path: expanded,
            reason: "file not found".to_string(),
        }
        .into());
    }

    let data = fs::read_to_string(&expanded)
        .with_context(|| format!("Failed to read keypair file: {}", expanded.display()))?;

    keypair_from_secret(&data).map_err(|e| {
        ConfigError::KeypairFile {
            path: expanded,
            reason: e.to_string(),
        }
        .into()
    })
}
