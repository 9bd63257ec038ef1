//! Solana RPC access behind a small trait, plus display helpers

use anyhow::{Context, Result};
use colored::Colorize;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::RpcFilterType,
    rpc_request::RpcRequest,
    rpc_response::{Response, RpcKeyedAccount},
};
use solana_sdk::{
    account::Account,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, VersionedTransaction},
};
use std::str::FromStr;

use crate::config::{Network, NetworkConfig};

/// A transaction that carries every required signature
#[derive(Debug, Clone)]
pub enum SignedTransaction {
    Legacy(Transaction),
    Versioned(VersionedTransaction),
}

impl SignedTransaction {
    pub fn signature(&self) -> Signature {
        let signatures = match self {
            SignedTransaction::Legacy(tx) => &tx.signatures,
            SignedTransaction::Versioned(tx) => &tx.signatures,
        };
        signatures.first().copied().unwrap_or_default()
    }
}

/// The RPC calls the withdrawal workflow makes, in the order it makes them.
pub trait ChainClient {
    /// `None` when the account does not exist
    fn fetch_account(&self, address: &Pubkey) -> Result<Option<Account>>;

    fn fetch_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        token_program: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>>;

    fn fetch_program_accounts(
        &self,
        program: &Pubkey,
        filters: Vec<RpcFilterType>,
    ) -> Result<Vec<(Pubkey, Account)>>;

    fn rent_exempt_minimum(&self, data_len: usize) -> Result<u64>;

    fn latest_blockhash(&self) -> Result<Hash>;

    fn send_transaction(&self, transaction: &SignedTransaction) -> Result<Signature>;

    /// Blocks until `signature` reaches the client's commitment or fails
    fn confirm_signature(&self, signature: &Signature, blockhash: &Hash) -> Result<()>;
}

/// Create an RPC client from the network configuration
pub fn create_rpc_client(config: &NetworkConfig) -> RpcClient {
    RpcClient::new_with_commitment(config.rpc_url.clone(), config.commitment)
}

impl ChainClient for RpcClient {
    fn fetch_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let response = self
            .get_account_with_commitment(address, self.commitment())
            .with_context(|| format!("Failed to get account: {}", address))?;
        Ok(response.value)
    }

    fn fetch_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        token_program: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>> {
        // The typed helper asks for jsonParsed; raw bytes are needed for unpacking
        let params = serde_json::json!([
            owner.to_string(),
            { "programId": token_program.to_string() },
            {
                "encoding": UiAccountEncoding::Base64,
                "commitment": self.commitment().commitment,
            },
        ]);

        let response: Response<Vec<RpcKeyedAccount>> = self
            .send(RpcRequest::GetTokenAccountsByOwner, params)
            .with_context(|| format!("Failed to get token accounts for: {}", owner))?;

        response
            .value
            .into_iter()
            .map(|keyed| {
                let address = Pubkey::from_str(&keyed.pubkey)
                    .with_context(|| format!("Invalid token account address: {}", keyed.pubkey))?;
                let account = keyed
                    .account
                    .decode::<Account>()
                    .with_context(|| format!("Failed to decode token account: {}", address))?;
                Ok((address, account))
            })
            .collect()
    }

    fn fetch_program_accounts(
        &self,
        program: &Pubkey,
        filters: Vec<RpcFilterType>,
    ) -> Result<Vec<(Pubkey, Account)>> {
        let config = RpcProgramAccountsConfig {
            filters: Some(filters),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.commitment()),
                ..Default::default()
            },
            ..Default::default()
        };

        self.get_program_accounts_with_config(program, config)
            .with_context(|| format!("Failed to get program accounts for: {}", program))
    }

    fn rent_exempt_minimum(&self, data_len: usize) -> Result<u64> {
        self.get_minimum_balance_for_rent_exemption(data_len)
            .context("Failed to get rent exemption minimum")
    }

    fn latest_blockhash(&self) -> Result<Hash> {
        self.get_latest_blockhash()
            .context("Failed to get recent blockhash")
    }

    fn send_transaction(&self, transaction: &SignedTransaction) -> Result<Signature> {
        let result = match transaction {
            SignedTransaction::Legacy(tx) => self.send_transaction(tx),
            SignedTransaction::Versioned(tx) => self.send_transaction(tx),
        };
        result.context("Failed to send transaction")
    }

    fn confirm_signature(&self, signature: &Signature, blockhash: &Hash) -> Result<()> {
        self.confirm_transaction_with_spinner(signature, blockhash, self.commitment())
            .with_context(|| format!("Failed to confirm transaction: {}", signature))
    }
}

/// Pretty print a signature as a shortened explorer link
pub fn format_signature(signature: &Signature, network: Network) -> String {
    let sig_str = signature.to_string();
    let short = format!("{}...{}", &sig_str[0..8], &sig_str[sig_str.len() - 8..]);

    let explorer_url = match network {
        Network::Mainnet => format!("https://explorer.solana.com/tx/{}", sig_str),
        Network::Devnet => format!("https://explorer.solana.com/tx/{}?cluster={}", sig_str, network.cluster()),
    };

    format!("{} ({})", short.bright_blue(), explorer_url.dimmed())
}

/// Pretty print a pubkey as shortened address
pub fn format_pubkey(pubkey: &Pubkey) -> String {
    let addr = pubkey.to_string();
    format!("{}...{}", &addr[0..8], &addr[addr.len() - 8..]).bright_yellow().to_string()
}
