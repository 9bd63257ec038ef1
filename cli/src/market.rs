//! OpenBook (Serum v3) market accounts

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::pubkey::Pubkey;
use std::mem::{offset_of, size_of};

use crate::client::ChainClient;
use crate::error::WithdrawError;

/// On-chain layout of a v3 market. Every field is byte-aligned so the struct
/// has no padding and maps 1:1 onto the 388 account bytes.
#[repr(C)]
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MarketStateV3 {
    pub head_padding: [u8; 5],
    pub account_flags: [u8; 8],
    pub own_address: [u8; 32],
    pub vault_signer_nonce: [u8; 8],
    pub base_mint: [u8; 32],
    pub quote_mint: [u8; 32],
    pub base_vault: [u8; 32],
    pub base_deposits_total: [u8; 8],
    pub base_fees_accrued: [u8; 8],
    pub quote_vault: [u8; 32],
    pub quote_deposits_total: [u8; 8],
    pub quote_fees_accrued: [u8; 8],
    pub quote_dust_threshold: [u8; 8],
    pub request_queue: [u8; 32],
    pub event_queue: [u8; 32],
    pub bids: [u8; 32],
    pub asks: [u8; 32],
    pub base_lot_size: [u8; 8],
    pub quote_lot_size: [u8; 8],
    pub fee_rate_bps: [u8; 8],
    pub referrer_rebates_accrued: [u8; 8],
    pub tail_padding: [u8; 7],
}

impl MarketStateV3 {
    pub const LEN: usize = size_of::<Self>();
    pub const BASE_MINT_OFFSET: usize = offset_of!(MarketStateV3, base_mint);
    pub const QUOTE_MINT_OFFSET: usize = offset_of!(MarketStateV3, quote_mint);

    pub fn decode(address: &Pubkey, data: &[u8]) -> Result<Self, WithdrawError> {
        bytemuck::try_pod_read_unaligned::<Self>(data).map_err(|e| {
            WithdrawError::InvalidMarketData {
                address: *address,
                reason: format!("{:?} (got {} bytes, want {})", e, data.len(), Self::LEN),
            }
        })
    }

    pub fn own_address(&self) -> Pubkey {
        Pubkey::new_from_array(self.own_address)
    }

    pub fn base_mint(&self) -> Pubkey {
        Pubkey::new_from_array(self.base_mint)
    }

    pub fn quote_mint(&self) -> Pubkey {
        Pubkey::new_from_array(self.quote_mint)
    }

    pub fn base_vault(&self) -> Pubkey {
        Pubkey::new_from_array(self.base_vault)
    }

    pub fn quote_vault(&self) -> Pubkey {
        Pubkey::new_from_array(self.quote_vault)
    }

    pub fn event_queue(&self) -> Pubkey {
        Pubkey::new_from_array(self.event_queue)
    }

    pub fn bids(&self) -> Pubkey {
        Pubkey::new_from_array(self.bids)
    }

    pub fn asks(&self) -> Pubkey {
        Pubkey::new_from_array(self.asks)
    }

    pub fn vault_signer_nonce(&self) -> u64 {
        u64::from_le_bytes(self.vault_signer_nonce)
    }

    pub fn base_lot_size(&self) -> u64 {
        u64::from_le_bytes(self.base_lot_size)
    }

    pub fn quote_lot_size(&self) -> u64 {
        u64::from_le_bytes(self.quote_lot_size)
    }
}

/// A market account matched by mint pair
#[derive(Debug, Clone)]
pub struct MarketAccount {
    pub address: Pubkey,
    pub state: MarketStateV3,
}

pub fn market_filters(base_mint: &Pubkey, quote_mint: &Pubkey) -> Vec<RpcFilterType> {
    vec![
        RpcFilterType::DataSize(MarketStateV3::LEN as u64),
        RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
            MarketStateV3::BASE_MINT_OFFSET,
            base_mint.to_bytes().to_vec(),
        )),
        RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
            MarketStateV3::QUOTE_MINT_OFFSET,
            quote_mint.to_bytes().to_vec(),
        )),
    ]
}

/// Markets for (base, quote) under `market_program`.
///
/// The node applies the mint filters, but the decoded mints are checked again
/// so a lenient RPC cannot hand back an unrelated market.
pub fn find_markets_by_mints<C: ChainClient>(
    client: &C,
    base_mint: &Pubkey,
    quote_mint: &Pubkey,
    market_program: &Pubkey,
) -> Result<Vec<MarketAccount>> {
    let accounts =
        client.fetch_program_accounts(market_program, market_filters(base_mint, quote_mint))?;

    let mut markets = Vec::with_capacity(accounts.len());
    for (address, account) in accounts {
        let state = MarketStateV3::decode(&address, &account.data)?;
        if state.base_mint() != *base_mint || state.quote_mint() != *quote_mint {
            log::debug!("Skipping market {} with mismatched mints", address);
            continue;
        }
        if state.own_address() != address {
            log::debug!("Skipping market {} whose header names {}", address, state.own_address());
            continue;
        }
        log::debug!(
            "Market {}: lot sizes {}/{}, vault signer nonce {}",
            address,
            state.base_lot_size(),
            state.quote_lot_size(),
            state.vault_signer_nonce()
        );
        markets.push(MarketAccount { address, state });
    }

    Ok(markets)
}
