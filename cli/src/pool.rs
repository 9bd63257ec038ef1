//! Raydium AMM v4 pool key derivation

use anyhow::Result;
use solana_sdk::pubkey::Pubkey;

use crate::accounts::Token;
use crate::client::ChainClient;
use crate::config::ProgramIds;
use crate::error::WithdrawError;
use crate::market::{self, MarketAccount};

const AMM_AUTHORITY_SEED: &[u8] = b"amm authority";
const MARKET_AUTHORITY_NONCE_LIMIT: u64 = 100;

// Seeds the AMM program pairs with the market id for each associated account
const ID_SEED: &[u8] = b"amm_associated_seed";
const BASE_VAULT_SEED: &[u8] = b"coin_vault_associated_seed";
const QUOTE_VAULT_SEED: &[u8] = b"pc_vault_associated_seed";
const LP_MINT_SEED: &[u8] = b"lp_mint_associated_seed";
const LP_VAULT_SEED: &[u8] = b"temp_lp_token_associated_seed";
const TARGET_ORDERS_SEED: &[u8] = b"target_associated_seed";
const WITHDRAW_QUEUE_SEED: &[u8] = b"withdraw_associated_seed";
const OPEN_ORDERS_SEED: &[u8] = b"open_order_associated_seed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolKeys {
    pub id: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub lp_decimals: u8,
    pub version: u8,
    pub program_id: Pubkey,
    pub authority: Pubkey,
    pub nonce: u8,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub withdraw_queue: Pubkey,
    pub lp_vault: Pubkey,
    pub market_version: u8,
    pub market_program_id: Pubkey,
    pub market_id: Pubkey,
    pub market_authority: Pubkey,
    pub market_base_vault: Pubkey,
    pub market_quote_vault: Pubkey,
    pub market_bids: Pubkey,
    pub market_asks: Pubkey,
    pub market_event_queue: Pubkey,
}

fn associated_address(program_id: &Pubkey, market_id: &Pubkey, seed: &[u8]) -> Pubkey {
    Pubkey::find_program_address(&[program_id.as_ref(), market_id.as_ref(), seed], program_id).0
}

fn vault_signer(market_program: &Pubkey, market_id: &Pubkey, nonce: u64) -> Option<Pubkey> {
    Pubkey::create_program_address(&[market_id.as_ref(), &nonce.to_le_bytes()], market_program).ok()
}

/// Vault signer of an OpenBook market: first nonce below 100 that is off-curve
pub fn market_authority(market_program: &Pubkey, market_id: &Pubkey) -> Result<Pubkey, WithdrawError> {
    (0..MARKET_AUTHORITY_NONCE_LIMIT)
        .find_map(|nonce| vault_signer(market_program, market_id, nonce))
        .ok_or(WithdrawError::MarketAuthorityNotFound(*market_id))
}

impl PoolKeys {
    /// Every address derivable from the tokens, market id and program ids.
    /// Market vaults and queues are left default until [`PoolKeys::with_market`].
    pub fn associated(
        base: &Token,
        quote: &Token,
        market_id: &Pubkey,
        program_ids: &ProgramIds,
    ) -> Result<Self, WithdrawError> {
        let program_id = program_ids.amm_v4;
        let (authority, nonce) = Pubkey::find_program_address(&[AMM_AUTHORITY_SEED], &program_id);

        Ok(Self {
            id: associated_address(&program_id, market_id, ID_SEED),
            base_mint: base.mint,
            quote_mint: quote.mint,
            lp_mint: associated_address(&program_id, market_id, LP_MINT_SEED),
            base_decimals: base.decimals,
            quote_decimals: quote.decimals,
            lp_decimals: base.decimals,
            version: 4,
            program_id,
            authority,
            nonce,
            open_orders: associated_address(&program_id, market_id, OPEN_ORDERS_SEED),
            target_orders: associated_address(&program_id, market_id, TARGET_ORDERS_SEED),
            base_vault: associated_address(&program_id, market_id, BASE_VAULT_SEED),
            quote_vault: associated_address(&program_id, market_id, QUOTE_VAULT_SEED),
            withdraw_queue: associated_address(&program_id, market_id, WITHDRAW_QUEUE_SEED),
            lp_vault: associated_address(&program_id, market_id, LP_VAULT_SEED),
            market_version: 4,
            market_program_id: program_ids.openbook_market,
            market_id: *market_id,
            market_authority: market_authority(&program_ids.openbook_market, market_id)?,
            market_base_vault: Pubkey::default(),
            market_quote_vault: Pubkey::default(),
            market_bids: Pubkey::default(),
            market_asks: Pubkey::default(),
            market_event_queue: Pubkey::default(),
        })
    }

    /// Merge the decoded market. The nonce stored in the market wins over the scan.
    pub fn with_market(mut self, market: &MarketAccount) -> Self {
        let nonce = market.state.vault_signer_nonce();
        match vault_signer(&self.market_program_id, &market.address, nonce) {
            Some(authority) => self.market_authority = authority,
            None => log::warn!(
                "Market {} nonce {} gives no vault signer, keeping {}",
                market.address,
                nonce,
                self.market_authority
            ),
        }
        self.market_base_vault = market.state.base_vault();
        self.market_quote_vault = market.state.quote_vault();
        self.market_bids = market.state.bids();
        self.market_asks = market.state.asks();
        self.market_event_queue = market.state.event_queue();
        self
    }

    pub fn lp_token(&self) -> Token {
        Token::new(self.lp_mint, self.lp_decimals)
    }
}

/// What to do when more than one market lists the same mint pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSelection {
    /// Use exactly this market
    Pinned(Pubkey),
    /// Sort by address and take the first
    LowestAddress,
    /// Fail unless exactly one market exists
    RejectAmbiguous,
}

fn select_market(
    mut markets: Vec<MarketAccount>,
    base: &Token,
    quote: &Token,
    selection: MarketSelection,
) -> Result<Option<MarketAccount>, WithdrawError> {
    if let MarketSelection::Pinned(address) = selection {
        return Ok(markets.into_iter().find(|m| m.address == address));
    }

    if markets.len() > 1 {
        if selection == MarketSelection::RejectAmbiguous {
            return Err(WithdrawError::AmbiguousMarket {
                base: base.mint,
                quote: quote.mint,
                count: markets.len(),
            });
        }
        log::warn!(
            "{} markets found for {}/{}, using lowest address",
            markets.len(),
            base.mint,
            quote.mint
        );
    }

    markets.sort_by_key(|m| m.address);
    Ok(markets.into_iter().next())
}

/// Resolve the pool for (base, quote). `Ok(None)` means no market exists.
pub fn resolve_pool<C: ChainClient>(
    client: &C,
    base: &Token,
    quote: &Token,
    program_ids: &ProgramIds,
    selection: MarketSelection,
) -> Result<Option<PoolKeys>> {
    let markets = market::find_markets_by_mints(
        client,
        &base.mint,
        &quote.mint,
        &program_ids.openbook_market,
    )?;
    log::debug!("Found {} candidate markets", markets.len());

    let Some(market) = select_market(markets, base, quote, selection)? else {
        return Ok(None);
    };

    let keys = PoolKeys::associated(base, quote, &market.address, program_ids)?.with_market(&market);
    Ok(Some(keys))
}
