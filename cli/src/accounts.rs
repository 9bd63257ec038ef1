//! Wallet token accounts and mint metadata

use anyhow::{Context, Result};
use solana_sdk::{program_pack::Pack, pubkey::Pubkey};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_token::state::{Account as TokenAccount, Mint};

use crate::client::ChainClient;
use crate::error::WithdrawError;

pub const WSOL_MINT: Pubkey = spl_token::native_mint::ID;

/// A token as the pool sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub program_id: Pubkey,
    pub mint: Pubkey,
    pub decimals: u8,
    pub symbol: Option<String>,
}

impl Token {
    pub fn new(mint: Pubkey, decimals: u8) -> Self {
        Self {
            program_id: spl_token::ID,
            mint,
            decimals,
            symbol: None,
        }
    }

    /// The quote side of every pool this tool touches
    pub fn wsol() -> Self {
        Self {
            program_id: spl_token::ID,
            mint: WSOL_MINT,
            decimals: spl_token::native_mint::DECIMALS,
            symbol: Some("WSOL".to_string()),
        }
    }

    pub fn is_wsol(&self) -> bool {
        self.mint == WSOL_MINT
    }

    pub fn associated_address(&self, owner: &Pubkey) -> Pubkey {
        get_associated_token_address_with_program_id(owner, &self.mint, &self.program_id)
    }
}

/// Raw amount in the token's own smallest unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAmount {
    pub token: Token,
    pub raw: u64,
}

impl TokenAmount {
    pub fn new(token: Token, raw: u64) -> Self {
        Self { token, raw }
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Decimal rendering, e.g. `12.500000` for 12_500_000 at 6 decimals
    pub fn to_ui_string(&self) -> String {
        let decimals = self.token.decimals as usize;
        if decimals == 0 {
            return self.raw.to_string();
        }
        // Works on digits: any u8 decimals is a valid mint
        let digits = format!("{:0>width$}", self.raw, width = decimals + 1);
        let (whole, fraction) = digits.split_at(digits.len() - decimals);
        format!("{}.{}", whole, fraction)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletTokenAccount {
    pub pubkey: Pubkey,
    pub program_id: Pubkey,
    pub account_info: TokenAccount,
}

/// Every SPL token account owned by `wallet`, in whatever order the node returns
pub fn list_token_accounts<C: ChainClient>(
    client: &C,
    wallet: &Pubkey,
) -> Result<Vec<WalletTokenAccount>> {
    let raw = client.fetch_token_accounts_by_owner(wallet, &spl_token::ID)?;

    raw.into_iter()
        .map(|(pubkey, account)| {
            let account_info = TokenAccount::unpack(&account.data)
                .with_context(|| format!("Failed to decode token account: {}", pubkey))?;
            Ok(WalletTokenAccount {
                pubkey,
                program_id: account.owner,
                account_info,
            })
        })
        .collect()
}

/// Read a mint's decimals from chain
pub fn fetch_token<C: ChainClient>(client: &C, mint: &Pubkey) -> Result<Token> {
    let account = client
        .fetch_account(mint)?
        .with_context(|| format!("Mint account not found: {}", mint))?;

    if account.owner != spl_token::ID {
        return Err(WithdrawError::InvalidMintOwner {
            mint: *mint,
            owner: account.owner,
        }
        .into());
    }

    let info = Mint::unpack(&account.data)
        .with_context(|| format!("Failed to decode mint: {}", mint))?;

    Ok(Token::new(*mint, info.decimals))
}

/// Prefer the associated account, then any account holding the token
pub fn select_token_account<'a>(
    accounts: &'a [WalletTokenAccount],
    owner: &Pubkey,
    token: &Token,
) -> Option<&'a WalletTokenAccount> {
    let ata = token.associated_address(owner);
    accounts.iter().find(|a| a.pubkey == ata).or_else(|| {
        accounts
            .iter()
            .find(|a| a.program_id == token.program_id && a.account_info.mint == token.mint)
    })
}

/// LP balance held in the owner's associated LP account; zero if it does not exist
pub fn lp_balance(accounts: &[WalletTokenAccount], owner: &Pubkey, lp_token: &Token) -> u64 {
    let ata = lp_token.associated_address(owner);
    accounts
        .iter()
        .find(|a| a.pubkey == ata)
        .map(|a| a.account_info.amount)
        .unwrap_or(0)
}
