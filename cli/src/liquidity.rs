//! Liquidity provider operations

use anyhow::Result;
use colored::Colorize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    program_pack::Pack,
    pubkey::Pubkey,
    signature::Signature,
};
#[allow(deprecated)]
use solana_sdk::system_instruction;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use spl_token::state::Account as TokenAccount;

use crate::accounts::{self, Token, TokenAmount, WalletTokenAccount};
use crate::client::{self, ChainClient};
use crate::config::{NetworkConfig, TxVersion};
use crate::error::WithdrawError;
use crate::pool::{self, MarketSelection, PoolKeys};
use crate::transaction::{self, InnerTransaction, UnsignedTransaction};

/// AMM v4 instruction discriminator for `Withdraw`
pub const WITHDRAW_TAG: u8 = 4;

/// Seeds may be at most 32 bytes, and a base58 pubkey is 43 or 44
const TEMP_WSOL_SEED_LEN: usize = 32;

pub struct UserKeys<'a> {
    pub owner: Pubkey,
    pub payer: Pubkey,
    pub token_accounts: &'a [WalletTokenAccount],
}

/// Encode the AMM v4 `Withdraw` instruction
pub fn withdraw_instruction(
    keys: &PoolKeys,
    user_lp: &Pubkey,
    user_base: &Pubkey,
    user_quote: &Pubkey,
    owner: &Pubkey,
    amount: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(9);
    data.push(WITHDRAW_TAG);
    data.extend_from_slice(&amount.to_le_bytes());

    Instruction {
        program_id: keys.program_id,
        accounts: vec![
            AccountMeta::new_readonly(spl_token::ID, false),
            AccountMeta::new(keys.id, false),
            AccountMeta::new_readonly(keys.authority, false),
            AccountMeta::new(keys.open_orders, false),
            AccountMeta::new(keys.target_orders, false),
            AccountMeta::new(keys.lp_mint, false),
            AccountMeta::new(keys.base_vault, false),
            AccountMeta::new(keys.quote_vault, false),
            AccountMeta::new(keys.withdraw_queue, false),
            AccountMeta::new(keys.lp_vault, false),
            AccountMeta::new_readonly(keys.market_program_id, false),
            AccountMeta::new(keys.market_id, false),
            AccountMeta::new(keys.market_base_vault, false),
            AccountMeta::new(keys.market_quote_vault, false),
            AccountMeta::new_readonly(keys.market_authority, false),
            AccountMeta::new(*user_lp, false),
            AccountMeta::new(*user_base, false),
            AccountMeta::new(*user_quote, false),
            AccountMeta::new_readonly(*owner, true),
            AccountMeta::new(keys.market_event_queue, false),
            AccountMeta::new(keys.market_bids, false),
            AccountMeta::new(keys.market_asks, false),
        ],
        data,
    }
}

/// Where a withdrawn token lands, plus what must run around the withdraw
struct Destination {
    address: Pubkey,
    setup: Vec<Instruction>,
    teardown: Vec<Instruction>,
}

#[allow(deprecated)]
fn destination_for(
    token: &Token,
    pool_id: &Pubkey,
    user: &UserKeys<'_>,
    wsol_rent: u64,
) -> Result<Destination> {
    if token.is_wsol() {
        // Temporary account, closed after the withdraw so SOL arrives unwrapped
        let pool_id = pool_id.to_string();
        let seed = &pool_id[..TEMP_WSOL_SEED_LEN];
        let address = Pubkey::create_with_seed(&user.owner, seed, &token.program_id)?;

        let setup = vec![
            system_instruction::create_account_with_seed(
                &user.payer,
                &address,
                &user.owner,
                seed,
                wsol_rent,
                TokenAccount::LEN as u64,
                &token.program_id,
            ),
            spl_token::instruction::initialize_account(
                &token.program_id,
                &address,
                &token.mint,
                &user.owner,
            )?,
        ];
        let teardown = vec![spl_token::instruction::close_account(
            &token.program_id,
            &address,
            &user.owner,
            &user.owner,
            &[],
        )?];

        return Ok(Destination {
            address,
            setup,
            teardown,
        });
    }

    if let Some(existing) = accounts::select_token_account(user.token_accounts, &user.owner, token) {
        return Ok(Destination {
            address: existing.pubkey,
            setup: vec![],
            teardown: vec![],
        });
    }

    Ok(Destination {
        address: token.associated_address(&user.owner),
        setup: vec![create_associated_token_account_idempotent(
            &user.payer,
            &user.owner,
            &token.mint,
            &token.program_id,
        )],
        teardown: vec![],
    })
}

/// Instruction groups that burn `amount_in` LP tokens for the pool's base and quote.
///
/// Pure: identical inputs give identical instructions.
pub fn make_remove_liquidity_instructions(
    keys: &PoolKeys,
    user: &UserKeys<'_>,
    amount_in: &TokenAmount,
    wsol_rent: u64,
) -> Result<Vec<InnerTransaction>> {
    if amount_in.is_zero() {
        return Err(WithdrawError::NothingToRemove { lp_mint: keys.lp_mint }.into());
    }

    let lp_account = accounts::select_token_account(user.token_accounts, &user.owner, &amount_in.token)
        .ok_or(WithdrawError::LpAccountMissing(keys.lp_mint))?;

    let base = Token::new(keys.base_mint, keys.base_decimals);
    let quote = Token::new(keys.quote_mint, keys.quote_decimals);
    let base_dest = destination_for(&base, &keys.id, user, wsol_rent)?;
    let quote_dest = destination_for(&quote, &keys.id, user, wsol_rent)?;

    let mut instructions = Vec::new();
    instructions.extend(base_dest.setup);
    instructions.extend(quote_dest.setup);
    instructions.push(withdraw_instruction(
        keys,
        &lp_account.pubkey,
        &base_dest.address,
        &quote_dest.address,
        &user.owner,
        amount_in.raw,
    ));
    instructions.extend(base_dest.teardown);
    instructions.extend(quote_dest.teardown);

    Ok(vec![InnerTransaction {
        label: "remove liquidity",
        instructions,
    }])
}

pub struct RemoveLiquidityOptions {
    pub mint: Pubkey,
    pub selection: MarketSelection,
    /// Raw LP amount; the whole balance when `None`
    pub amount: Option<u64>,
    pub priority_fee: Option<u64>,
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum RemovalOutcome {
    Removed {
        lp_amount: TokenAmount,
        signatures: Vec<Signature>,
    },
    MarketNotFound,
    NothingToRemove {
        lp_mint: Pubkey,
    },
    DryRun {
        lp_amount: TokenAmount,
        transactions: Vec<UnsignedTransaction>,
    },
}

pub async fn remove_liquidity<C: ChainClient>(
    config: &NetworkConfig,
    client: &C,
    options: &RemoveLiquidityOptions,
) -> Result<RemovalOutcome> {
    println!("{}", "=== Remove Liquidity ===".bright_green().bold());
    println!("{} {}", "Mint:".bright_cyan(), options.mint);

    let base = accounts::fetch_token(client, &options.mint)?;
    let quote = Token::wsol();
    println!(
        "{} {} decimals, quote {}",
        "Base:".bright_cyan(),
        base.decimals,
        quote.symbol.as_deref().unwrap_or("WSOL")
    );

    let Some(keys) = pool::resolve_pool(client, &base, &quote, &config.program_ids, options.selection)? else {
        println!("{}", "Not found market info".red());
        return Ok(RemovalOutcome::MarketNotFound);
    };
    println!("{} {}", "Market:".bright_cyan(), keys.market_id);
    println!("{} {}", "Pool:".bright_cyan(), client::format_pubkey(&keys.id));
    log::debug!(
        "Pool v{} on market v{}, authority {} (nonce {})",
        keys.version,
        keys.market_version,
        keys.authority,
        keys.nonce
    );
    log::debug!("Pool keys: {:?}", keys);

    let owner = config.pubkey();
    let wallet_accounts = accounts::list_token_accounts(client, &owner)?;
    log::debug!("Wallet holds {} token accounts", wallet_accounts.len());

    let lp_token = keys.lp_token();
    let balance = accounts::lp_balance(&wallet_accounts, &owner, &lp_token);
    println!(
        "{} {}",
        "LP Amount:".bright_green(),
        TokenAmount::new(lp_token.clone(), balance).to_ui_string()
    );

    let requested = options.amount.unwrap_or(balance);
    if requested > balance {
        return Err(WithdrawError::AmountExceedsBalance { requested, balance }.into());
    }
    if requested == 0 {
        println!("{}", "Nothing to remove".yellow());
        return Ok(RemovalOutcome::NothingToRemove { lp_mint: keys.lp_mint });
    }
    let amount_in = TokenAmount::new(lp_token, requested);

    let user = UserKeys {
        owner,
        payer: owner,
        token_accounts: &wallet_accounts,
    };
    let wsol_rent = client.rent_exempt_minimum(TokenAccount::LEN)?;
    let inner = make_remove_liquidity_instructions(&keys, &user, &amount_in, wsol_rent)?;

    let lookup_tables = match (config.tx_version, config.lookup_table) {
        (TxVersion::V0, Some(address)) => vec![transaction::fetch_lookup_table(client, &address)?],
        _ => vec![],
    };
    let blockhash = client.latest_blockhash()?;
    let transactions = transaction::build_transactions(
        &user.payer,
        &inner,
        config.tx_version,
        &lookup_tables,
        options.priority_fee,
        blockhash,
    )?;

    if options.dry_run {
        println!(
            "{} {} transaction(s) built, not sent",
            "Dry run:".yellow(),
            transactions.len()
        );
        return Ok(RemovalOutcome::DryRun {
            lp_amount: amount_in,
            transactions,
        });
    }

    let signatures = transaction::submit_all(client, &config.keypair, transactions)?;
    for signature in &signatures {
        println!(
            "{} {}",
            "Signature:".bright_cyan(),
            client::format_signature(signature, config.network)
        );
    }

    Ok(RemovalOutcome::Removed {
        lp_amount: amount_in,
        signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::fixtures::{mint_account, token_account};
    use crate::client::{mock::MockChain, SignedTransaction};
    use crate::config::{Network, ProgramIds};
    use crate::error::{SubmitError, SubmitStage};
    use crate::market::fixtures::MarketFixture;
    use crate::transaction::fixtures::lookup_table_account;
    use spl_associated_token_account::get_associated_token_address;
    use solana_sdk::{
        commitment_config::CommitmentConfig,
        hash::Hash,
        signature::{Keypair, Signer},
    };

    const BASE_DECIMALS: u8 = 6;

    struct Scenario {
        config: NetworkConfig,
        chain: MockChain,
        base_mint: Pubkey,
        keys: PoolKeys,
    }

    fn scenario(lp_balance: Option<u64>) -> Scenario {
        let keypair = Keypair::new();
        let owner = keypair.pubkey();
        let config = NetworkConfig {
            network: Network::Devnet,
            rpc_url: "http://127.0.0.1:8899".to_string(),
            keypair,
            program_ids: ProgramIds::DEVNET,
            lookup_table: None,
            tx_version: TxVersion::V0,
            commitment: CommitmentConfig::confirmed(),
        };

        let base_mint = Pubkey::new_unique();
        let base = Token::new(base_mint, BASE_DECIMALS);
        let fixture = MarketFixture::new(&base_mint, &accounts::WSOL_MINT);
        let keys = PoolKeys::associated(&base, &Token::wsol(), &fixture.address, &config.program_ids)
            .unwrap();

        let mut chain = MockChain {
            rent: 2_039_280,
            program_accounts: vec![(fixture.address, fixture.account(&config.program_ids.openbook_market))],
            ..Default::default()
        };
        chain.accounts.insert(base_mint, mint_account(BASE_DECIMALS));
        if let Some(amount) = lp_balance {
            chain.token_accounts.push((
                get_associated_token_address(&owner, &keys.lp_mint),
                token_account(&keys.lp_mint, &owner, amount),
            ));
        }

        Scenario {
            config,
            chain,
            base_mint,
            keys: keys.with_market(&fixture_market(&fixture)),
        }
    }

    fn fixture_market(fixture: &MarketFixture) -> crate::market::MarketAccount {
        crate::market::MarketAccount {
            address: fixture.address,
            state: fixture.state,
        }
    }

    fn options(mint: Pubkey) -> RemoveLiquidityOptions {
        RemoveLiquidityOptions {
            mint,
            selection: MarketSelection::LowestAddress,
            amount: None,
            priority_fee: None,
            dry_run: false,
        }
    }

    fn wallet(owner: &Pubkey, lp_mint: &Pubkey, amount: u64) -> Vec<WalletTokenAccount> {
        let account = token_account(lp_mint, owner, amount);
        vec![WalletTokenAccount {
            pubkey: get_associated_token_address(owner, lp_mint),
            program_id: spl_token::ID,
            account_info: TokenAccount::unpack(&account.data).unwrap(),
        }]
    }

    #[test]
    fn test_withdraw_instruction_layout() {
        let s = scenario(None);
        let owner = Pubkey::new_unique();
        let (lp, base, quote) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let ix = withdraw_instruction(&s.keys, &lp, &base, &quote, &owner, 1_234);

        assert_eq!(ix.program_id, s.keys.program_id);
        assert_eq!(ix.data[0], WITHDRAW_TAG);
        assert_eq!(u64::from_le_bytes(ix.data[1..9].try_into().unwrap()), 1_234);
        assert_eq!(ix.accounts.len(), 22);
        assert_eq!(ix.accounts[0].pubkey, spl_token::ID);
        assert_eq!(ix.accounts[1].pubkey, s.keys.id);
        assert_eq!(ix.accounts[14].pubkey, s.keys.market_authority);
        assert_eq!(ix.accounts[15].pubkey, lp);
        assert_eq!(ix.accounts[16].pubkey, base);
        assert_eq!(ix.accounts[17].pubkey, quote);
        assert!(ix.accounts[18].is_signer);
        assert_eq!(ix.accounts[18].pubkey, owner);
        assert_eq!(ix.accounts[19].pubkey, s.keys.market_event_queue);
        assert_eq!(ix.accounts[21].pubkey, s.keys.market_asks);
        assert_eq!(ix.accounts.iter().filter(|m| m.is_signer).count(), 1);
    }

    #[test]
    fn test_instructions_wrap_temp_wsol_account() {
        let s = scenario(None);
        let owner = Pubkey::new_unique();
        let accounts = wallet(&owner, &s.keys.lp_mint, 500);
        let user = UserKeys {
            owner,
            payer: owner,
            token_accounts: &accounts,
        };
        let amount = TokenAmount::new(s.keys.lp_token(), 500);

        let inner = make_remove_liquidity_instructions(&s.keys, &user, &amount, 2_039_280).unwrap();
        assert_eq!(inner.len(), 1);
        let ixs = &inner[0].instructions;

        // base ATA create, WSOL create + init, withdraw, WSOL close
        assert_eq!(ixs.len(), 5);
        assert_eq!(ixs[0].program_id, spl_associated_token_account::ID);
        assert_eq!(ixs[1].program_id, system_instruction::create_account(&owner, &owner, 0, 0, &owner).program_id);
        assert_eq!(ixs[2].program_id, spl_token::ID);
        assert_eq!(ixs[3].program_id, s.keys.program_id);
        assert_eq!(ixs[4].program_id, spl_token::ID);

        let seed = &s.keys.id.to_string()[..32];
        let temp = Pubkey::create_with_seed(&owner, seed, &spl_token::ID).unwrap();
        assert_eq!(ixs[3].accounts[16].pubkey, get_associated_token_address(&owner, &s.base_mint));
        assert_eq!(ixs[3].accounts[17].pubkey, temp);
        assert_eq!(ixs[4].accounts[0].pubkey, temp);
    }

    #[test]
    fn test_existing_base_account_reused() {
        let s = scenario(None);
        let owner = Pubkey::new_unique();
        let mut accounts = wallet(&owner, &s.keys.lp_mint, 10);
        let base_account = Pubkey::new_unique();
        accounts.push(WalletTokenAccount {
            pubkey: base_account,
            program_id: spl_token::ID,
            account_info: TokenAccount::unpack(&token_account(&s.base_mint, &owner, 0).data).unwrap(),
        });
        let user = UserKeys {
            owner,
            payer: owner,
            token_accounts: &accounts,
        };

        let inner = make_remove_liquidity_instructions(
            &s.keys,
            &user,
            &TokenAmount::new(s.keys.lp_token(), 10),
            1,
        )
        .unwrap();
        let ixs = &inner[0].instructions;
        assert_eq!(ixs.len(), 4);
        assert_eq!(ixs[2].accounts[16].pubkey, base_account);
    }

    #[test]
    fn test_builder_is_pure() {
        let s = scenario(None);
        let owner = Pubkey::new_unique();
        let accounts = wallet(&owner, &s.keys.lp_mint, 77);
        let user = UserKeys {
            owner,
            payer: owner,
            token_accounts: &accounts,
        };
        let amount = TokenAmount::new(s.keys.lp_token(), 77);

        let first = make_remove_liquidity_instructions(&s.keys, &user, &amount, 5).unwrap();
        let second = make_remove_liquidity_instructions(&s.keys, &user, &amount, 5).unwrap();
        assert_eq!(first, second);

        let blockhash = Hash::new_unique();
        let a = transaction::build_transactions(&owner, &first, TxVersion::V0, &[], None, blockhash).unwrap();
        let b = transaction::build_transactions(&owner, &second, TxVersion::V0, &[], None, blockhash).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_amount_rejected_by_builder() {
        let s = scenario(None);
        let owner = Pubkey::new_unique();
        let accounts = wallet(&owner, &s.keys.lp_mint, 0);
        let user = UserKeys {
            owner,
            payer: owner,
            token_accounts: &accounts,
        };

        let err = make_remove_liquidity_instructions(&s.keys, &user, &TokenAmount::new(s.keys.lp_token(), 0), 5)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WithdrawError>(),
            Some(WithdrawError::NothingToRemove { .. })
        ));
    }

    #[test]
    fn test_missing_lp_account_rejected() {
        let s = scenario(None);
        let owner = Pubkey::new_unique();
        let user = UserKeys {
            owner,
            payer: owner,
            token_accounts: &[],
        };

        let err = make_remove_liquidity_instructions(&s.keys, &user, &TokenAmount::new(s.keys.lp_token(), 1), 5)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WithdrawError>(),
            Some(WithdrawError::LpAccountMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_full_removal_sends_one_transaction() {
        let s = scenario(Some(1_000_000));
        let outcome = remove_liquidity(&s.config, &s.chain, &options(s.base_mint)).await.unwrap();

        let RemovalOutcome::Removed { lp_amount, signatures } = outcome else {
            panic!("expected removal, got {:?}", outcome);
        };
        assert_eq!(lp_amount.raw, 1_000_000);
        assert_eq!(signatures.len(), 1);
        assert_eq!(s.chain.sent_count(), 1);
        assert_eq!(*s.chain.confirmed.borrow(), signatures);

        let sent = s.chain.sent.borrow();
        let SignedTransaction::Versioned(tx) = &sent[0] else {
            panic!("expected versioned transaction");
        };
        assert!(tx.verify_with_results().iter().all(|ok| *ok));

        let keys = tx.message.static_account_keys();
        let withdraw = tx
            .message
            .instructions()
            .iter()
            .find(|ix| keys[ix.program_id_index as usize] == s.keys.program_id)
            .unwrap();
        assert_eq!(withdraw.data[0], WITHDRAW_TAG);
        assert_eq!(u64::from_le_bytes(withdraw.data[1..9].try_into().unwrap()), 1_000_000);
    }

    #[tokio::test]
    async fn test_zero_balance_moves_nothing() {
        let s = scenario(Some(0));
        let outcome = remove_liquidity(&s.config, &s.chain, &options(s.base_mint)).await.unwrap();

        assert!(matches!(outcome, RemovalOutcome::NothingToRemove { lp_mint } if lp_mint == s.keys.lp_mint));
        assert_eq!(*s.chain.send_attempts.borrow(), 0);
    }

    #[tokio::test]
    async fn test_missing_lp_account_is_zero_balance() {
        let s = scenario(None);
        let outcome = remove_liquidity(&s.config, &s.chain, &options(s.base_mint)).await.unwrap();

        assert!(matches!(outcome, RemovalOutcome::NothingToRemove { .. }));
        assert_eq!(*s.chain.send_attempts.borrow(), 0);
    }

    #[tokio::test]
    async fn test_market_not_found_submits_nothing() {
        let mut s = scenario(Some(1_000));
        s.chain.program_accounts.clear();

        let outcome = remove_liquidity(&s.config, &s.chain, &options(s.base_mint)).await.unwrap();
        assert!(matches!(outcome, RemovalOutcome::MarketNotFound));
        assert_eq!(*s.chain.send_attempts.borrow(), 0);
    }

    #[tokio::test]
    async fn test_partial_amount_and_overdraw() {
        let s = scenario(Some(1_000));
        let mut opts = options(s.base_mint);
        opts.amount = Some(400);
        opts.dry_run = true;

        let outcome = remove_liquidity(&s.config, &s.chain, &opts).await.unwrap();
        let RemovalOutcome::DryRun { lp_amount, transactions } = outcome else {
            panic!("expected dry run, got {:?}", outcome);
        };
        assert_eq!(lp_amount.raw, 400);
        assert_eq!(transactions.len(), 1);
        assert_eq!(*s.chain.send_attempts.borrow(), 0);

        opts.amount = Some(1_001);
        let err = remove_liquidity(&s.config, &s.chain, &opts).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WithdrawError>(),
            Some(WithdrawError::AmountExceedsBalance { requested: 1_001, balance: 1_000 })
        ));
    }

    #[tokio::test]
    async fn test_mainnet_v0_uses_lookup_table() {
        let mut s = scenario(Some(1_000));
        let table = Pubkey::new_unique();
        s.config.lookup_table = Some(table);
        s.chain.accounts.insert(
            table,
            lookup_table_account(&[s.keys.market_bids, s.keys.market_asks, s.keys.market_event_queue]),
        );

        let outcome = remove_liquidity(&s.config, &s.chain, &options(s.base_mint)).await.unwrap();
        assert!(matches!(outcome, RemovalOutcome::Removed { .. }));
        assert!(s.chain.fetched.borrow().contains(&table));

        let sent = s.chain.sent.borrow();
        let SignedTransaction::Versioned(tx) = &sent[0] else {
            panic!("expected versioned transaction");
        };
        let lookups = tx.message.address_table_lookups().unwrap();
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].account_key, table);
        assert_eq!(lookups[0].writable_indexes.len(), 3);
        assert!(!tx.message.static_account_keys().contains(&s.keys.market_bids));
    }

    #[tokio::test]
    async fn test_legacy_never_fetches_lookup_table() {
        let mut s = scenario(Some(1_000));
        let table = Pubkey::new_unique();
        s.config.lookup_table = Some(table);
        s.config.tx_version = TxVersion::Legacy;

        let outcome = remove_liquidity(&s.config, &s.chain, &options(s.base_mint)).await.unwrap();
        assert!(matches!(outcome, RemovalOutcome::Removed { .. }));
        assert!(!s.chain.fetched.borrow().contains(&table));
        assert!(matches!(s.chain.sent.borrow()[0], SignedTransaction::Legacy(_)));
    }

    #[tokio::test]
    async fn test_send_failure_surfaces_submit_error() {
        let mut s = scenario(Some(1_000));
        s.chain.fail_send_at = Some(0);

        let err = remove_liquidity(&s.config, &s.chain, &options(s.base_mint)).await.unwrap_err();
        let submit = err.downcast_ref::<SubmitError>().unwrap();
        assert_eq!(submit.stage, SubmitStage::Send);
        assert!(submit.confirmed.is_empty());
        assert_eq!(s.chain.sent_count(), 0);
    }
}
