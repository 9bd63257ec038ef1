//! Packing instruction groups into transactions, and sending them in order

use anyhow::{Context, Result};
use colored::Colorize;
use solana_sdk::{
    address_lookup_table::{state::AddressLookupTable, AddressLookupTableAccount},
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{v0, Message, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::{Transaction, VersionedTransaction},
};

use crate::client::{ChainClient, SignedTransaction};
use crate::config::TxVersion;
use crate::error::{SubmitError, SubmitStage};

/// Instructions that must land together in one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InnerTransaction {
    pub label: &'static str,
    pub instructions: Vec<Instruction>,
}

/// Built but unsigned. The format is fixed here, not rediscovered at signing time.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsignedTransaction {
    Legacy(Transaction),
    Versioned(v0::Message),
}

impl UnsignedTransaction {
    pub fn recent_blockhash(&self) -> Hash {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.message.recent_blockhash,
            UnsignedTransaction::Versioned(message) => message.recent_blockhash,
        }
    }

    pub fn instruction_count(&self) -> usize {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.message.instructions.len(),
            UnsignedTransaction::Versioned(message) => message.instructions.len(),
        }
    }

    pub fn sign(self, signer: &Keypair) -> Result<SignedTransaction> {
        match self {
            UnsignedTransaction::Legacy(mut tx) => {
                let blockhash = tx.message.recent_blockhash;
                tx.try_sign(&[signer], blockhash)
                    .context("Failed to sign legacy transaction")?;
                Ok(SignedTransaction::Legacy(tx))
            }
            UnsignedTransaction::Versioned(message) => {
                let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[signer])
                    .context("Failed to sign versioned transaction")?;
                Ok(SignedTransaction::Versioned(tx))
            }
        }
    }
}

/// One transaction per inner group, in order. No network access.
pub fn build_transactions(
    payer: &Pubkey,
    inner_transactions: &[InnerTransaction],
    tx_version: TxVersion,
    lookup_tables: &[AddressLookupTableAccount],
    priority_fee: Option<u64>,
    blockhash: Hash,
) -> Result<Vec<UnsignedTransaction>> {
    inner_transactions
        .iter()
        .map(|inner| {
            let mut instructions = Vec::with_capacity(inner.instructions.len() + 1);
            if let Some(micro_lamports) = priority_fee {
                instructions.push(ComputeBudgetInstruction::set_compute_unit_price(micro_lamports));
            }
            instructions.extend(inner.instructions.iter().cloned());

            match tx_version {
                TxVersion::Legacy => {
                    let message = Message::new_with_blockhash(&instructions, Some(payer), &blockhash);
                    Ok(UnsignedTransaction::Legacy(Transaction::new_unsigned(message)))
                }
                TxVersion::V0 => {
                    let message = v0::Message::try_compile(payer, &instructions, lookup_tables, blockhash)
                        .with_context(|| format!("Failed to compile {} message", inner.label))?;
                    Ok(UnsignedTransaction::Versioned(message))
                }
            }
        })
        .collect()
}

/// Fetch and decode an address lookup table
pub fn fetch_lookup_table<C: ChainClient>(
    client: &C,
    address: &Pubkey,
) -> Result<AddressLookupTableAccount> {
    let account = client
        .fetch_account(address)?
        .with_context(|| format!("Lookup table not found: {}", address))?;

    let table = AddressLookupTable::deserialize(&account.data)
        .map_err(|e| anyhow::anyhow!("Failed to deserialize lookup table {}: {}", address, e))?;

    Ok(AddressLookupTableAccount {
        key: *address,
        addresses: table.addresses.to_vec(),
    })
}

/// Sign, send and confirm each transaction in turn.
///
/// Stops at the first failure. Transactions before it stay on chain and are
/// listed in the error's `confirmed`.
pub fn submit_all<C: ChainClient>(
    client: &C,
    signer: &Keypair,
    transactions: Vec<UnsignedTransaction>,
) -> Result<Vec<Signature>, SubmitError> {
    let total = transactions.len();
    let mut confirmed = Vec::with_capacity(total);

    for (index, unsigned) in transactions.into_iter().enumerate() {
        let fail = |stage: SubmitStage, source: anyhow::Error, confirmed: &Vec<Signature>| SubmitError {
            index,
            total,
            stage,
            confirmed: confirmed.clone(),
            source: source.into(),
        };

        let blockhash = unsigned.recent_blockhash();
        let signed = unsigned
            .sign(signer)
            .map_err(|e| fail(SubmitStage::Sign, e, &confirmed))?;
        log::debug!("Signed {}", signed.signature());

        println!(
            "{} {}/{}",
            "Sending transaction".dimmed(),
            index + 1,
            total
        );
        let signature = client
            .send_transaction(&signed)
            .map_err(|e| fail(SubmitStage::Send, e, &confirmed))?;
        log::debug!("Sent {}", signature);

        client
            .confirm_signature(&signature, &blockhash)
            .map_err(|e| fail(SubmitStage::Confirm, e, &confirmed))?;
        println!("{} {}", "Transaction confirmed:".bright_green(), signature);

        confirmed.push(signature);
    }

    Ok(confirmed)
}
