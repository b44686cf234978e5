//! SPL token lookups: mint decimals, associated token accounts, balances

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::{Account as SplAccount, Mint};
use tracing::{debug, info};

use crate::confirm::{await_confirmation, ConfirmSettings};
use crate::error::{Error, Result};
use crate::rpc_manager::LedgerClient;

/// An associated token account as seen by this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccount {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub mint: Pubkey,
    /// Raw amount in base units
    pub amount: u64,
    /// True when this run created the account
    pub created: bool,
}

/// Read the decimals of a mint. Any failure here ends the transfer attempt.
pub async fn fetch_decimals<L: LedgerClient + ?Sized>(ledger: &L, mint: &Pubkey) -> Result<u8> {
    let unavailable = |reason: String| Error::DecimalsUnavailable {
        mint: mint.to_string(),
        reason,
    };

    let account = ledger
        .get_account(mint)
        .await
        .map_err(|e| unavailable(e.to_string()))?
        .ok_or_else(|| unavailable("account not found".to_string()))?;

    if account.owner != spl_token::id() {
        return Err(unavailable(format!(
            "owned by {}, not the token program",
            account.owner
        )));
    }

    let mint_state = Mint::unpack(&account.data).map_err(|e| unavailable(e.to_string()))?;
    debug!("Mint {} has {} decimals", mint, mint_state.decimals);
    Ok(mint_state.decimals)
}

/// Fetch and decode a token account, `None` if it does not exist yet
pub async fn read_token_account<L: LedgerClient + ?Sized>(
    ledger: &L,
    address: &Pubkey,
) -> Result<Option<SplAccount>> {
    let Some(account) = ledger.get_account(address).await? else {
        return Ok(None);
    };

    if account.owner != spl_token::id() {
        return Err(Error::AccountUnavailable {
            address: address.to_string(),
            reason: format!("owned by {}", account.owner),
        });
    }

    SplAccount::unpack(&account.data)
        .map(Some)
        .map_err(|e| Error::AccountUnavailable {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Look up the associated account of `owner` for `mint` without touching the chain.
/// A missing account is reported with a zero balance.
pub async fn find_associated_account<L: LedgerClient + ?Sized>(
    ledger: &L,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Result<(TokenAccount, bool)> {
    let address = get_associated_token_address(owner, mint);
    let existing = read_token_account(ledger, &address).await?;
    let exists = existing.is_some();

    Ok((
        TokenAccount {
            address,
            owner: *owner,
            mint: *mint,
            amount: existing.map(|a| a.amount).unwrap_or(0),
            created: false,
        },
        exists,
    ))
}

/// Return the associated account of `owner` for `mint`, creating it (paid by
/// `payer`) when missing. A second call for the same pair is a plain lookup.
pub async fn get_or_create_associated_account<L: LedgerClient + ?Sized>(
    ledger: &L,
    payer: &Keypair,
    owner: &Pubkey,
    mint: &Pubkey,
    max_retries: usize,
    confirm: &ConfirmSettings,
) -> Result<TokenAccount> {
    let (account, exists) = find_associated_account(ledger, owner, mint).await?;
    if exists {
        return Ok(account);
    }

    info!("Creating token account {} for {}", account.address, owner);
    let instruction =
        create_associated_token_account_idempotent(&payer.pubkey(), owner, mint, &spl_token::id());

    let (blockhash, last_valid_block_height) = ledger.latest_blockhash().await?;
    let transaction = build_signed_transaction(payer, &[instruction], blockhash)?;
    let signature = ledger.send_transaction(&transaction, max_retries).await?;
    await_confirmation(ledger, &signature, last_valid_block_height, confirm).await?;

    let created = read_token_account(ledger, &account.address)
        .await?
        .ok_or_else(|| Error::AccountUnavailable {
            address: account.address.to_string(),
            reason: format!("still missing after {}", signature),
        })?;

    Ok(TokenAccount {
        amount: created.amount,
        created: true,
        ..account
    })
}

/// Compile a v0 message paid by `payer`
pub fn compile_message(
    payer: &Pubkey,
    instructions: &[Instruction],
    blockhash: Hash,
) -> Result<VersionedMessage> {
    let message = v0::Message::try_compile(payer, instructions, &[], blockhash)
        .map_err(|e| Error::TransactionBuild(e.to_string()))?;
    Ok(VersionedMessage::V0(message))
}

/// Sign with a single signer
pub fn sign_message(message: VersionedMessage, signer: &Keypair) -> Result<VersionedTransaction> {
    VersionedTransaction::try_new(message, &[signer])
        .map_err(|e| Error::TransactionBuild(e.to_string()))
}

pub fn build_signed_transaction(
    payer: &Keypair,
    instructions: &[Instruction],
    blockhash: Hash,
) -> Result<VersionedTransaction> {
    let message = compile_message(&payer.pubkey(), instructions, blockhash)?;
    sign_message(message, payer)
}

/// Base units to a display amount
pub fn ui_amount(amount: u64, decimals: u8) -> f64 {
    amount as f64 / 10f64.powi(decimals as i32)
}
