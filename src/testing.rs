//! In-memory ledger used by the pipeline tests

use async_trait::async_trait;
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::InstructionError,
    pubkey::Pubkey,
    signature::Signature,
    system_program,
    transaction::{TransactionError, VersionedTransaction},
};
use spl_associated_token_account::get_associated_token_address;
use spl_token::instruction::TokenInstruction;
use spl_token::solana_program::program_option::COption;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::{Account as SplAccount, AccountState, Mint};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::rpc_manager::LedgerClient;

type TxResult = std::result::Result<(), TransactionError>;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Account>,
    statuses: HashMap<Signature, TxResult>,
    block_height: u64,
    sent: Vec<VersionedTransaction>,
    fail_sends: bool,
    reject_transfers: bool,
}

/// Interprets associated-token-account creation and SPL `TransferChecked`;
/// every other instruction (compute budget) is accepted and ignored.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mint(&self, decimals: u8) -> Pubkey {
        let mint = Pubkey::new_unique();
        let state = Mint {
            mint_authority: COption::None,
            supply: u64::MAX,
            decimals,
            is_initialized: true,
            freeze_authority: COption::None,
        };
        let mut data = vec![0u8; Mint::LEN];
        Mint::pack(state, &mut data).unwrap();
        self.insert(mint, token_program_account(data));
        mint
    }

    pub fn add_system_account(&self, address: Pubkey, lamports: u64) {
        self.insert(
            address,
            Account {
                lamports,
                data: vec![],
                owner: system_program::id(),
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    /// Create the associated token account of `owner` holding `amount`
    pub fn add_token_account(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) -> Pubkey {
        let address = get_associated_token_address(owner, mint);
        self.insert(address, packed_token_account(owner, mint, amount));
        address
    }

    pub fn token_balance(&self, address: &Pubkey) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(address)
            .and_then(|a| SplAccount::unpack(&a.data).ok())
            .map(|a| a.amount)
    }

    pub fn set_status(&self, signature: Signature, status: TxResult) {
        self.state.lock().unwrap().statuses.insert(signature, status);
    }

    pub fn set_block_height(&self, height: u64) {
        self.state.lock().unwrap().block_height = height;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Token transfers land but fail on chain
    pub fn reject_transfers(&self, reject: bool) {
        self.state.lock().unwrap().reject_transfers = reject;
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Number of submitted transactions carrying a token transfer
    pub fn transfer_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|tx| {
                let keys = tx.message.static_account_keys();
                tx.message.instructions().iter().any(|ix| {
                    keys[ix.program_id_index as usize] == spl_token::id()
                        && matches!(
                            TokenInstruction::unpack(&ix.data),
                            Ok(TokenInstruction::TransferChecked { .. })
                        )
                })
            })
            .count()
    }

    fn insert(&self, address: Pubkey, account: Account) {
        self.state.lock().unwrap().accounts.insert(address, account);
    }
}

fn token_program_account(data: Vec<u8>) -> Account {
    Account {
        lamports: 2_039_280,
        data,
        owner: spl_token::id(),
        executable: false,
        rent_epoch: 0,
    }
}

fn packed_token_account(owner: &Pubkey, mint: &Pubkey, amount: u64) -> Account {
    let state = SplAccount {
        mint: *mint,
        owner: *owner,
        amount,
        delegate: COption::None,
        state: AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    };
    let mut data = vec![0u8; SplAccount::LEN];
    SplAccount::pack(state, &mut data).unwrap();
    token_program_account(data)
}

fn adjust_balance(
    state: &mut LedgerState,
    address: &Pubkey,
    f: impl FnOnce(u64) -> Option<u64>,
) -> bool {
    let Some(account) = state.accounts.get_mut(address) else {
        return false;
    };
    let Ok(mut token) = SplAccount::unpack(&account.data) else {
        return false;
    };
    let Some(amount) = f(token.amount) else {
        return false;
    };
    token.amount = amount;
    SplAccount::pack(token, &mut account.data).is_ok()
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        Ok(self.state.lock().unwrap().accounts.get(address).cloned())
    }

    async fn latest_blockhash(&self) -> Result<(Hash, u64)> {
        let height = self.state.lock().unwrap().block_height;
        Ok((Hash::new_unique(), height + 150))
    }

    async fn block_height(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().block_height)
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        _max_retries: usize,
    ) -> Result<Signature> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(Error::SubmitFailure("node unavailable".to_string()));
        }
        assert!(
            transaction.verify_with_results().iter().all(|ok| *ok),
            "transaction carries an invalid signature"
        );

        let signature = transaction.signatures[0];
        let keys = transaction.message.static_account_keys().to_vec();
        let mut status: TxResult = Ok(());
        // transactions are atomic; a failed instruction undoes earlier ones
        let snapshot = state.accounts.clone();

        for (index, ix) in transaction.message.instructions().iter().enumerate() {
            let program = keys[ix.program_id_index as usize];
            let account = |i: usize| keys[ix.accounts[i] as usize];

            if program == spl_associated_token_account::id() {
                let (address, wallet, mint) = (account(1), account(2), account(3));
                state
                    .accounts
                    .entry(address)
                    .or_insert_with(|| packed_token_account(&wallet, &mint, 0));
            } else if program == spl_token::id() {
                if let Ok(TokenInstruction::TransferChecked { amount, .. }) =
                    TokenInstruction::unpack(&ix.data)
                {
                    let (source, destination) = (account(0), account(2));
                    let failed = TransactionError::InstructionError(
                        index as u8,
                        InstructionError::Custom(1),
                    );
                    if state.reject_transfers
                        || !state.accounts.contains_key(&destination)
                        || !adjust_balance(&mut state, &source, |b| b.checked_sub(amount))
                    {
                        status = Err(failed);
                        break;
                    }
                    adjust_balance(&mut state, &destination, |b| b.checked_add(amount));
                }
            }
        }

        if status.is_err() {
            state.accounts = snapshot;
        }
        state.statuses.insert(signature, status);
        state.sent.push(transaction.clone());
        Ok(signature)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<TxResult>> {
        Ok(self.state.lock().unwrap().statuses.get(signature).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::build_signed_transaction;
    use solana_sdk::signature::{Keypair, Signer};
    use spl_associated_token_account::instruction::create_associated_token_account_idempotent;

    #[tokio::test]
    async fn test_failed_transfer_rolls_back_whole_transaction() {
        let ledger = MockLedger::new();
        let mint = ledger.add_mint(6);
        let payer = Keypair::new();
        let source = ledger.add_token_account(&payer.pubkey(), &mint, 5);
        let beneficiary = Pubkey::new_unique();
        let destination = get_associated_token_address(&beneficiary, &mint);

        // create the destination, then overdraw the source
        let instructions = vec![
            create_associated_token_account_idempotent(
                &payer.pubkey(),
                &beneficiary,
                &mint,
                &spl_token::id(),
            ),
            spl_token::instruction::transfer_checked(
                &spl_token::id(),
                &source,
                &mint,
                &destination,
                &payer.pubkey(),
                &[],
                10,
                6,
            )
            .unwrap(),
        ];
        let tx = build_signed_transaction(&payer, &instructions, Hash::new_unique()).unwrap();

        let signature = ledger.send_transaction(&tx, 0).await.unwrap();
        assert!(matches!(
            ledger.signature_status(&signature).await.unwrap(),
            Some(Err(TransactionError::InstructionError(1, _)))
        ));
        assert_eq!(ledger.token_balance(&destination), None);
        assert_eq!(ledger.token_balance(&source), Some(5));
    }

    #[tokio::test]
    async fn test_successful_transaction_applies_every_instruction() {
        let ledger = MockLedger::new();
        let mint = ledger.add_mint(6);
        let payer = Keypair::new();
        let source = ledger.add_token_account(&payer.pubkey(), &mint, 5);
        let beneficiary = Pubkey::new_unique();
        let destination = get_associated_token_address(&beneficiary, &mint);

        let instructions = vec![
            create_associated_token_account_idempotent(
                &payer.pubkey(),
                &beneficiary,
                &mint,
                &spl_token::id(),
            ),
            spl_token::instruction::transfer_checked(
                &spl_token::id(),
                &source,
                &mint,
                &destination,
                &payer.pubkey(),
                &[],
                5,
                6,
            )
            .unwrap(),
        ];
        let tx = build_signed_transaction(&payer, &instructions, Hash::new_unique()).unwrap();

        let signature = ledger.send_transaction(&tx, 0).await.unwrap();
        assert!(matches!(ledger.signature_status(&signature).await.unwrap(), Some(Ok(()))));
        assert_eq!(ledger.token_balance(&destination), Some(5));
        assert_eq!(ledger.token_balance(&source), Some(0));
    }
}
