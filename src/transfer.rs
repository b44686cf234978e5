use futures::{stream, StreamExt};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::confirm::{await_confirmation, ConfirmSettings};
use crate::error::{Error, Result};
use crate::fee::{to_compute_unit_price, PriorityFeeSource};
use crate::rpc_manager::LedgerClient;
use crate::token::{
    compile_message, fetch_decimals, find_associated_account, get_or_create_associated_account,
    sign_message, ui_amount, TokenAccount,
};
use crate::wallet::SecretKey;

/// Furthest point a key's pipeline reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransferStage {
    Init,
    FeeResolved,
    DecimalsResolved,
    AccountsResolved,
    BalanceChecked,
    Built,
    Signed,
    Submitted,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStage::Init => "init",
            TransferStage::FeeResolved => "fee resolved",
            TransferStage::DecimalsResolved => "decimals resolved",
            TransferStage::AccountsResolved => "accounts resolved",
            TransferStage::BalanceChecked => "balance checked",
            TransferStage::Built => "built",
            TransferStage::Signed => "signed",
            TransferStage::Submitted => "submitted",
        };
        f.write_str(name)
    }
}

/// Terminal state of one key
#[derive(Debug)]
pub enum TransferOutcome {
    Confirmed {
        owner: Pubkey,
        amount: u64,
        decimals: u8,
        signature: Signature,
    },
    /// Source balance was 0; nothing was built or sent
    Skipped { owner: Pubkey },
    /// Built and signed, never submitted
    DryRun {
        owner: Pubkey,
        amount: u64,
        decimals: u8,
        /// base64 of the bincode-serialized transaction
        transaction: String,
    },
    Failed {
        owner: Option<Pubkey>,
        stage: TransferStage,
        error: Error,
    },
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub mint: Pubkey,
    pub beneficiary: Pubkey,
    pub max_retries: usize,
    /// Compute unit price used when the fee source is unavailable
    pub fallback_priority_fee: u64,
    pub concurrency: usize,
    pub dry_run: bool,
    pub confirm: ConfirmSettings,
}

impl TransferSettings {
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let invalid = |e: anyhow::Error| Error::Config(format!("{:#}", e));
        Ok(Self {
            mint: config.mint().map_err(invalid)?,
            beneficiary: config.beneficiary().map_err(invalid)?,
            max_retries: config.max_retries,
            fallback_priority_fee: config.fallback_priority_fee,
            concurrency: config.concurrency.max(1),
            dry_run,
            confirm: ConfirmSettings {
                commitment: config.commitment().commitment,
                timeout: config.confirm_timeout(),
                ws_endpoint: config.ws_endpoint.clone(),
                ..ConfirmSettings::default()
            },
        })
    }
}

pub struct TransferService<L, F> {
    ledger: L,
    fees: F,
    settings: TransferSettings,
}

impl<L: LedgerClient, F: PriorityFeeSource> TransferService<L, F> {
    pub fn new(ledger: L, fees: F, settings: TransferSettings) -> Self {
        Self {
            ledger,
            fees,
            settings,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Sweep every key into the beneficiary. Keys are independent: a failure
    /// is recorded for that key and the batch moves on.
    pub async fn run_batch(&self, keys: &[SecretKey]) -> BatchReport {
        let start = Instant::now();
        info!(
            "Sweeping {} wallets into {} (concurrency {})",
            keys.len(),
            self.settings.beneficiary,
            self.settings.concurrency
        );

        let mut outcomes: Vec<(usize, TransferOutcome)> = stream::iter(keys.iter().enumerate())
            .map(|(index, key)| async move { (index, self.transfer(index, key).await) })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        BatchReport {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
            elapsed_secs: start.elapsed().as_secs(),
        }
    }

    /// Run the whole pipeline for one key and report how it ended
    pub async fn transfer(&self, index: usize, key: &SecretKey) -> TransferOutcome {
        let keypair = match key.keypair() {
            Ok(keypair) => keypair,
            Err(error) => {
                warn!("Key {}: {}", index + 1, error);
                return TransferOutcome::Failed {
                    owner: None,
                    stage: TransferStage::Init,
                    error,
                };
            }
        };
        let owner = keypair.pubkey();
        let span = info_span!("key", index = index + 1, %owner);

        async {
            let mut stage = TransferStage::Init;
            let outcome = match self.execute(&keypair, &mut stage).await {
                Ok(outcome) => outcome,
                Err(error) => TransferOutcome::Failed {
                    owner: Some(owner),
                    stage,
                    error,
                },
            };
            report(&outcome);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        keypair: &Keypair,
        stage: &mut TransferStage,
    ) -> Result<TransferOutcome> {
        let owner = keypair.pubkey();
        let mint = self.settings.mint;
        let beneficiary = self.settings.beneficiary;

        let priority_fee = match self.fees.estimate().await {
            Ok(fee) => to_compute_unit_price(fee),
            Err(e) => {
                warn!(
                    "{}; using fallback priority fee {}",
                    e, self.settings.fallback_priority_fee
                );
                self.settings.fallback_priority_fee
            }
        };
        advance(stage, TransferStage::FeeResolved);

        let decimals = fetch_decimals(&self.ledger, &mint).await?;
        advance(stage, TransferStage::DecimalsResolved);

        let (source, destination) = self.resolve_accounts(keypair, &mint, &beneficiary).await?;
        advance(stage, TransferStage::AccountsResolved);

        let amount = source.amount;
        info!("{} balance is {}", owner, ui_amount(amount, decimals));
        advance(stage, TransferStage::BalanceChecked);

        if amount == 0 {
            return Ok(TransferOutcome::Skipped { owner });
        }

        info!(
            "{} start transfer {} to {}",
            owner,
            ui_amount(amount, decimals),
            short_address(&beneficiary)
        );

        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_price(priority_fee),
            spl_token::instruction::transfer_checked(
                &spl_token::id(),
                &source.address,
                &mint,
                &destination.address,
                &owner,
                &[],
                amount,
                decimals,
            )
            .map_err(|e| Error::TransactionBuild(e.to_string()))?,
        ];

        let (blockhash, last_valid_block_height) = self.ledger.latest_blockhash().await?;
        let message = compile_message(&owner, &instructions, blockhash)?;
        advance(stage, TransferStage::Built);

        let transaction = sign_message(message, keypair)?;
        advance(stage, TransferStage::Signed);
        debug!("Transaction signed, priority fee {} micro-lamports", priority_fee);

        if self.settings.dry_run {
            let bytes = bincode::serialize(&transaction)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            return Ok(TransferOutcome::DryRun {
                owner,
                amount,
                decimals,
                transaction: base64::encode(bytes),
            });
        }

        let signature = self
            .ledger
            .send_transaction(&transaction, self.settings.max_retries)
            .await?;
        advance(stage, TransferStage::Submitted);
        info!("Transaction Submitted: {}", signature);

        await_confirmation(
            &self.ledger,
            &signature,
            last_valid_block_height,
            &self.settings.confirm,
        )
        .await?;

        Ok(TransferOutcome::Confirmed {
            owner,
            amount,
            decimals,
            signature,
        })
    }

    /// Source and destination associated accounts. In dry-run mode nothing is
    /// created; missing accounts are reported with a zero balance.
    async fn resolve_accounts(
        &self,
        keypair: &Keypair,
        mint: &Pubkey,
        beneficiary: &Pubkey,
    ) -> Result<(TokenAccount, TokenAccount)> {
        let owner = keypair.pubkey();

        if self.settings.dry_run {
            let (source, _) = find_associated_account(&self.ledger, &owner, mint).await?;
            let (destination, exists) =
                find_associated_account(&self.ledger, beneficiary, mint).await?;
            if !exists {
                info!("Token account {} would be created", destination.address);
            }
            return Ok((source, destination));
        }

        let source = get_or_create_associated_account(
            &self.ledger,
            keypair,
            &owner,
            mint,
            self.settings.max_retries,
            &self.settings.confirm,
        )
        .await?;
        let destination = get_or_create_associated_account(
            &self.ledger,
            keypair,
            beneficiary,
            mint,
            self.settings.max_retries,
            &self.settings.confirm,
        )
        .await?;

        Ok((source, destination))
    }
}

fn advance(stage: &mut TransferStage, next: TransferStage) {
    debug!("{} -> {}", stage, next);
    *stage = next;
}

fn short_address(address: &Pubkey) -> String {
    let s = address.to_string();
    format!("{}...{}", &s[..4], &s[s.len() - 4..])
}

fn report(outcome: &TransferOutcome) {
    match outcome {
        TransferOutcome::Confirmed { signature, .. } => info!(
            "Transaction Successfully Confirmed! 🎉 View on SolScan: https://solscan.io/tx/{}",
            signature
        ),
        TransferOutcome::Skipped { owner } => warn!("{} Transfer end. Balance is 0", owner),
        TransferOutcome::DryRun {
            amount,
            decimals,
            transaction,
            ..
        } => info!(
            "Dry run: would transfer {}, transaction {}",
            ui_amount(*amount, *decimals),
            transaction
        ),
        TransferOutcome::Failed { stage, error, .. } => {
            error!("🚨 Transfer failed after stage '{}': {}", stage, error);
            if error.may_have_landed() {
                warn!("The transaction may still land; check an explorer before re-running");
            }
        }
    }
}

/// Per-key outcomes of a batch, in key-file order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<TransferOutcome>,
    pub elapsed_secs: u64,
}

impl BatchReport {
    pub fn confirmed(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::Confirmed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::Skipped { .. }))
    }

    pub fn dry_runs(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::DryRun { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::Failed { .. }))
    }

    fn count(&self, f: impl Fn(&TransferOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(o)).count()
    }

    pub fn print_summary(&self) {
        println!("All transfers completed!");
        println!("Wallets processed: {}", self.outcomes.len());
        println!("Confirmed: {}", self.confirmed());
        println!("Skipped (zero balance): {}", self.skipped());
        if self.dry_runs() > 0 {
            println!("Dry run: {}", self.dry_runs());
        }
        println!("Failed: {}", self.failed());
        println!("Total elapsed time: {}s", self.elapsed_secs);
    }
}
