use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::{
    account::Account,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{TransactionError, VersionedTransaction},
};
use solana_transaction_status::UiTransactionEncoding;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};

/// The slice of the RPC surface the sweep pipeline talks to.
///
/// Everything goes through this trait so the pipeline can run against an
/// in-memory ledger in tests.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch an account, `None` if it does not exist
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>>;

    /// Latest blockhash and the last block height at which it is still valid
    async fn latest_blockhash(&self) -> Result<(Hash, u64)>;

    async fn block_height(&self) -> Result<u64>;

    /// Submit a signed transaction; the node rebroadcasts up to `max_retries` times
    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        max_retries: usize,
    ) -> Result<Signature>;

    /// `None` while the signature has not reached the client's commitment
    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<std::result::Result<(), TransactionError>>>;
}

/// Build the network handle for a batch
pub fn connect(config: &Config) -> RpcClient {
    debug!("Connecting to {}", config.rpc_url);
    RpcClient::new_with_commitment(config.rpc_url.clone(), config.commitment())
}

#[async_trait]
impl LedgerClient for RpcClient {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let response = self
            .get_account_with_commitment(address, self.commitment())
            .await?;
        Ok(response.value)
    }

    async fn latest_blockhash(&self) -> Result<(Hash, u64)> {
        Ok(self
            .get_latest_blockhash_with_commitment(self.commitment())
            .await?)
    }

    async fn block_height(&self) -> Result<u64> {
        Ok(self.get_block_height_with_commitment(self.commitment()).await?)
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        max_retries: usize,
    ) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment().commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: Some(max_retries),
            ..Default::default()
        };

        self.send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| Error::SubmitFailure(e.to_string()))
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<std::result::Result<(), TransactionError>>> {
        Ok(self
            .get_signature_status_with_commitment(signature, self.commitment())
            .await?)
    }
}

/// Outcome of a single endpoint health probe
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub url: String,
    pub version: String,
    pub response_time: Duration,
}

/// Check that the endpoint answers before any key is touched
pub async fn probe(client: &RpcClient) -> Result<EndpointHealth> {
    let start = Instant::now();
    let version = client
        .get_version()
        .await
        .map_err(|e| Error::Rpc(format!("{} is unreachable: {}", client.url(), e)))?;
    let response_time = start.elapsed();

    let health = EndpointHealth {
        url: client.url(),
        version: version.solana_core,
        response_time,
    };

    info!(
        "✅ {}: Response: {}ms, Version: {}",
        health.url,
        health.response_time.as_millis(),
        health.version
    );
    Ok(health)
}
