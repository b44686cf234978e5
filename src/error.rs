//! Error types for the sweep pipeline

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // Network / RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Priority fee unavailable: {0}")]
    FeeUnavailable(String),

    #[error("Mint decimals unavailable for {mint}: {reason}")]
    DecimalsUnavailable { mint: String, reason: String },

    #[error("Token account {address} unavailable: {reason}")]
    AccountUnavailable { address: String, reason: String },

    // Transaction lifecycle errors
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction submit failed: {0}")]
    SubmitFailure(String),

    #[error("Transaction not confirmed: {signature} ({reason})")]
    TransactionNotConfirmed { signature: String, reason: String },

    #[error("Blockhash expired before {0} was confirmed")]
    BlockhashExpired(String),

    #[error("Confirmation of {signature} timed out after {secs}s")]
    ConfirmationTimeout { signature: String, secs: u64 },

    #[error("Websocket error: {0}")]
    Websocket(String),

    // Compose generation
    #[error("Compose generation failed: {0}")]
    Compose(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Errors raised after at least one on-chain side effect may have landed.
    pub fn may_have_landed(&self) -> bool {
        matches!(
            self,
            Error::TransactionNotConfirmed { .. }
                | Error::BlockhashExpired(_)
                | Error::ConfirmationTimeout { .. }
        )
    }
}

impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::FeeUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Compose(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Websocket(e.to_string())
    }
}
