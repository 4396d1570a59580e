//! Error types for near-runner

use thiserror::Error;

/// Main error type for the runner
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid account id {account_id:?}: {reason}")]
    InvalidAccountId { account_id: String, reason: String },

    #[error("Failed to create transaction for {signer_id}: {message}")]
    Creation { signer_id: String, message: String },

    #[error("Failed to sign transaction for {signer_id} on {network_id}: {message}")]
    Signing {
        signer_id: String,
        network_id: String,
        message: String,
    },

    #[error("Failed to submit transaction {tx_hash}: {message}")]
    Submission { tx_hash: String, message: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transaction {tx_hash} failed on chain: {message}")]
    ExecutionFailed { tx_hash: String, message: String },

    #[error("Transactions handed to wallet redirect, no outcome available")]
    Redirected,

    #[error("Operation not supported on {network}: {operation}")]
    Unsupported { network: String, operation: String },

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Check if the error originated in the network layer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RunnerError::Submission { .. } | RunnerError::Rpc(_) | RunnerError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(e: serde_json::Error) -> Self {
        RunnerError::Decode(e.to_string())
    }
}

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;
