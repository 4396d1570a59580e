//! Builds unsigned transactions from the signer's current access key

use crate::chain::Provider;
use crate::error::{RunnerError, RunnerResult};
use crate::keys::KeyStore;
use crate::types::{AccountId, Action, UnsignedTransaction};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Nonce offset used when the caller does not pick one
pub const DEFAULT_NONCE_OFFSET: u64 = 1;

/// What to put in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTransactionOptions {
    pub receiver_id: AccountId,
    pub actions: Vec<Action>,
    /// Added to the access key's on-chain nonce
    pub nonce_offset: u64,
}

impl CreateTransactionOptions {
    pub fn new(receiver_id: AccountId, actions: Vec<Action>) -> Self {
        Self {
            receiver_id,
            actions,
            nonce_offset: DEFAULT_NONCE_OFFSET,
        }
    }

    pub fn with_nonce_offset(mut self, nonce_offset: u64) -> Self {
        self.nonce_offset = nonce_offset;
        self
    }
}

/// Produces unsigned transactions for one signer
#[async_trait]
pub trait TransactionCreator: Send + Sync {
    fn signer_id(&self) -> &AccountId;

    async fn create(
        &self,
        receiver_id: AccountId,
        actions: Vec<Action>,
        nonce_offset: u64,
    ) -> RunnerResult<UnsignedTransaction>;
}

/// Creator that reads the nonce and block hash from the signer's access key
pub struct AccessKeyCreator {
    network_id: String,
    signer_id: AccountId,
    key_store: Arc<dyn KeyStore>,
    provider: Option<Arc<dyn Provider>>,
}

impl AccessKeyCreator {
    /// Create a creator without a provider; `with_provider` must follow before use
    pub fn new(
        network_id: impl Into<String>,
        signer_id: AccountId,
        key_store: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            signer_id,
            key_store,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn creation_error(&self, message: impl Into<String>) -> RunnerError {
        RunnerError::Creation {
            signer_id: self.signer_id.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl TransactionCreator for AccessKeyCreator {
    fn signer_id(&self) -> &AccountId {
        &self.signer_id
    }

    async fn create(
        &self,
        receiver_id: AccountId,
        actions: Vec<Action>,
        nonce_offset: u64,
    ) -> RunnerResult<UnsignedTransaction> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| self.creation_error("no provider configured"))?;

        let key_pair = self
            .key_store
            .get_key(&self.network_id, &self.signer_id)
            .await
            .map_err(|e| self.creation_error(e.to_string()))?
            .ok_or_else(|| {
                self.creation_error(format!("no key for {} on {}", self.signer_id, self.network_id))
            })?;
        let public_key = key_pair.public_key();

        let access_key = provider
            .view_access_key(&self.signer_id, &public_key)
            .await
            .map_err(|e| self.creation_error(format!("access key lookup failed: {}", e)))?;

        let nonce = access_key
            .nonce
            .checked_add(nonce_offset)
            .ok_or_else(|| self.creation_error("nonce overflow"))?;

        debug!(
            "Created transaction {} -> {} with nonce {} ({} actions)",
            self.signer_id,
            receiver_id,
            nonce,
            actions.len()
        );

        Ok(UnsignedTransaction::new(
            self.signer_id.clone(),
            public_key,
            nonce,
            receiver_id,
            access_key.block_hash,
            actions,
        ))
    }
}
