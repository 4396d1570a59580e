//! Signs transactions with key material resolved from a key store

use crate::error::{RunnerError, RunnerResult};
use crate::keys::KeyStore;
use crate::types::{SignedTransaction, UnsignedTransaction};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Turns unsigned transactions into signed ones
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, tx: UnsignedTransaction) -> RunnerResult<SignedTransaction>;
}

/// Signer backed by a key store for one network
pub struct KeyStoreSigner {
    network_id: String,
    key_store: Arc<dyn KeyStore>,
}

impl KeyStoreSigner {
    pub fn new(network_id: impl Into<String>, key_store: Arc<dyn KeyStore>) -> Self {
        Self {
            network_id: network_id.into(),
            key_store,
        }
    }
}

#[async_trait]
impl TransactionSigner for KeyStoreSigner {
    async fn sign(&self, tx: UnsignedTransaction) -> RunnerResult<SignedTransaction> {
        let signing_error = |message: String| RunnerError::Signing {
            signer_id: tx.signer_id().to_string(),
            network_id: self.network_id.clone(),
            message,
        };

        let key_pair = self
            .key_store
            .get_key(&self.network_id, tx.signer_id())
            .await
            .map_err(|e| signing_error(e.to_string()))?
            .ok_or_else(|| signing_error("no key material".to_string()))?;

        if &key_pair.public_key() != tx.public_key() {
            return Err(signing_error(format!(
                "stored key {} does not match transaction key {}",
                key_pair.public_key(),
                tx.public_key()
            )));
        }

        let hash = tx.hash()?;
        let signature = key_pair.sign(&hash.0);
        debug!("Signed transaction {} for {}", hash, tx.signer_id());

        Ok(SignedTransaction::new(tx, signature))
    }
}
