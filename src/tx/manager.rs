//! One creator, signer and sender wired together for a single signer

use super::creator::{CreateTransactionOptions, TransactionCreator};
use super::sender::TransactionSender;
use super::signer::TransactionSigner;
use crate::error::RunnerResult;
use crate::types::{AccountId, Action, ExecutionOutcome, SignedTransaction, UnsignedTransaction};

use std::sync::Arc;

/// Facade over a fixed creator/signer/sender combination
#[derive(Clone)]
pub struct TransactionManager {
    creator: Arc<dyn TransactionCreator>,
    signer: Arc<dyn TransactionSigner>,
    sender: Arc<dyn TransactionSender>,
}

impl TransactionManager {
    pub fn new(
        creator: Arc<dyn TransactionCreator>,
        signer: Arc<dyn TransactionSigner>,
        sender: Arc<dyn TransactionSender>,
    ) -> Self {
        Self {
            creator,
            signer,
            sender,
        }
    }

    pub fn signer_id(&self) -> &AccountId {
        self.creator.signer_id()
    }

    pub async fn create_transaction(
        &self,
        receiver_id: AccountId,
        actions: Vec<Action>,
        nonce_offset: u64,
    ) -> RunnerResult<UnsignedTransaction> {
        self.creator.create(receiver_id, actions, nonce_offset).await
    }

    pub async fn sign_transaction(&self, tx: UnsignedTransaction) -> RunnerResult<SignedTransaction> {
        self.signer.sign(tx).await
    }

    pub async fn create_signed_transaction(
        &self,
        options: CreateTransactionOptions,
    ) -> RunnerResult<SignedTransaction> {
        let tx = self
            .create_transaction(options.receiver_id, options.actions, options.nonce_offset)
            .await?;
        self.sign_transaction(tx).await
    }

    pub async fn send_transaction(&self, tx: SignedTransaction) -> RunnerResult<ExecutionOutcome> {
        self.sender.send(tx).await
    }

    pub async fn send_signed_transaction(
        &self,
        tx: SignedTransaction,
    ) -> RunnerResult<ExecutionOutcome> {
        self.send_transaction(tx).await
    }

    pub async fn create_sign_and_send_transaction(
        &self,
        options: CreateTransactionOptions,
    ) -> RunnerResult<ExecutionOutcome> {
        self.sender
            .create_sign_and_send(self.creator.as_ref(), self.signer.as_ref(), options)
            .await
    }

    pub async fn bundle_create_sign_and_send_transactions(
        &self,
        options: Vec<CreateTransactionOptions>,
    ) -> Vec<RunnerResult<ExecutionOutcome>> {
        self.sender
            .bundle_create_sign_and_send(self.creator.as_ref(), self.signer.as_ref(), options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockProvider, Provider};
    use crate::keys::testing::FakeKeyPair;
    use crate::keys::{InMemoryKeyStore, KeyStore};
    use crate::tx::{AccessKeyCreator, KeyStoreSigner, RpcSender};
    use crate::types::{AccessKeyView, CryptoHash, ExecutionStatus, OutcomeView};

    async fn manager(provider: MockProvider) -> TransactionManager {
        let signer_id: AccountId = "test.near".parse().unwrap();
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        store
            .set_key("sandbox", &signer_id, FakeKeyPair::new(2))
            .await
            .unwrap();
        let provider: Arc<dyn Provider> = Arc::new(provider);

        TransactionManager::new(
            Arc::new(
                AccessKeyCreator::new("sandbox", signer_id, store.clone())
                    .with_provider(provider.clone()),
            ),
            Arc::new(KeyStoreSigner::new("sandbox", store)),
            Arc::new(RpcSender::new("sandbox", provider)),
        )
    }

    fn access_key(provider: &mut MockProvider, nonce: u64) {
        provider.expect_view_access_key().returning(move |_, _| {
            Ok(AccessKeyView {
                nonce,
                block_hash: CryptoHash([4; 32]),
            })
        });
    }

    #[tokio::test]
    async fn test_create_signed_transaction_uses_fixed_signer() {
        let mut provider = MockProvider::new();
        access_key(&mut provider, 10);
        let manager = manager(provider).await;

        let receiver: AccountId = "alice.test.near".parse().unwrap();
        let signed = manager
            .create_signed_transaction(CreateTransactionOptions::new(
                receiver.clone(),
                vec![Action::transfer(5)],
            ))
            .await
            .unwrap();

        assert_eq!(manager.signer_id().as_str(), "test.near");
        assert_eq!(signed.transaction().signer_id().as_str(), "test.near");
        assert_eq!(signed.transaction().receiver_id(), &receiver);
        assert_eq!(signed.transaction().nonce(), 11);
    }

    #[tokio::test]
    async fn test_create_sign_and_send_returns_outcome() {
        let mut provider = MockProvider::new();
        access_key(&mut provider, 0);
        provider.expect_send_transaction().times(1).returning(|tx| {
            let executor_id = tx.transaction().receiver_id().clone();
            Ok(ExecutionOutcome {
                transaction_hash: tx.hash().unwrap(),
                status: ExecutionStatus::SuccessValue(b"42".to_vec()),
                transaction_outcome: OutcomeView {
                    id: CryptoHash([1; 32]),
                    executor_id,
                    logs: vec![],
                    gas_burnt: 1,
                    status: ExecutionStatus::SuccessNoValue,
                },
                receipts_outcome: vec![],
            })
        });
        let manager = manager(provider).await;

        let outcome = manager
            .create_sign_and_send_transaction(CreateTransactionOptions::new(
                "test.near".parse().unwrap(),
                vec![Action::function_call("get", Vec::new(), 1, 0)],
            ))
            .await
            .unwrap();
        assert_eq!(outcome.json::<u32>().unwrap(), 42);
    }
}
