//! Transaction pipeline: create, sign, send, plus gas accounting

mod creator;
mod gas;
mod manager;
mod sender;
mod signer;

pub use creator::{
    AccessKeyCreator, CreateTransactionOptions, TransactionCreator, DEFAULT_NONCE_OFFSET,
};
pub use gas::{GasCallback, GasMeter};
pub use manager::TransactionManager;
pub use sender::{
    bundle_nonce_offsets, BundleFailurePolicy, RedirectTarget, RpcSender, TransactionSender,
    WalletRedirectSender,
};
pub use signer::{KeyStoreSigner, TransactionSigner};

#[cfg(test)]
pub use sender::MockRedirectTarget;
