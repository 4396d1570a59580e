//! near-runner - sandbox and testnet harness for NEAR contracts
//!
//! Tests describe accounts once with `Runner::create` and then exercise them
//! in isolated runs with `Runner::run`. Underneath, every transaction goes
//! through a creator, a signer and a sender wired together by a
//! `TransactionManager`, and every outcome feeds a per-run `GasMeter`.
//!
//! Node access and key material come from an SDK binding implementing the
//! traits in `chain` and `keys`.

pub mod account;
pub mod chain;
pub mod config;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod runner;
pub mod sandbox;
pub mod state;
pub mod tx;
pub mod types;

pub use account::{Account, AccountBalance, CallOptions, CreateAccountOptions, Runtime};
pub use chain::{Connector, Provider};
pub use config::Settings;
pub use error::{RunnerError, RunnerResult};
pub use keys::{InMemoryKeyStore, KeyPair, KeyStore};
pub use runner::{NamedAccounts, Runner, RunnerInput, TestContext};
pub use state::ContractState;
pub use tx::{GasMeter, TransactionManager};
pub use types::{AccountId, Action, Balance, ExecutionOutcome, Gas, GasValue, ONE_NEAR, TGAS};

use std::sync::OnceLock;

/// Install the global tracing subscriber once per process.
///
/// `RUST_LOG` overrides the default filter. Later calls, and calls after
/// another subscriber was installed, do nothing.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    static INIT: OnceLock<()> = OnceLock::new();

    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,near_runner=debug"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init();
    });
}
