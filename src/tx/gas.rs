//! Gas accounting across transactions and receipts

use crate::types::GasValue;

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Callback invoked with each burnt-gas value observed on the execution path
pub type GasCallback = Arc<dyn Fn(GasValue) -> BoxFuture<'static, ()> + Send + Sync>;

/// Running total of burnt gas, resettable between test cases.
///
/// Every update takes the mutex for its whole read-modify-write, so callbacks
/// fired from concurrent receipt-processing paths are applied one at a time.
#[derive(Clone, Default)]
pub struct GasMeter {
    elapsed: Arc<Mutex<GasValue>>,
}

impl GasMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gas burnt since construction or the last reset
    pub async fn elapsed(&self) -> GasValue {
        *self.elapsed.lock().await
    }

    pub async fn reset(&self) {
        *self.elapsed.lock().await = GasValue::ZERO;
    }

    /// Callback to register with a transaction sender
    pub fn tx_callback(&self) -> GasCallback {
        let elapsed = self.elapsed.clone();
        Arc::new(move |gas: GasValue| {
            let elapsed = elapsed.clone();
            async move {
                let mut total = elapsed.lock().await;
                *total += gas;
                trace!("Gas meter at {} after +{}", *total, gas);
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_elapsed_is_sum_of_updates() {
        let meter = GasMeter::new();
        let callback = meter.tx_callback();

        for gas in [100u64, 250, 0, 650] {
            callback(GasValue::from(gas)).await;
        }
        assert_eq!(meter.elapsed().await, GasValue::from(1_000u64));
    }

    #[tokio::test]
    async fn test_reset_discards_prior_history() {
        let meter = GasMeter::new();
        let callback = meter.tx_callback();

        callback(GasValue::from(500u64)).await;
        assert_eq!(meter.elapsed().await, GasValue::from(500u64));

        meter.reset().await;
        callback(GasValue::ZERO).await;
        assert_eq!(meter.elapsed().await, GasValue::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let meter = GasMeter::new();
        let values: Vec<u64> = (1..=200).collect();

        let handles = values.iter().map(|&gas| {
            let callback = meter.tx_callback();
            tokio::spawn(async move { callback(GasValue::from(gas)).await })
        });
        for result in join_all(handles).await {
            result.unwrap();
        }

        let expected: u64 = values.iter().sum();
        assert_eq!(meter.elapsed().await, GasValue::from(expected));
    }

    #[tokio::test]
    async fn test_clones_share_the_counter() {
        let meter = GasMeter::new();
        let other = meter.clone();

        meter.tx_callback()(GasValue::from(u64::MAX)).await;
        other.tx_callback()(GasValue::from(u64::MAX)).await;

        assert_eq!(other.elapsed().await, GasValue::from(u64::MAX as u128 * 2));
    }
}
