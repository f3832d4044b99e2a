//! Currency rate seam
//!
//! USD conversion is an external collaborator; the ledger only needs one
//! call. The trait is object-safe so the batch runner can inject whatever
//! feed it has.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::core_types::CurrencyId;
use crate::error::CoreError;

#[async_trait]
pub trait RateProvider: Send + Sync {
    /// USD per one unit of `currency`.
    async fn usd_rate(&self, currency: CurrencyId) -> Result<Decimal, CoreError>;
}

/// Map-backed provider for tests and fixed-rate deployments.
pub struct FixedRateProvider {
    rates: FxHashMap<CurrencyId, Decimal>,
}

impl FixedRateProvider {
    pub fn new(rates: impl IntoIterator<Item = (CurrencyId, Decimal)>) -> Self {
        Self {
            rates: rates.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RateProvider for FixedRateProvider {
    async fn usd_rate(&self, currency: CurrencyId) -> Result<Decimal, CoreError> {
        self.rates
            .get(&currency)
            .copied()
            .ok_or(CoreError::RateUnavailable(currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_provider_returns_known_rates() {
        let provider = FixedRateProvider::new([(2, Decimal::new(100, 0))]);
        assert_eq!(provider.usd_rate(2).await.unwrap(), Decimal::new(100, 0));
        assert!(matches!(
            provider.usd_rate(3).await,
            Err(CoreError::RateUnavailable(3))
        ));
    }
}
