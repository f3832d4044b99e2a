//! Exchange / pair configuration
//!
//! Loads the active exchanges, trading pairs and per-exchange pair rules
//! (amount/price limits plus the configured decomposition share) from
//! PostgreSQL into in-memory maps. The orchestrator validates every trade
//! intent against this view; it is refreshed by the batch runner, not per
//! request.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use sqlx::PgPool;

use crate::core_types::{CurrencyId, ExchangeId, PairId};
use crate::error::CoreError;
use crate::store;

/// One connected external exchange.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Exchange {
    pub id: ExchangeId,
    pub name: String,
    pub status: i16,
}

/// One tradeable currency pair.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Pair {
    pub id: PairId,
    pub symbol: String,
    pub base_currency_id: CurrencyId,
    pub quote_currency_id: CurrencyId,
    pub status: i16,
}

/// Per-exchange trading rule for one pair: input limits and the share of a
/// parent order this exchange receives on decomposition.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PairRule {
    pub exchange_id: ExchangeId,
    pub pair_id: PairId,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub share: Decimal,
    pub status: i16,
}

const STATUS_ACTIVE: i16 = 1;

/// In-memory market configuration view.
pub struct MarketManager {
    exchanges: FxHashMap<ExchangeId, Exchange>,
    pairs: FxHashMap<PairId, Pair>,
    rules: FxHashMap<(ExchangeId, PairId), PairRule>,
}

impl MarketManager {
    /// Load all active exchanges, pairs and rules.
    pub async fn load(pool: &PgPool) -> Result<Self, CoreError> {
        let exchanges: Vec<Exchange> = sqlx::query_as(
            r#"SELECT id, name, status FROM exchanges_tb WHERE enabled = TRUE"#,
        )
        .fetch_all(pool)
        .await?;

        let pairs: Vec<Pair> = sqlx::query_as(
            r#"SELECT id, symbol, base_currency_id, quote_currency_id, status
               FROM pairs_tb WHERE enabled = TRUE"#,
        )
        .fetch_all(pool)
        .await?;

        let rules: Vec<PairRule> = sqlx::query_as(
            r#"SELECT exchange_id, pair_id, min_amount, max_amount,
                      min_price, max_price, share, status
               FROM pair_rules_tb WHERE enabled = TRUE"#,
        )
        .fetch_all(pool)
        .await?;

        tracing::info!(
            exchanges = exchanges.len(),
            pairs = pairs.len(),
            rules = rules.len(),
            "Market configuration loaded"
        );

        Ok(Self::from_rows(exchanges, pairs, rules))
    }

    /// Build a manager from already-fetched rows. Also the test seam.
    pub fn from_rows(exchanges: Vec<Exchange>, pairs: Vec<Pair>, rules: Vec<PairRule>) -> Self {
        Self {
            exchanges: exchanges.into_iter().map(|e| (e.id, e)).collect(),
            pairs: pairs.into_iter().map(|p| (p.id, p)).collect(),
            rules: rules
                .into_iter()
                .map(|r| ((r.exchange_id, r.pair_id), r))
                .collect(),
        }
    }

    pub fn exchange_active(&self, id: ExchangeId) -> bool {
        self.exchanges
            .get(&id)
            .map(|e| e.status == STATUS_ACTIVE)
            .unwrap_or(false)
    }

    pub fn pair_active(&self, id: PairId) -> bool {
        self.pairs
            .get(&id)
            .map(|p| p.status == STATUS_ACTIVE)
            .unwrap_or(false)
    }

    /// Is the pair tradeable on this exchange (an active rule exists)?
    pub fn tradeable(&self, exchange_id: ExchangeId, pair_id: PairId) -> bool {
        self.rules
            .get(&(exchange_id, pair_id))
            .map(|r| r.status == STATUS_ACTIVE)
            .unwrap_or(false)
    }

    pub fn rule(&self, exchange_id: ExchangeId, pair_id: PairId) -> Option<&PairRule> {
        self.rules.get(&(exchange_id, pair_id))
    }

    /// Validate amount/price against one exchange's configured limits.
    /// A zero value is skipped: the opposite complexity mode leaves its
    /// counterpart field at zero by design.
    pub fn check_limits(
        &self,
        exchange_id: ExchangeId,
        pair_id: PairId,
        amount: Decimal,
        price: Decimal,
    ) -> Result<(), CoreError> {
        let rule = self.rule(exchange_id, pair_id).ok_or_else(|| {
            CoreError::validation(
                "exchangeId",
                format!("pair {pair_id} is not tradeable on exchange {exchange_id}"),
            )
        })?;

        if amount != Decimal::ZERO {
            store::in_range("amount", amount, rule.min_amount, rule.max_amount)?;
        }
        if price != Decimal::ZERO {
            store::in_range("price", price, rule.min_price, rule.max_price)?;
        }
        Ok(())
    }

    /// Configured decomposition shares for the given exchanges on one pair.
    /// Each share must be in (0, 1] and the sum must not exceed 1.0.
    pub fn shares(
        &self,
        pair_id: PairId,
        exchange_ids: &[ExchangeId],
    ) -> Result<Vec<(ExchangeId, Decimal)>, CoreError> {
        let mut out = Vec::with_capacity(exchange_ids.len());
        let mut total = Decimal::ZERO;

        for &exchange_id in exchange_ids {
            let rule = self.rule(exchange_id, pair_id).ok_or_else(|| {
                CoreError::validation(
                    "exchangeId",
                    format!("no rule for exchange {exchange_id} / pair {pair_id}"),
                )
            })?;
            store::fraction("share", rule.share)?;
            total += rule.share;
            out.push((exchange_id, rule.share));
        }

        if total > Decimal::ONE {
            return Err(CoreError::validation(
                "share",
                format!("shares sum to {total}, must not exceed 1.0"),
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    pub(crate) fn sample_manager() -> MarketManager {
        let exchanges = vec![
            Exchange {
                id: 1,
                name: "E1".into(),
                status: STATUS_ACTIVE,
            },
            Exchange {
                id: 2,
                name: "E2".into(),
                status: STATUS_ACTIVE,
            },
            Exchange {
                id: 3,
                name: "E3".into(),
                status: 0,
            },
        ];
        let pairs = vec![Pair {
            id: 10,
            symbol: "BTC_USD".into(),
            base_currency_id: 2,
            quote_currency_id: 1,
            status: STATUS_ACTIVE,
        }];
        let rules = vec![
            PairRule {
                exchange_id: 1,
                pair_id: 10,
                min_amount: dec("0.01"),
                max_amount: dec("100"),
                min_price: dec("1"),
                max_price: dec("1000000"),
                share: dec("0.6"),
                status: STATUS_ACTIVE,
            },
            PairRule {
                exchange_id: 2,
                pair_id: 10,
                min_amount: dec("0.01"),
                max_amount: dec("100"),
                min_price: dec("1"),
                max_price: dec("1000000"),
                share: dec("0.4"),
                status: STATUS_ACTIVE,
            },
        ];
        MarketManager::from_rows(exchanges, pairs, rules)
    }

    #[test]
    fn active_lookups() {
        let m = sample_manager();
        assert!(m.exchange_active(1));
        assert!(!m.exchange_active(3)); // disabled status
        assert!(!m.exchange_active(99)); // unknown
        assert!(m.pair_active(10));
        assert!(m.tradeable(1, 10));
        assert!(!m.tradeable(3, 10));
    }

    #[test]
    fn limits_enforced_per_exchange() {
        let m = sample_manager();
        assert!(m.check_limits(1, 10, dec("10"), dec("100")).is_ok());
        assert!(m.check_limits(1, 10, dec("0.001"), dec("100")).is_err());
        assert!(m.check_limits(1, 10, dec("10"), dec("2000000")).is_err());
        // Zero fields belong to the other complexity mode and are skipped.
        assert!(m.check_limits(1, 10, dec("10"), Decimal::ZERO).is_ok());
    }

    #[test]
    fn shares_validated_and_summed() {
        let m = sample_manager();
        let shares = m.shares(10, &[1, 2]).unwrap();
        assert_eq!(shares, vec![(1, dec("0.6")), (2, dec("0.4"))]);
        assert!(m.shares(10, &[1, 99]).is_err());
    }
}
