//! Total Balance aggregation
//!
//! Derives one row per (currency, balance type) from the enabled system and
//! user balances. Status derivation works over the union of non-zero status
//! buckets: "all equal" only applies when that union has exactly one key.
//! A changed aggregate appends one log row; an unchanged recompute writes
//! nothing.

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::core_types::CurrencyId;
use crate::error::CoreError;

use super::db::BalanceDb;
use super::types::{
    BalanceOp, BalanceRow, BalanceStatus, BalanceStatusCode, BalanceType, Holder,
};

/// Per-status composing-row counts with zero buckets removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusBuckets {
    pub new: u32,
    pub syncing: u32,
    pub synced: u32,
    pub failed: u32,
    pub special: u32,
}

impl StatusBuckets {
    pub fn count(rows: &[BalanceRow]) -> Self {
        let mut buckets = StatusBuckets::default();
        for row in rows {
            match row.status {
                BalanceStatus::New => buckets.new += 1,
                BalanceStatus::Syncing => buckets.syncing += 1,
                BalanceStatus::Synced => buckets.synced += 1,
                BalanceStatus::Failed => buckets.failed += 1,
                BalanceStatus::Special => buckets.special += 1,
            }
        }
        buckets
    }

    fn distinct(&self) -> u32 {
        [self.new, self.syncing, self.synced, self.failed, self.special]
            .iter()
            .filter(|&&c| c > 0)
            .count() as u32
    }
}

/// Derive the aggregate status from composing-row buckets.
///
/// (a) exactly one non-zero bucket: adopt it (synced gets the clean code);
/// (b) otherwise any syncing wins; (c) otherwise any synced wins, with a
/// code naming the worst co-resident bucket; anything left is failed.
pub fn derive_status(buckets: StatusBuckets) -> (BalanceStatus, BalanceStatusCode) {
    if buckets.distinct() == 1 {
        let status = if buckets.new > 0 {
            BalanceStatus::New
        } else if buckets.syncing > 0 {
            BalanceStatus::Syncing
        } else if buckets.synced > 0 {
            BalanceStatus::Synced
        } else if buckets.failed > 0 {
            BalanceStatus::Failed
        } else {
            BalanceStatus::Special
        };
        let code = if status == BalanceStatus::Synced {
            BalanceStatusCode::SyncedClean
        } else {
            BalanceStatusCode::None
        };
        return (status, code);
    }

    if buckets.syncing > 0 {
        return (BalanceStatus::Syncing, BalanceStatusCode::None);
    }
    if buckets.synced > 0 {
        let code = if buckets.failed > 0 {
            BalanceStatusCode::SyncedSomeFailed
        } else if buckets.new > 0 {
            BalanceStatusCode::SyncedSomeNew
        } else {
            BalanceStatusCode::SyncedClean
        };
        return (BalanceStatus::Synced, code);
    }
    (BalanceStatus::Failed, BalanceStatusCode::None)
}

/// Total Balance recomputation service.
pub struct TotalBalance {
    db: BalanceDb,
}

impl TotalBalance {
    pub fn new(db: BalanceDb) -> Self {
        Self { db }
    }

    /// Recompute the total row for one (currency, type). Returns true when
    /// the aggregate changed and a log row was appended.
    pub async fn recompute(
        &self,
        currency_id: CurrencyId,
        balance_type: BalanceType,
    ) -> Result<bool, CoreError> {
        let composing = self.db.composing_rows(currency_id, balance_type).await?;
        if composing.is_empty() {
            debug!(currency_id, ?balance_type, "No composing rows, total skipped");
            return Ok(false);
        }

        let (status, status_code) = derive_status(StatusBuckets::count(&composing));

        let mut total = BalanceRow {
            id: 0,
            holder: Holder::total(),
            currency_id,
            balance_type,
            amount: Decimal::ZERO,
            amount_in_usd: Decimal::ZERO,
            available: Decimal::ZERO,
            available_in_usd: Decimal::ZERO,
            hold: Decimal::ZERO,
            hold_in_usd: Decimal::ZERO,
            status,
            status_code,
            enabled: true,
        };
        for row in &composing {
            total.amount += row.amount;
            total.amount_in_usd += row.amount_in_usd;
            total.available += row.available;
            total.available_in_usd += row.available_in_usd;
            total.hold += row.hold;
            total.hold_in_usd += row.hold_in_usd;
        }

        // Aggregate must satisfy the same row invariants as any balance.
        total.check()?;

        let stored = self.db.get_total(currency_id, balance_type).await?;
        if let Some(ref stored) = stored {
            let unchanged = stored.amount == total.amount
                && stored.amount_in_usd == total.amount_in_usd
                && stored.available == total.available
                && stored.available_in_usd == total.available_in_usd
                && stored.hold == total.hold
                && stored.hold_in_usd == total.hold_in_usd
                && stored.status == total.status
                && stored.status_code == total.status_code;
            if unchanged {
                self.db.touch_synced(stored.id).await?;
                return Ok(false);
            }
        }

        let mut tx = self.db.pool().begin().await?;
        let id = self.db.upsert_total(&mut *tx, &total).await?;
        total.id = id;
        self.db
            .append_log(&mut *tx, &total, BalanceOp::Aggregate, status_code.id())
            .await?;
        tx.commit().await?;

        info!(
            currency_id,
            ?balance_type,
            ?status,
            ?status_code,
            "Total balance recomputed"
        );
        Ok(true)
    }

    /// Sweep every (currency, type) present among composing rows.
    /// The scheduler's periodic entry point.
    pub async fn recompute_all(&self) -> Result<u32, CoreError> {
        let mut changed = 0;
        for (currency_id, balance_type) in self.db.distinct_currency_types().await? {
            if self.recompute(currency_id, balance_type).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets(new: u32, syncing: u32, synced: u32, failed: u32, special: u32) -> StatusBuckets {
        StatusBuckets {
            new,
            syncing,
            synced,
            failed,
            special,
        }
    }

    #[test]
    fn all_synced_is_clean() {
        // system synced x3 + user synced x2, none failed or new
        assert_eq!(
            derive_status(buckets(0, 0, 5, 0, 0)),
            (BalanceStatus::Synced, BalanceStatusCode::SyncedClean)
        );
    }

    #[test]
    fn one_failed_downgrades_synced() {
        assert_eq!(
            derive_status(buckets(0, 0, 5, 1, 0)),
            (BalanceStatus::Synced, BalanceStatusCode::SyncedSomeFailed)
        );
    }

    #[test]
    fn some_new_downgrades_synced() {
        assert_eq!(
            derive_status(buckets(2, 0, 3, 0, 0)),
            (BalanceStatus::Synced, BalanceStatusCode::SyncedSomeNew)
        );
    }

    #[test]
    fn any_syncing_wins_over_mixed() {
        assert_eq!(
            derive_status(buckets(1, 1, 3, 1, 0)),
            (BalanceStatus::Syncing, BalanceStatusCode::None)
        );
    }

    #[test]
    fn single_bucket_adopted_directly() {
        assert_eq!(
            derive_status(buckets(4, 0, 0, 0, 0)),
            (BalanceStatus::New, BalanceStatusCode::None)
        );
        assert_eq!(
            derive_status(buckets(0, 0, 0, 2, 0)),
            (BalanceStatus::Failed, BalanceStatusCode::None)
        );
        assert_eq!(
            derive_status(buckets(0, 3, 0, 0, 0)),
            (BalanceStatus::Syncing, BalanceStatusCode::None)
        );
    }

    #[test]
    fn failed_plus_new_without_synced_is_failed() {
        assert_eq!(
            derive_status(buckets(1, 0, 0, 2, 0)),
            (BalanceStatus::Failed, BalanceStatusCode::None)
        );
    }
}
