//! Balance persistence
//!
//! Repository for `balances_tb` and `balance_logs_tb`. Mutating calls are
//! executor-parameterized so the ledger can compose row update + log append
//! in one transaction.

use sqlx::{PgConnection, PgPool, postgres::PgRow};

use crate::core_types::{BalanceId, CurrencyId};
use crate::db::SafeRow;
use crate::error::CoreError;

use super::types::{
    BalanceOp, BalanceRow, BalanceStatus, BalanceStatusCode, BalanceType, Holder, HolderKind,
};

const BALANCE_COLUMNS: &str = "id, holder_kind, holder_id, currency_id, balance_type, \
     amount, amount_in_usd, available, available_in_usd, hold, hold_in_usd, \
     status, status_code, enabled";

/// Balance repository
pub struct BalanceDb {
    pool: PgPool,
}

impl BalanceDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch one balance row by its natural key.
    pub async fn get(
        &self,
        holder: Holder,
        currency_id: CurrencyId,
        balance_type: BalanceType,
    ) -> Result<Option<BalanceRow>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances_tb \
             WHERE holder_kind = $1 AND holder_id = $2 \
               AND currency_id = $3 AND balance_type = $4"
        ))
        .bind(holder.kind.id())
        .bind(holder.holder_id)
        .bind(currency_id)
        .bind(balance_type.id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_balance(&r)).transpose()
    }

    /// All enabled system/user rows composing one (currency, type) total.
    pub async fn composing_rows(
        &self,
        currency_id: CurrencyId,
        balance_type: BalanceType,
    ) -> Result<Vec<BalanceRow>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances_tb \
             WHERE currency_id = $1 AND balance_type = $2 \
               AND holder_kind IN ($3, $4) AND enabled = TRUE \
             ORDER BY id ASC"
        ))
        .bind(currency_id)
        .bind(balance_type.id())
        .bind(HolderKind::System.id())
        .bind(HolderKind::User.id())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_balance).collect()
    }

    /// Distinct (currency, type) combinations present among enabled
    /// system/user rows; the sweep domain for total recomputation.
    pub async fn distinct_currency_types(
        &self,
    ) -> Result<Vec<(CurrencyId, BalanceType)>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT DISTINCT currency_id, balance_type FROM balances_tb
               WHERE holder_kind IN ($1, $2) AND enabled = TRUE
               ORDER BY currency_id, balance_type"#,
        )
        .bind(HolderKind::System.id())
        .bind(HolderKind::User.id())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let currency_id: CurrencyId = r.try_get_log("currency_id")?;
                let type_id: i16 = r.try_get_log("balance_type")?;
                let balance_type = BalanceType::from_id(type_id).ok_or_else(|| {
                    CoreError::consistency(format!("unknown balance_type {type_id} in balances_tb"))
                })?;
                Ok((currency_id, balance_type))
            })
            .collect()
    }

    /// Write the monetary fields and status of an existing row. Caller has
    /// already validated invariants; runs on the caller's transaction.
    pub async fn update_funds(
        &self,
        conn: &mut PgConnection,
        row: &BalanceRow,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"UPDATE balances_tb
               SET amount = $1, amount_in_usd = $2,
                   available = $3, available_in_usd = $4,
                   hold = $5, hold_in_usd = $6,
                   status = $7, status_code = $8,
                   synced_at = NOW(), updated = NOW()
               WHERE id = $9 AND enabled = TRUE"#,
        )
        .bind(row.amount)
        .bind(row.amount_in_usd)
        .bind(row.available)
        .bind(row.available_in_usd)
        .bind(row.hold)
        .bind(row.hold_in_usd)
        .bind(row.status.id())
        .bind(row.status_code.id())
        .bind(row.id)
        .execute(conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(CoreError::precondition(format!(
                "balance {} missing or disabled during funds update",
                row.id
            )));
        }
        Ok(())
    }

    /// Refresh only the sync timestamp (idempotent re-sync with unchanged
    /// values: no monetary write, no log row).
    pub async fn touch_synced(&self, id: BalanceId) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE balances_tb SET synced_at = NOW(), updated = NOW()
               WHERE id = $1 AND enabled = TRUE"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Status lifecycle writer.
    pub async fn set_status(
        &self,
        id: BalanceId,
        status: BalanceStatus,
        code: BalanceStatusCode,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"UPDATE balances_tb SET status = $1, status_code = $2, updated = NOW()
               WHERE id = $3 AND enabled = TRUE"#,
        )
        .bind(status.id())
        .bind(code.id())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append one audit log row snapshotting the post-operation state.
    /// Same transaction as the mutation it records.
    pub async fn append_log(
        &self,
        conn: &mut PgConnection,
        row: &BalanceRow,
        op: BalanceOp,
        op_code: i16,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO balance_logs_tb
                   (balance_id, op_type, op_code,
                    amount, amount_in_usd, available, available_in_usd, hold, hold_in_usd)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(row.id)
        .bind(op.id())
        .bind(op_code)
        .bind(row.amount)
        .bind(row.amount_in_usd)
        .bind(row.available)
        .bind(row.available_in_usd)
        .bind(row.hold)
        .bind(row.hold_in_usd)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Fetch the total row for (currency, type), if it exists yet.
    pub async fn get_total(
        &self,
        currency_id: CurrencyId,
        balance_type: BalanceType,
    ) -> Result<Option<BalanceRow>, CoreError> {
        self.get(Holder::total(), currency_id, balance_type).await
    }

    /// Upsert the aggregate row, returning its id.
    pub async fn upsert_total(
        &self,
        conn: &mut PgConnection,
        row: &BalanceRow,
    ) -> Result<BalanceId, CoreError> {
        let id = sqlx::query_scalar::<_, BalanceId>(
            r#"INSERT INTO balances_tb
                   (holder_kind, holder_id, currency_id, balance_type,
                    amount, amount_in_usd, available, available_in_usd,
                    hold, hold_in_usd, status, status_code, synced_at)
               VALUES ($1, 0, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
               ON CONFLICT (holder_kind, holder_id, currency_id, balance_type)
               DO UPDATE SET
                   amount = EXCLUDED.amount,
                   amount_in_usd = EXCLUDED.amount_in_usd,
                   available = EXCLUDED.available,
                   available_in_usd = EXCLUDED.available_in_usd,
                   hold = EXCLUDED.hold,
                   hold_in_usd = EXCLUDED.hold_in_usd,
                   status = EXCLUDED.status,
                   status_code = EXCLUDED.status_code,
                   synced_at = NOW(),
                   updated = NOW()
               RETURNING id"#,
        )
        .bind(HolderKind::Total.id())
        .bind(row.currency_id)
        .bind(row.balance_type.id())
        .bind(row.amount)
        .bind(row.amount_in_usd)
        .bind(row.available)
        .bind(row.available_in_usd)
        .bind(row.hold)
        .bind(row.hold_in_usd)
        .bind(row.status.id())
        .bind(row.status_code.id())
        .fetch_one(conn)
        .await?;

        Ok(id)
    }

    /// Count audit log rows for one balance (test and report helper).
    pub async fn count_logs(&self, balance_id: BalanceId) -> Result<i64, CoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM balance_logs_tb WHERE balance_id = $1"#,
        )
        .bind(balance_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn row_to_balance(row: &PgRow) -> Result<BalanceRow, CoreError> {
    let id: BalanceId = row.try_get_log("id")?;
    let kind_id: i16 = row.try_get_log("holder_kind")?;
    let kind = HolderKind::from_id(kind_id)
        .ok_or_else(|| CoreError::consistency(format!("balance {id}: bad holder_kind {kind_id}")))?;
    let type_id: i16 = row.try_get_log("balance_type")?;
    let balance_type = BalanceType::from_id(type_id)
        .ok_or_else(|| CoreError::consistency(format!("balance {id}: bad balance_type {type_id}")))?;
    let status_id: i16 = row.try_get_log("status")?;
    let status = BalanceStatus::from_id(status_id)
        .ok_or_else(|| CoreError::consistency(format!("balance {id}: bad status {status_id}")))?;
    let code_id: i16 = row.try_get_log("status_code")?;
    let status_code = BalanceStatusCode::from_id(code_id)
        .ok_or_else(|| CoreError::consistency(format!("balance {id}: bad status code {code_id}")))?;

    Ok(BalanceRow {
        id,
        holder: Holder {
            kind,
            holder_id: row.try_get_log("holder_id")?,
        },
        currency_id: row.try_get_log("currency_id")?,
        balance_type,
        amount: row.try_get_log("amount")?,
        amount_in_usd: row.try_get_log("amount_in_usd")?,
        available: row.try_get_log("available")?,
        available_in_usd: row.try_get_log("available_in_usd")?,
        hold: row.try_get_log("hold")?,
        hold_in_usd: row.try_get_log("hold_in_usd")?,
        status,
        status_code,
        enabled: row.try_get_log("enabled")?,
    })
}
