//! Order persistence
//!
//! Repository for parent orders, detail rows, child orders and stats.
//! Mutating calls take an executor so the orchestrator can compose each
//! workflow step into one transaction; status advances are optimistic
//! conditional updates checked through `rows_affected`.

use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, postgres::PgRow};

use crate::core_types::{AdminId, ChildOrderId, ExchangeId, OrderId};
use crate::db::SafeRow;
use crate::error::CoreError;
use crate::store::Paging;

use super::types::{
    ChildOrder, Complexity, ExecStyle, OrderDetail, OrderRow, OrderStats, OrderStatus,
    OrderStatusCode, OrderType, Side,
};

/// Order repository
pub struct OrderDb {
    pool: PgPool,
}

impl OrderDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // === parent rows ===

    pub async fn insert_order(
        &self,
        conn: &mut PgConnection,
        admin_id: AdminId,
        group_id: i64,
        order_type: OrderType,
        priority: i16,
    ) -> Result<OrderId, CoreError> {
        let id = sqlx::query_scalar::<_, OrderId>(
            r#"INSERT INTO orders_tb
                   (admin_id, group_id, order_type, priority, approved_admin_id,
                    status, status_code)
               VALUES ($1, $2, $3, $4, 0, $5, $6)
               RETURNING id"#,
        )
        .bind(admin_id)
        .bind(group_id)
        .bind(order_type.id())
        .bind(priority)
        .bind(OrderStatus::New.id())
        .bind(OrderStatusCode::Decompose.id())
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Option<OrderRow>, CoreError> {
        let row = sqlx::query(
            r#"SELECT id, admin_id, group_id, order_type, priority, approved_admin_id,
                      status, status_code, enabled
               FROM orders_tb WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_order(&r)).transpose()
    }

    /// Pending orders in drain priority: cancels before replaces before
    /// news, then numeric priority descending, then id ascending.
    pub async fn list_pending(&self, paging: Paging) -> Result<Vec<OrderRow>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT id, admin_id, group_id, order_type, priority, approved_admin_id,
                      status, status_code, enabled
               FROM orders_tb
               WHERE status IN ($1, $2) AND enabled = TRUE
               ORDER BY
                   CASE order_type WHEN 3 THEN 3 WHEN 2 THEN 2 ELSE 1 END DESC,
                   priority DESC,
                   id ASC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(OrderStatus::New.id())
        .bind(OrderStatus::Doing.id())
        .bind(paging.limit)
        .bind(paging.offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    /// Optimistic approval guard: exactly one row moves, and only if the
    /// order is still unapproved and sitting at wait-approve.
    pub async fn approve_guard(
        &self,
        order_id: OrderId,
        admin_id: AdminId,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"UPDATE orders_tb
               SET approved_admin_id = $1, status = $2, status_code = $3, updated = NOW()
               WHERE id = $4 AND approved_admin_id = 0 AND status_code = $5
                 AND enabled = TRUE"#,
        )
        .bind(admin_id)
        .bind(OrderStatus::Doing.id())
        .bind(OrderStatusCode::Approved.id())
        .bind(order_id)
        .bind(OrderStatusCode::WaitApprove.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Conditional status advance keyed on the current status code.
    pub async fn advance_status(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        expected_code: OrderStatusCode,
        to_status: OrderStatus,
        to_code: OrderStatusCode,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"UPDATE orders_tb
               SET status = $1, status_code = $2, updated = NOW()
               WHERE id = $3 AND status_code = $4 AND enabled = TRUE"#,
        )
        .bind(to_status.id())
        .bind(to_code.id())
        .bind(order_id)
        .bind(expected_code.id())
        .execute(conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(CoreError::precondition(format!(
                "order {order_id} not at status code {expected_code:?}"
            )));
        }
        Ok(())
    }

    /// Park a replaceable target at state-building while its replacement's
    /// requests go out. Accepts a target already parked there, so a crashed
    /// build can be replayed.
    pub async fn mark_superseding(
        &self,
        conn: &mut PgConnection,
        target_id: OrderId,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"UPDATE orders_tb
               SET status_code = $1, updated = NOW()
               WHERE id = $2 AND status = $3 AND status_code IN ($4, $5, $1)
                 AND enabled = TRUE"#,
        )
        .bind(OrderStatusCode::StateBuilding.id())
        .bind(target_id)
        .bind(OrderStatus::Doing.id())
        .bind(OrderStatusCode::Created.id())
        .bind(OrderStatusCode::StateWaiting.id())
        .execute(conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(CoreError::precondition(format!(
                "order {target_id} is no longer replaceable"
            )));
        }
        Ok(())
    }

    /// Move a target out of state-building once its replacement settled:
    /// to state-waiting on success, back to created when the replacement
    /// fell through. Tolerant of zero rows so the caller's settle commit
    /// never rolls back over a target someone else already moved.
    pub async fn shift_target(
        &self,
        conn: &mut PgConnection,
        target_id: OrderId,
        to_code: OrderStatusCode,
    ) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"UPDATE orders_tb
               SET status_code = $1, updated = NOW()
               WHERE id = $2 AND status = $3 AND status_code = $4 AND enabled = TRUE"#,
        )
        .bind(to_code.id())
        .bind(target_id)
        .bind(OrderStatus::Doing.id())
        .bind(OrderStatusCode::StateBuilding.id())
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    // === detail rows ===

    pub async fn insert_detail(
        &self,
        conn: &mut PgConnection,
        detail: &OrderDetail,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO order_details_tb
                   (order_id, pair_id, side, exec_style, complexity,
                    amount, price, amount_price, target_order_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(detail.order_id)
        .bind(detail.pair_id)
        .bind(detail.side.id())
        .bind(detail.exec_style.id())
        .bind(detail.complexity.id())
        .bind(detail.amount)
        .bind(detail.price)
        .bind(detail.amount_price)
        .bind(detail.target_order_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn get_detail(&self, order_id: OrderId) -> Result<Option<OrderDetail>, CoreError> {
        let row = sqlx::query(
            r#"SELECT order_id, pair_id, side, exec_style, complexity,
                      amount, price, amount_price, target_order_id
               FROM order_details_tb WHERE order_id = $1"#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_detail(&r)).transpose()
    }

    pub async fn insert_cancel_detail(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        target_order_id: OrderId,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO order_cancels_tb (order_id, target_order_id) VALUES ($1, $2)"#,
        )
        .bind(order_id)
        .bind(target_order_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_exchange_assoc(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        exchange_id: ExchangeId,
    ) -> Result<(), CoreError> {
        sqlx::query(r#"INSERT INTO order_exchanges_tb (order_id, exchange_id) VALUES ($1, $2)"#)
            .bind(order_id)
            .bind(exchange_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn get_exchange_ids(&self, order_id: OrderId) -> Result<Vec<ExchangeId>, CoreError> {
        let ids = sqlx::query_scalar::<_, ExchangeId>(
            r#"SELECT exchange_id FROM order_exchanges_tb
               WHERE order_id = $1 ORDER BY exchange_id ASC"#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // === children ===

    pub async fn insert_child(
        &self,
        conn: &mut PgConnection,
        child: &ChildOrder,
    ) -> Result<ChildOrderId, CoreError> {
        let id = sqlx::query_scalar::<_, ChildOrderId>(
            r#"INSERT INTO child_orders_tb
                   (order_id, exchange_id, share, amount, remain, filled,
                    avg_price, fee, status, status_code)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING id"#,
        )
        .bind(child.order_id)
        .bind(child.exchange_id)
        .bind(child.share)
        .bind(child.amount)
        .bind(child.remain)
        .bind(child.filled)
        .bind(child.avg_price)
        .bind(child.fee)
        .bind(child.status.id())
        .bind(child.status_code.id())
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    pub async fn get_child(&self, id: ChildOrderId) -> Result<Option<ChildOrder>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CHILD_COLUMNS} FROM child_orders_tb WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_child(&r)).transpose()
    }

    pub async fn get_children(&self, order_id: OrderId) -> Result<Vec<ChildOrder>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHILD_COLUMNS} FROM child_orders_tb \
             WHERE order_id = $1 ORDER BY id ASC"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_child).collect()
    }

    /// Move one child from an expected status to a new one, recording fill
    /// data for completions. Zero affected rows means another worker got
    /// there first.
    #[allow(clippy::too_many_arguments)]
    pub async fn settle_child(
        &self,
        conn: &mut PgConnection,
        id: ChildOrderId,
        expected: OrderStatus,
        to_status: OrderStatus,
        filled: Decimal,
        avg_price: Decimal,
        fee: Decimal,
        external_order_id: Option<&str>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"UPDATE child_orders_tb
               SET status = $1, filled = $2, remain = amount - $2,
                   avg_price = $3, fee = $4,
                   external_order_id = COALESCE($5, external_order_id),
                   updated = NOW()
               WHERE id = $6 AND status = $7"#,
        )
        .bind(to_status.id())
        .bind(filled)
        .bind(avg_price)
        .bind(fee)
        .bind(external_order_id)
        .bind(id)
        .bind(expected.id())
        .execute(conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(CoreError::precondition(format!(
                "child order {id} not in status {expected:?}"
            )));
        }
        Ok(())
    }

    /// Flip all children of one parent from `expected` to `to_status`.
    pub async fn mark_children(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        expected: OrderStatus,
        to_status: OrderStatus,
    ) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"UPDATE child_orders_tb
               SET status = $1, updated = NOW()
               WHERE order_id = $2 AND status = $3"#,
        )
        .bind(to_status.id())
        .bind(order_id)
        .bind(expected.id())
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    // === stats ===

    pub async fn init_stats(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
    ) -> Result<(), CoreError> {
        sqlx::query(r#"INSERT INTO order_stats_tb (order_id) VALUES ($1)"#)
            .bind(order_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn get_stats(&self, order_id: OrderId) -> Result<Option<OrderStats>, CoreError> {
        self.fetch_stats(&self.pool, order_id).await
    }

    async fn fetch_stats<'e, E>(
        &self,
        executor: E,
        order_id: OrderId,
    ) -> Result<Option<OrderStats>, CoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let row = sqlx::query(
            r#"SELECT order_id, decomposed_total, cnt_new, cnt_doing, cnt_completed,
                      cnt_rejected, cnt_failed, cnt_special
               FROM order_stats_tb WHERE order_id = $1"#,
        )
        .bind(order_id)
        .fetch_optional(executor)
        .await?;

        row.map(|r| {
            Ok(OrderStats {
                order_id: r.try_get_log("order_id")?,
                decomposed_total: r.try_get_log("decomposed_total")?,
                cnt_new: r.try_get_log("cnt_new")?,
                cnt_doing: r.try_get_log("cnt_doing")?,
                cnt_completed: r.try_get_log("cnt_completed")?,
                cnt_rejected: r.try_get_log("cnt_rejected")?,
                cnt_failed: r.try_get_log("cnt_failed")?,
                cnt_special: r.try_get_log("cnt_special")?,
            })
        })
        .transpose()
    }

    /// Seed the counters after decomposition: total children, all new.
    /// Re-reads and re-checks the invariant inside the same transaction.
    pub async fn stats_seed(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        total: i32,
    ) -> Result<OrderStats, CoreError> {
        let result = sqlx::query(
            r#"UPDATE order_stats_tb
               SET decomposed_total = $1, cnt_new = $1, updated = NOW()
               WHERE order_id = $2 AND decomposed_total = 0"#,
        )
        .bind(total)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() != 1 {
            return Err(CoreError::precondition(format!(
                "order {order_id} already decomposed"
            )));
        }
        self.reread_checked(conn, order_id).await
    }

    /// Move `count` children between two buckets, then re-read and assert
    /// the invariant. A mismatch is a fatal consistency error; the caller's
    /// transaction rolls back.
    pub async fn stats_move(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        count: i32,
    ) -> Result<OrderStats, CoreError> {
        let from_col = bucket_column(from);
        let to_col = bucket_column(to);
        if from_col == to_col {
            return Err(CoreError::precondition(format!(
                "stats move for order {order_id}: identical buckets {from:?}"
            )));
        }

        // Column names come from the closed status enum, never from input.
        let sql = format!(
            "UPDATE order_stats_tb \
             SET {from_col} = {from_col} - $1, {to_col} = {to_col} + $1, updated = NOW() \
             WHERE order_id = $2 AND {from_col} >= $1"
        );
        let result = sqlx::query(&sql)
            .bind(count)
            .bind(order_id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() != 1 {
            return Err(CoreError::precondition(format!(
                "order {order_id} stats: cannot move {count} from {from:?} to {to:?}"
            )));
        }
        self.reread_checked(conn, order_id).await
    }

    async fn reread_checked(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
    ) -> Result<OrderStats, CoreError> {
        let stats = self
            .fetch_stats(&mut *conn, order_id)
            .await?
            .ok_or_else(|| {
                CoreError::consistency(format!("order {order_id} has no stats row"))
            })?;
        stats.check()?;
        Ok(stats)
    }
}

const CHILD_COLUMNS: &str = "id, order_id, exchange_id, share, amount, remain, filled, \
     avg_price, fee, external_order_id, status, status_code";

fn row_to_order(row: &PgRow) -> Result<OrderRow, CoreError> {
    let id: OrderId = row.try_get_log("id")?;
    let type_id: i16 = row.try_get_log("order_type")?;
    let status_id: i16 = row.try_get_log("status")?;
    let code_id: i16 = row.try_get_log("status_code")?;

    Ok(OrderRow {
        id,
        admin_id: row.try_get_log("admin_id")?,
        group_id: row.try_get_log("group_id")?,
        order_type: OrderType::from_id(type_id)
            .ok_or_else(|| CoreError::consistency(format!("order {id}: bad type {type_id}")))?,
        priority: row.try_get_log("priority")?,
        approved_admin_id: row.try_get_log("approved_admin_id")?,
        status: OrderStatus::from_id(status_id)
            .ok_or_else(|| CoreError::consistency(format!("order {id}: bad status {status_id}")))?,
        status_code: OrderStatusCode::from_id(code_id)
            .ok_or_else(|| CoreError::consistency(format!("order {id}: bad code {code_id}")))?,
        enabled: row.try_get_log("enabled")?,
    })
}

fn row_to_detail(row: &PgRow) -> Result<OrderDetail, CoreError> {
    let order_id: OrderId = row.try_get_log("order_id")?;
    let side_id: i16 = row.try_get_log("side")?;
    let style_id: i16 = row.try_get_log("exec_style")?;
    let complexity_id: i16 = row.try_get_log("complexity")?;

    Ok(OrderDetail {
        order_id,
        pair_id: row.try_get_log("pair_id")?,
        side: Side::from_id(side_id)
            .ok_or_else(|| CoreError::consistency(format!("order {order_id}: bad side")))?,
        exec_style: ExecStyle::from_id(style_id)
            .ok_or_else(|| CoreError::consistency(format!("order {order_id}: bad exec style")))?,
        complexity: Complexity::from_id(complexity_id)
            .ok_or_else(|| CoreError::consistency(format!("order {order_id}: bad complexity")))?,
        amount: row.try_get_log("amount")?,
        price: row.try_get_log("price")?,
        amount_price: row.try_get_log("amount_price")?,
        target_order_id: row.try_get_log("target_order_id")?,
    })
}

fn row_to_child(row: &PgRow) -> Result<ChildOrder, CoreError> {
    let id: ChildOrderId = row.try_get_log("id")?;
    let status_id: i16 = row.try_get_log("status")?;
    let code_id: i16 = row.try_get_log("status_code")?;

    Ok(ChildOrder {
        id,
        order_id: row.try_get_log("order_id")?,
        exchange_id: row.try_get_log("exchange_id")?,
        share: row.try_get_log("share")?,
        amount: row.try_get_log("amount")?,
        remain: row.try_get_log("remain")?,
        filled: row.try_get_log("filled")?,
        avg_price: row.try_get_log("avg_price")?,
        fee: row.try_get_log("fee")?,
        external_order_id: row.try_get_log("external_order_id")?,
        status: OrderStatus::from_id(status_id)
            .ok_or_else(|| CoreError::consistency(format!("child {id}: bad status {status_id}")))?,
        status_code: OrderStatusCode::from_id(code_id)
            .ok_or_else(|| CoreError::consistency(format!("child {id}: bad code {code_id}")))?,
    })
}

fn bucket_column(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::New => "cnt_new",
        OrderStatus::Doing => "cnt_doing",
        OrderStatus::Completed => "cnt_completed",
        OrderStatus::Rejected => "cnt_rejected",
        OrderStatus::Failed => "cnt_failed",
        OrderStatus::Special => "cnt_special",
    }
}
