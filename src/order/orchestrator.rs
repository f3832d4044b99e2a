//! Order workflow
//!
//! Validates trade intents, persists them, decomposes them into child
//! orders, and drives the parent state machine through approval, request
//! building and settlement. All validation happens before the first write;
//! every multi-row step is one transaction; consistency failures roll the
//! whole step back. Remote outcomes come back through the outbox as data,
//! never as exceptions raised here.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::apikey::ApiKeyDb;
use crate::core_types::{AdminId, BALANCE_SCALE, ChildOrderId, OrderId, truncate};
use crate::error::CoreError;
use crate::market::MarketManager;
use crate::outbox::{
    CredentialRef, OutboxDb, RequestBatch, RequestDescriptor, RequesterType, make_str_id,
};
use crate::store;

use super::db::OrderDb;
use super::types::{
    AdminRole, CANCELLABLE_CODES, ChildOrder, ChildOutcome, Complexity, OrderDetail, OrderInput,
    OrderIntent, OrderRow, OrderStatus, OrderStatusCode, OrderType, REPLACEABLE_CODES,
};

/// Replace precondition: target must be a new/replace order sitting in
/// "doing" at a replaceable status code.
pub fn check_order_to_replace(target: &OrderRow) -> Result<(), CoreError> {
    if !matches!(target.order_type, OrderType::New | OrderType::Replace) {
        return Err(CoreError::precondition(format!(
            "order {} is a {:?} order, only new/replace can be replaced",
            target.id, target.order_type
        )));
    }
    if target.status != OrderStatus::Doing || !REPLACEABLE_CODES.contains(&target.status_code) {
        return Err(CoreError::precondition(format!(
            "order {} at {:?}/{:?} cannot be replaced",
            target.id, target.status, target.status_code
        )));
    }
    Ok(())
}

/// Cancel precondition: wider code window than replace, but the target
/// must still be early enough in its lifecycle.
pub fn check_order_to_cancel(target: &OrderRow) -> Result<(), CoreError> {
    if !matches!(target.order_type, OrderType::New | OrderType::Replace) {
        return Err(CoreError::precondition(format!(
            "order {} is a {:?} order, only new/replace can be cancelled",
            target.id, target.order_type
        )));
    }
    if !matches!(target.status, OrderStatus::New | OrderStatus::Doing)
        || !CANCELLABLE_CODES.contains(&target.status_code)
    {
        return Err(CoreError::precondition(format!(
            "order {} at {:?}/{:?} cannot be cancelled",
            target.id, target.status, target.status_code
        )));
    }
    Ok(())
}

/// Order workflow service.
pub struct Orchestrator {
    db: OrderDb,
    market: Arc<MarketManager>,
    keys: ApiKeyDb,
    outbox: OutboxDb,
}

impl Orchestrator {
    pub fn new(db: OrderDb, market: Arc<MarketManager>, keys: ApiKeyDb, outbox: OutboxDb) -> Self {
        Self {
            db,
            market,
            keys,
            outbox,
        }
    }

    pub fn db(&self) -> &OrderDb {
        &self.db
    }

    fn validate_intent(&self, intent: &OrderIntent) -> Result<(), CoreError> {
        store::known_id("adminId", intent.admin_id)?;
        if !self.market.pair_active(intent.pair_id) {
            return Err(CoreError::validation(
                "pairId",
                format!("pair {} is not active", intent.pair_id),
            ));
        }
        if intent.exchange_ids.is_empty() {
            return Err(CoreError::validation(
                "exchangeIds",
                "at least one target exchange is required",
            ));
        }

        // Exactly one input mode is populated; the enum closes the door on
        // "both", the branches reject the degenerate zero cases.
        let (amount, price) = match intent.input {
            OrderInput::Amount { amount, price } => {
                store::positive("amount", amount)?;
                store::non_negative("price", price)?;
                (amount, price)
            }
            OrderInput::Price { amount_price } => {
                store::positive("amountPrice", amount_price)?;
                (Decimal::ZERO, Decimal::ZERO)
            }
        };

        for &exchange_id in &intent.exchange_ids {
            if !self.market.exchange_active(exchange_id) {
                return Err(CoreError::validation(
                    "exchangeIds",
                    format!("exchange {exchange_id} is not active"),
                ));
            }
            if !self.market.tradeable(exchange_id, intent.pair_id) {
                return Err(CoreError::validation(
                    "exchangeIds",
                    format!(
                        "pair {} is not tradeable on exchange {exchange_id}",
                        intent.pair_id
                    ),
                ));
            }
            self.market
                .check_limits(exchange_id, intent.pair_id, amount, price)?;
        }
        Ok(())
    }

    /// Persist a validated "new" intent: parent + detail + one exchange
    /// association per target + zeroed stats, in one transaction.
    pub async fn insert_order_new(&self, intent: &OrderIntent) -> Result<OrderId, CoreError> {
        self.insert_trade_order(intent, OrderType::New, None).await
    }

    /// Persist a "replace" intent against an existing target order.
    pub async fn insert_order_replace(
        &self,
        intent: &OrderIntent,
        target_order_id: OrderId,
    ) -> Result<OrderId, CoreError> {
        let target = self
            .db
            .get_order(target_order_id)
            .await?
            .ok_or_else(|| {
                CoreError::precondition(format!("replace target {target_order_id} not found"))
            })?;
        check_order_to_replace(&target)?;
        self.insert_trade_order(intent, OrderType::Replace, Some(target_order_id))
            .await
    }

    async fn insert_trade_order(
        &self,
        intent: &OrderIntent,
        order_type: OrderType,
        target_order_id: Option<OrderId>,
    ) -> Result<OrderId, CoreError> {
        self.validate_intent(intent)?;
        // Shares must be well-formed before anything persists.
        self.market.shares(intent.pair_id, &intent.exchange_ids)?;

        let (amount, price, amount_price) = intent.input.columns();
        let complexity = match intent.input {
            OrderInput::Amount { .. } => Complexity::Amount,
            OrderInput::Price { .. } => Complexity::Price,
        };

        let mut tx = self.db.pool().begin().await?;
        let order_id = self
            .db
            .insert_order(
                &mut *tx,
                intent.admin_id,
                intent.group_id,
                order_type,
                intent.priority,
            )
            .await?;
        self.db
            .insert_detail(
                &mut *tx,
                &OrderDetail {
                    order_id,
                    pair_id: intent.pair_id,
                    side: intent.side,
                    exec_style: intent.exec_style,
                    complexity,
                    amount,
                    price,
                    amount_price,
                    target_order_id,
                },
            )
            .await?;
        for &exchange_id in &intent.exchange_ids {
            self.db
                .insert_exchange_assoc(&mut *tx, order_id, exchange_id)
                .await?;
        }
        self.db.init_stats(&mut *tx, order_id).await?;
        tx.commit().await?;

        info!(order_id, ?order_type, "Order inserted");
        Ok(order_id)
    }

    /// Persist a "cancel" intent targeting an in-flight order.
    pub async fn insert_order_cancel(
        &self,
        admin_id: AdminId,
        group_id: i64,
        target_order_id: OrderId,
        priority: i16,
    ) -> Result<OrderId, CoreError> {
        store::known_id("adminId", admin_id)?;
        let target = self
            .db
            .get_order(target_order_id)
            .await?
            .ok_or_else(|| {
                CoreError::precondition(format!("cancel target {target_order_id} not found"))
            })?;
        check_order_to_cancel(&target)?;

        let mut tx = self.db.pool().begin().await?;
        let order_id = self
            .db
            .insert_order(&mut *tx, admin_id, group_id, OrderType::Cancel, priority)
            .await?;
        self.db
            .insert_cancel_detail(&mut *tx, order_id, target_order_id)
            .await?;
        self.db.init_stats(&mut *tx, order_id).await?;
        tx.commit().await?;

        info!(order_id, target_order_id, "Cancel order inserted");
        Ok(order_id)
    }

    /// Split the parent into per-exchange children by configured share,
    /// then move the parent to wait-approve. Only valid at (new, decompose).
    pub async fn decompose(&self, order_id: OrderId) -> Result<Vec<ChildOrderId>, CoreError> {
        let order = self.require_order(order_id).await?;
        if order.status != OrderStatus::New || order.status_code != OrderStatusCode::Decompose {
            return Err(CoreError::precondition(format!(
                "order {order_id} at {:?}/{:?} is not awaiting decomposition",
                order.status, order.status_code
            )));
        }
        let detail = self.db.get_detail(order_id).await?.ok_or_else(|| {
            CoreError::consistency(format!("order {order_id} has no detail row"))
        })?;
        let exchange_ids = self.db.get_exchange_ids(order_id).await?;
        let shares = self.market.shares(detail.pair_id, &exchange_ids)?;
        let base = detail.decompose_base();

        let mut tx = self.db.pool().begin().await?;
        let mut child_ids = Vec::with_capacity(shares.len());
        for (exchange_id, share) in &shares {
            let slice = truncate(base * share, BALANCE_SCALE);
            let child = ChildOrder {
                id: 0,
                order_id,
                exchange_id: *exchange_id,
                share: *share,
                amount: slice,
                remain: slice,
                filled: Decimal::ZERO,
                avg_price: Decimal::ZERO,
                fee: Decimal::ZERO,
                external_order_id: None,
                status: OrderStatus::New,
                status_code: OrderStatusCode::None,
            };
            child_ids.push(self.db.insert_child(&mut *tx, &child).await?);
        }
        self.db
            .stats_seed(&mut *tx, order_id, child_ids.len() as i32)
            .await?;
        self.db
            .advance_status(
                &mut *tx,
                order_id,
                OrderStatusCode::Decompose,
                OrderStatus::New,
                OrderStatusCode::WaitApprove,
            )
            .await?;
        tx.commit().await?;

        info!(order_id, children = child_ids.len(), "Order decomposed");
        Ok(child_ids)
    }

    /// Approve an order waiting for approval.
    ///
    /// Role check happens before any write; the state check is the
    /// optimistic single-row guard, so two racing admins cannot both win.
    pub async fn approve(
        &self,
        order_id: OrderId,
        admin_id: AdminId,
        role: AdminRole,
    ) -> Result<(), CoreError> {
        if !role.can_approve() {
            return Err(CoreError::validation(
                "adminRole",
                format!("{role:?} cannot approve orders"),
            ));
        }
        store::known_id("adminId", admin_id)?;

        if !self.db.approve_guard(order_id, admin_id).await? {
            return Err(CoreError::precondition(format!(
                "order {order_id} is not awaiting approval (already approved or wrong phase)"
            )));
        }
        info!(order_id, admin_id, "Order approved");
        Ok(())
    }

    /// Build one outbox request per child and flush them in the same
    /// transaction that advances the parent to wait-requests and the
    /// children to doing.
    ///
    /// Starts with a claim commit moving the parent from approved to
    /// build-requests: a competing builder loses the claim, and a crash
    /// mid-build leaves the order visibly at build-requests, where calling
    /// this again replays the build (the outbox fingerprints make the
    /// flush idempotent).
    pub async fn build_requests(&self, order_id: OrderId) -> Result<String, CoreError> {
        let order = self.require_order(order_id).await?;
        let resuming = match (order.status, order.status_code) {
            (OrderStatus::Doing, OrderStatusCode::Approved) => false,
            (OrderStatus::Doing, OrderStatusCode::BuildRequests) => true,
            _ => {
                return Err(CoreError::precondition(format!(
                    "order {order_id} at {:?}/{:?} is not ready for request building",
                    order.status, order.status_code
                )));
            }
        };
        let detail = self.db.get_detail(order_id).await?.ok_or_else(|| {
            CoreError::consistency(format!("order {order_id} has no detail row"))
        })?;
        let children = self.db.get_children(order_id).await?;
        if children.is_empty() {
            return Err(CoreError::precondition(format!(
                "order {order_id} has no decomposed children"
            )));
        }

        if !resuming {
            let mut conn = self.db.pool().acquire().await?;
            self.db
                .advance_status(
                    &mut *conn,
                    order_id,
                    OrderStatusCode::Approved,
                    OrderStatus::Doing,
                    OrderStatusCode::BuildRequests,
                )
                .await?;
        }

        let group_str_id = make_str_id("order-group", &[&order_id.to_string()]);
        let mut batch = RequestBatch::new();
        for child in &children {
            let key = self.system_key_for(child.exchange_id).await?;
            let body = json!({
                "pair_id": detail.pair_id,
                "side": detail.side.as_str(),
                "amount": child.amount,
                "price": detail.price,
                "client_ref": child.id,
            });
            batch.push(RequestDescriptor {
                str_id: make_str_id(
                    "child-order",
                    &[&order_id.to_string(), &child.id.to_string()],
                ),
                group_str_id: group_str_id.clone(),
                credential: CredentialRef::SystemKey(key),
                exchange_id: child.exchange_id,
                requester_type: RequesterType::Order,
                method: "POST".into(),
                url: "/v1/order".into(),
                headers: "{}".into(),
                body: body.to_string(),
            })?;
        }

        let mut tx = self.db.pool().begin().await?;
        batch.flush(&mut *tx).await?;
        if order.order_type == OrderType::Replace {
            let target_id = detail.target_order_id.ok_or_else(|| {
                CoreError::consistency(format!("replace order {order_id} has no target"))
            })?;
            self.db.mark_superseding(&mut *tx, target_id).await?;
        }
        let moved = self
            .db
            .mark_children(&mut *tx, order_id, OrderStatus::New, OrderStatus::Doing)
            .await?;
        if moved > 0 {
            self.db
                .stats_move(
                    &mut *tx,
                    order_id,
                    OrderStatus::New,
                    OrderStatus::Doing,
                    moved as i32,
                )
                .await?;
        }
        self.db
            .advance_status(
                &mut *tx,
                order_id,
                OrderStatusCode::BuildRequests,
                OrderStatus::Doing,
                OrderStatusCode::WaitRequests,
            )
            .await?;
        tx.commit().await?;

        info!(order_id, requests = children.len(), "Order requests built");
        Ok(group_str_id)
    }

    /// Record one child's terminal outcome, keep the stats invariant, and
    /// settle the parent once no child remains open: any failure fails it,
    /// all-rejected rejects it, otherwise it is created at the exchanges
    /// and stays doing until finalized or replaced. Settling a replace
    /// order also moves its superseded target on.
    pub async fn complete_child(
        &self,
        child_id: ChildOrderId,
        outcome: ChildOutcome,
    ) -> Result<(), CoreError> {
        let child = self.db.get_child(child_id).await?.ok_or_else(|| {
            CoreError::precondition(format!("child order {child_id} not found"))
        })?;
        if child.status != OrderStatus::Doing {
            return Err(CoreError::precondition(format!(
                "child order {child_id} at {:?} is not in flight",
                child.status
            )));
        }
        let parent = self.require_order(child.order_id).await?;
        let replace_target = if parent.order_type == OrderType::Replace {
            self.db
                .get_detail(child.order_id)
                .await?
                .and_then(|d| d.target_order_id)
        } else {
            None
        };

        let to_status = outcome.status();
        let (filled, avg_price, fee, external) = match &outcome {
            ChildOutcome::Completed {
                filled,
                avg_price,
                fee,
                external_order_id,
            } => (*filled, *avg_price, *fee, Some(external_order_id.as_str())),
            ChildOutcome::Rejected | ChildOutcome::Failed => {
                (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, None)
            }
        };

        let mut tx = self.db.pool().begin().await?;
        self.db
            .settle_child(
                &mut *tx,
                child_id,
                OrderStatus::Doing,
                to_status,
                filled,
                avg_price,
                fee,
                external,
            )
            .await?;
        let stats = self
            .db
            .stats_move(&mut *tx, child.order_id, OrderStatus::Doing, to_status, 1)
            .await?;

        if stats.all_settled() {
            // Doing/created = live at the exchanges, awaiting finalize or
            // replace. Failures and full rejection are terminal here.
            let parent_status = if stats.cnt_failed > 0 {
                OrderStatus::Failed
            } else if stats.cnt_rejected > 0 && stats.cnt_completed == 0 {
                OrderStatus::Rejected
            } else {
                OrderStatus::Doing
            };
            self.db
                .advance_status(
                    &mut *tx,
                    child.order_id,
                    OrderStatusCode::WaitRequests,
                    parent_status,
                    OrderStatusCode::Created,
                )
                .await?;
            if let Some(target_id) = replace_target {
                // Success parks the target at state-waiting; a fallen-through
                // replacement hands it back as created.
                let to_code = if parent_status == OrderStatus::Doing {
                    OrderStatusCode::StateWaiting
                } else {
                    OrderStatusCode::Created
                };
                let shifted = self.db.shift_target(&mut *tx, target_id, to_code).await?;
                if shifted == 0 {
                    warn!(
                        order_id = child.order_id,
                        target_id, "Replace target was not at state-building"
                    );
                }
            }
            info!(
                order_id = child.order_id,
                ?parent_status,
                "Order requests settled"
            );
        }
        tx.commit().await?;
        Ok(())
    }

    /// Terminal confirmation for a live order: an operator (or a state
    /// sweep) marks a created or state-waiting order completed.
    pub async fn finalize_order(&self, order_id: OrderId) -> Result<(), CoreError> {
        let order = self.require_order(order_id).await?;
        if order.status != OrderStatus::Doing
            || !matches!(
                order.status_code,
                OrderStatusCode::Created | OrderStatusCode::StateWaiting
            )
        {
            return Err(CoreError::precondition(format!(
                "order {order_id} at {:?}/{:?} is not live",
                order.status, order.status_code
            )));
        }

        let mut conn = self.db.pool().acquire().await?;
        self.db
            .advance_status(
                &mut *conn,
                order_id,
                order.status_code,
                OrderStatus::Completed,
                OrderStatusCode::Created,
            )
            .await?;
        info!(order_id, "Order finalized");
        Ok(())
    }

    /// Abort an in-flight order: soft-cancel its unprocessed outbox
    /// entries by group fingerprint, move every still-open child to
    /// special with the parent, and park the parent at cancelled. The
    /// dispatcher's enabled check makes the disable effective; the child
    /// sweep keeps a late dispatcher report from reopening the order.
    pub async fn abort_order(&self, order_id: OrderId) -> Result<u64, CoreError> {
        let order = self.require_order(order_id).await?;
        check_order_to_cancel(&order)?;
        let replace_target = if order.order_type == OrderType::Replace {
            self.db
                .get_detail(order_id)
                .await?
                .and_then(|d| d.target_order_id)
        } else {
            None
        };

        let group_str_id = make_str_id("order-group", &[&order_id.to_string()]);
        let disabled = self.outbox.disable_by_group_str_id(&group_str_id).await?;

        let mut tx = self.db.pool().begin().await?;
        for open in [OrderStatus::New, OrderStatus::Doing] {
            let moved = self
                .db
                .mark_children(&mut *tx, order_id, open, OrderStatus::Special)
                .await?;
            if moved > 0 {
                self.db
                    .stats_move(&mut *tx, order_id, open, OrderStatus::Special, moved as i32)
                    .await?;
            }
        }
        self.db
            .advance_status(
                &mut *tx,
                order_id,
                order.status_code,
                OrderStatus::Special,
                OrderStatusCode::Cancelled,
            )
            .await?;
        if let Some(target_id) = replace_target {
            // the replacement never landed; the target is live again
            self.db
                .shift_target(&mut *tx, target_id, OrderStatusCode::Created)
                .await?;
        }
        tx.commit().await?;

        warn!(order_id, disabled, "Order aborted");
        Ok(disabled)
    }

    async fn require_order(&self, order_id: OrderId) -> Result<OrderRow, CoreError> {
        self.db
            .get_order(order_id)
            .await?
            .ok_or_else(|| CoreError::precondition(format!("order {order_id} not found")))
    }

    async fn system_key_for(&self, exchange_id: i32) -> Result<i64, CoreError> {
        self.keys
            .live_system_key_for_exchange(exchange_id)
            .await?
            .ok_or_else(|| {
                CoreError::precondition(format!(
                    "no live system API key for exchange {exchange_id}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_at(
        order_type: OrderType,
        status: OrderStatus,
        status_code: OrderStatusCode,
    ) -> OrderRow {
        OrderRow {
            id: 1,
            admin_id: 1,
            group_id: 1,
            order_type,
            priority: 0,
            approved_admin_id: 0,
            status,
            status_code,
            enabled: true,
        }
    }

    #[test]
    fn replace_requires_doing_at_created_or_state_waiting() {
        let ok = order_at(OrderType::New, OrderStatus::Doing, OrderStatusCode::Created);
        assert!(check_order_to_replace(&ok).is_ok());

        let ok = order_at(
            OrderType::Replace,
            OrderStatus::Doing,
            OrderStatusCode::StateWaiting,
        );
        assert!(check_order_to_replace(&ok).is_ok());

        let wrong_code = order_at(
            OrderType::New,
            OrderStatus::Doing,
            OrderStatusCode::WaitRequests,
        );
        assert!(check_order_to_replace(&wrong_code).is_err());

        let wrong_status = order_at(OrderType::New, OrderStatus::New, OrderStatusCode::Created);
        assert!(check_order_to_replace(&wrong_status).is_err());

        let cancel = order_at(
            OrderType::Cancel,
            OrderStatus::Doing,
            OrderStatusCode::Created,
        );
        assert!(check_order_to_replace(&cancel).is_err());
    }

    #[test]
    fn cancel_allows_early_and_mid_codes_only() {
        for code in CANCELLABLE_CODES {
            let row = order_at(OrderType::New, OrderStatus::Doing, code);
            assert!(check_order_to_cancel(&row).is_ok(), "{code:?}");
        }

        let built = order_at(OrderType::New, OrderStatus::Doing, OrderStatusCode::Created);
        assert!(check_order_to_cancel(&built).is_err());

        let terminal = order_at(
            OrderType::New,
            OrderStatus::Completed,
            OrderStatusCode::WaitApprove,
        );
        assert!(check_order_to_cancel(&terminal).is_err());

        let cancel_of_cancel = order_at(
            OrderType::Cancel,
            OrderStatus::New,
            OrderStatusCode::Decompose,
        );
        assert!(check_order_to_cancel(&cancel_of_cancel).is_err());
    }
}
