//! Order types
//!
//! Parent/child rows, detail rows, stats, and the status vocabularies.

use rust_decimal::Decimal;

use crate::core_types::{AdminId, ChildOrderId, ExchangeId, OrderId, PairId};
use crate::error::CoreError;

/// Parent order kind. Priority for drain ordering: cancel > replace > new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum OrderType {
    New = 1,
    Replace = 2,
    Cancel = 3,
}

impl OrderType {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(OrderType::New),
            2 => Some(OrderType::Replace),
            3 => Some(OrderType::Cancel),
            _ => None,
        }
    }

    /// Drain priority: cancels first, then replaces, then news.
    pub fn type_priority(&self) -> i16 {
        match self {
            OrderType::Cancel => 3,
            OrderType::Replace => 2,
            OrderType::New => 1,
        }
    }
}

/// Parent and child order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum OrderStatus {
    New = 1,
    Doing = 2,
    Completed = 3,
    Rejected = 4,
    Failed = 5,
    Special = 9,
}

impl OrderStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(OrderStatus::New),
            2 => Some(OrderStatus::Doing),
            3 => Some(OrderStatus::Completed),
            4 => Some(OrderStatus::Rejected),
            5 => Some(OrderStatus::Failed),
            9 => Some(OrderStatus::Special),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Rejected | OrderStatus::Failed
        )
    }
}

/// Sub-phase of the parent state machine. The code sequence is
/// authoritative: decompose -> wait-approve -> approved -> build-requests
/// -> wait-requests -> created. Cancelled marks an aborted parent;
/// state-building/state-waiting mark a live order whose replacement is in
/// flight / has landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum OrderStatusCode {
    None = 0,
    Decompose = 10,
    WaitApprove = 20,
    Approved = 30,
    BuildRequests = 40,
    WaitRequests = 50,
    Created = 60,
    Cancelled = 70,
    StateBuilding = 80,
    StateWaiting = 90,
}

impl OrderStatusCode {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(OrderStatusCode::None),
            10 => Some(OrderStatusCode::Decompose),
            20 => Some(OrderStatusCode::WaitApprove),
            30 => Some(OrderStatusCode::Approved),
            40 => Some(OrderStatusCode::BuildRequests),
            50 => Some(OrderStatusCode::WaitRequests),
            60 => Some(OrderStatusCode::Created),
            70 => Some(OrderStatusCode::Cancelled),
            80 => Some(OrderStatusCode::StateBuilding),
            90 => Some(OrderStatusCode::StateWaiting),
            _ => None,
        }
    }
}

/// Status codes at which a target may still be cancelled.
pub const CANCELLABLE_CODES: [OrderStatusCode; 5] = [
    OrderStatusCode::Decompose,
    OrderStatusCode::WaitApprove,
    OrderStatusCode::Approved,
    OrderStatusCode::BuildRequests,
    OrderStatusCode::WaitRequests,
];

/// Status codes at which a target may be replaced.
pub const REPLACEABLE_CODES: [OrderStatusCode; 2] =
    [OrderStatusCode::Created, OrderStatusCode::StateWaiting];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Side {
    Buy = 1,
    Sell = 2,
}

impl Side {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Side::Buy),
            2 => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ExecStyle {
    Limit = 1,
    Market = 2,
}

impl ExecStyle {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ExecStyle::Limit),
            2 => Some(ExecStyle::Market),
            _ => None,
        }
    }
}

/// Admin role; only admin/sudo may approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum AdminRole {
    Operator = 1,
    Admin = 2,
    Sudo = 3,
}

impl AdminRole {
    pub fn can_approve(&self) -> bool {
        matches!(self, AdminRole::Admin | AdminRole::Sudo)
    }
}

/// The two mutually exclusive input modes: amount-denominated (price fields
/// derived, zero) or price-denominated (amount zero, reference amountPrice
/// set). The closed enum makes "both populated" unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderInput {
    /// Base-amount denominated: amount set, optional limit price.
    Amount { amount: Decimal, price: Decimal },
    /// Quote-denominated reference budget: amount stays zero.
    Price { amount_price: Decimal },
}

impl OrderInput {
    /// (amount, price, amount_price) column triple; the unused mode's
    /// fields persist as zero.
    pub fn columns(&self) -> (Decimal, Decimal, Decimal) {
        match self {
            OrderInput::Amount { amount, price } => (*amount, *price, Decimal::ZERO),
            OrderInput::Price { amount_price } => (Decimal::ZERO, Decimal::ZERO, *amount_price),
        }
    }
}

/// Complexity class persisted with the detail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Complexity {
    Amount = 1,
    Price = 2,
}

impl Complexity {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Complexity::Amount),
            2 => Some(Complexity::Price),
            _ => None,
        }
    }
}

/// A validated trade intent, input to insert new/replace.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub admin_id: AdminId,
    pub group_id: i64,
    pub pair_id: PairId,
    pub side: Side,
    pub exec_style: ExecStyle,
    pub input: OrderInput,
    pub exchange_ids: Vec<ExchangeId>,
    /// Numeric tie-break within one type; higher drains first.
    pub priority: i16,
}

/// Parent order row.
#[derive(Debug, Clone)]
pub struct OrderRow {
    pub id: OrderId,
    pub admin_id: AdminId,
    pub group_id: i64,
    pub order_type: OrderType,
    pub priority: i16,
    /// 0 = not yet approved
    pub approved_admin_id: AdminId,
    pub status: OrderStatus,
    pub status_code: OrderStatusCode,
    pub enabled: bool,
}

/// Type-specific detail row for new/replace orders.
#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order_id: OrderId,
    pub pair_id: PairId,
    pub side: Side,
    pub exec_style: ExecStyle,
    pub complexity: Complexity,
    pub amount: Decimal,
    pub price: Decimal,
    pub amount_price: Decimal,
    /// Replace orders record the order they supersede.
    pub target_order_id: Option<OrderId>,
}

impl OrderDetail {
    /// The quantity decomposition splits across exchanges: the base amount
    /// for amount-denominated orders, the quote budget otherwise.
    pub fn decompose_base(&self) -> Decimal {
        match self.complexity {
            Complexity::Amount => self.amount,
            Complexity::Price => self.amount_price,
        }
    }
}

/// One exchange-scoped execution slice of a parent order.
#[derive(Debug, Clone)]
pub struct ChildOrder {
    pub id: ChildOrderId,
    pub order_id: OrderId,
    pub exchange_id: ExchangeId,
    pub share: Decimal,
    pub amount: Decimal,
    pub remain: Decimal,
    pub filled: Decimal,
    pub avg_price: Decimal,
    pub fee: Decimal,
    pub external_order_id: Option<String>,
    pub status: OrderStatus,
    pub status_code: OrderStatusCode,
}

/// Terminal outcome the dispatcher feedback reports for one child.
#[derive(Debug, Clone)]
pub enum ChildOutcome {
    Completed {
        filled: Decimal,
        avg_price: Decimal,
        fee: Decimal,
        external_order_id: String,
    },
    Rejected,
    Failed,
}

impl ChildOutcome {
    pub fn status(&self) -> OrderStatus {
        match self {
            ChildOutcome::Completed { .. } => OrderStatus::Completed,
            ChildOutcome::Rejected => OrderStatus::Rejected,
            ChildOutcome::Failed => OrderStatus::Failed,
        }
    }
}

/// Decomposition counters for one parent; six mutually exclusive buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderStats {
    pub order_id: OrderId,
    pub decomposed_total: i32,
    pub cnt_new: i32,
    pub cnt_doing: i32,
    pub cnt_completed: i32,
    pub cnt_rejected: i32,
    pub cnt_failed: i32,
    pub cnt_special: i32,
}

impl OrderStats {
    /// The stats invariant: buckets sum exactly to the decomposed total.
    /// Checked after every stats mutation; a mismatch is fatal for the
    /// enclosing transaction.
    pub fn check(&self) -> Result<(), CoreError> {
        let sum = self.cnt_new
            + self.cnt_doing
            + self.cnt_completed
            + self.cnt_rejected
            + self.cnt_failed
            + self.cnt_special;
        if sum != self.decomposed_total {
            return Err(CoreError::consistency(format!(
                "order {} stats: buckets sum {} != decomposed total {}",
                self.order_id, sum, self.decomposed_total
            )));
        }
        Ok(())
    }

    /// No child left in a non-terminal bucket?
    pub fn all_settled(&self) -> bool {
        self.cnt_new == 0 && self.cnt_doing == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_priority_orders_cancel_first() {
        assert!(OrderType::Cancel.type_priority() > OrderType::Replace.type_priority());
        assert!(OrderType::Replace.type_priority() > OrderType::New.type_priority());
    }

    #[test]
    fn stats_check_requires_exact_sum() {
        let mut stats = OrderStats {
            order_id: 1,
            decomposed_total: 3,
            cnt_new: 1,
            cnt_doing: 1,
            cnt_completed: 1,
            ..Default::default()
        };
        assert!(stats.check().is_ok());

        stats.cnt_failed = 1;
        assert!(matches!(stats.check(), Err(CoreError::Consistency(_))));
    }

    #[test]
    fn stats_settled_when_no_new_or_doing() {
        let stats = OrderStats {
            order_id: 1,
            decomposed_total: 2,
            cnt_completed: 1,
            cnt_failed: 1,
            ..Default::default()
        };
        assert!(stats.check().is_ok());
        assert!(stats.all_settled());
    }

    #[test]
    fn order_input_columns_zero_the_other_mode() {
        let amount_mode = OrderInput::Amount {
            amount: Decimal::TEN,
            price: Decimal::ONE_HUNDRED,
        };
        assert_eq!(
            amount_mode.columns(),
            (Decimal::TEN, Decimal::ONE_HUNDRED, Decimal::ZERO)
        );

        let price_mode = OrderInput::Price {
            amount_price: Decimal::ONE,
        };
        assert_eq!(
            price_mode.columns(),
            (Decimal::ZERO, Decimal::ZERO, Decimal::ONE)
        );
    }

    #[test]
    fn decompose_base_follows_complexity() {
        let mut detail = OrderDetail {
            order_id: 1,
            pair_id: 1,
            side: Side::Buy,
            exec_style: ExecStyle::Limit,
            complexity: Complexity::Amount,
            amount: Decimal::TEN,
            price: Decimal::ONE_HUNDRED,
            amount_price: Decimal::ZERO,
            target_order_id: None,
        };
        assert_eq!(detail.decompose_base(), Decimal::TEN);

        detail.complexity = Complexity::Price;
        detail.amount = Decimal::ZERO;
        detail.amount_price = Decimal::ONE_THOUSAND;
        assert_eq!(detail.decompose_base(), Decimal::ONE_THOUSAND);
    }

    #[test]
    fn role_gates_approval() {
        assert!(!AdminRole::Operator.can_approve());
        assert!(AdminRole::Admin.can_approve());
        assert!(AdminRole::Sudo.can_approve());
    }

    #[test]
    fn status_roundtrip() {
        for code in [
            OrderStatusCode::Decompose,
            OrderStatusCode::WaitApprove,
            OrderStatusCode::Approved,
            OrderStatusCode::BuildRequests,
            OrderStatusCode::WaitRequests,
            OrderStatusCode::Created,
            OrderStatusCode::Cancelled,
            OrderStatusCode::StateBuilding,
            OrderStatusCode::StateWaiting,
        ] {
            assert_eq!(OrderStatusCode::from_id(code.id()), Some(code));
        }
        assert_eq!(OrderStatusCode::from_id(15), None);
    }
}
