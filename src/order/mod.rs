//! Order Orchestrator
//!
//! Trade intents come in as parent orders (new / replace / cancel), get
//! validated against market configuration, decomposed into per-exchange
//! child orders by configured share, approved, and turned into outbox
//! requests. The parent status machine is `new -> doing -> completed |
//! rejected | failed` with a numeric status code tracking the sub-phase;
//! every transition is an optimistic conditional update, every multi-row
//! write one transaction.

pub mod db;
pub mod orchestrator;
pub mod types;

pub use db::OrderDb;
pub use orchestrator::{Orchestrator, check_order_to_cancel, check_order_to_replace};
pub use types::{
    AdminRole, ChildOrder, ChildOutcome, ExecStyle, OrderInput, OrderIntent, OrderRow, OrderStats,
    OrderStatus, OrderStatusCode, OrderType, Side,
};
