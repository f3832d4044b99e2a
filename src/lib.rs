//! crossdesk - cross-exchange custodial trading coordinator
//!
//! PostgreSQL is the single source of truth. Four layers:
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐
//! │  Ledger   │──▶│  Balance  │──▶│   Order   │──▶│  Request  │
//! │ Row Store │   │  Ledger   │   │Orchestrator│  │  Outbox   │
//! └───────────┘   └───────────┘   └───────────┘   └───────────┘
//! ```
//!
//! - Row store: validated repositories over the `_tb` tables, closed
//!   `repr(i16)` status enums, optimistic conditional updates.
//! - Balance ledger: per-credential holdings with USD valuations, an
//!   append-only log, and a derived total per (currency, type).
//! - Order orchestrator: parent orders decomposed into per-exchange
//!   children by configured share, approved, turned into requests.
//! - Request outbox: durable store-and-forward rows carrying everything
//!   needed to replay a signed exchange call; inserted atomically with
//!   the state change that produced them.

pub mod apikey;
pub mod balance;
pub mod config;
pub mod core_types;
pub mod db;
pub mod error;
pub mod logging;
pub mod market;
pub mod order;
pub mod outbox;
pub mod store;

pub use error::CoreError;
