//! Balance Ledger
//!
//! Authoritative funds state per (holder, currency, balance type) with an
//! append-only audit log. Rows are mutated only through the ledger's
//! funds operations; every mutation lands together with exactly one log row
//! in one transaction. The derived Total holder aggregates system + user
//! into a single row per (currency, type).

pub mod db;
pub mod ledger;
pub mod rate;
pub mod total;
pub mod types;

pub use db::BalanceDb;
pub use ledger::BalanceLedger;
pub use rate::{FixedRateProvider, RateProvider};
pub use total::TotalBalance;
pub use types::{
    BalanceOp, BalanceRow, BalanceStatus, BalanceStatusCode, BalanceType, Holder, HolderKind,
};
