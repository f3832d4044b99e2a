//! Balance types
//!
//! Holder/type/status vocabularies and the balance row with its invariant
//! check. Invariants here are consistency rules about stored state; a
//! violation is fatal for the enclosing transaction, never coerced.

use rust_decimal::Decimal;

use crate::core_types::{BalanceId, CurrencyId};
use crate::error::CoreError;

/// Owning entity of a balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum HolderKind {
    /// Platform-owned exchange account
    System = 1,
    /// Individual custodial user
    User = 2,
    /// Derived aggregate (system + user), holder_id 0
    Total = 3,
}

impl HolderKind {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(HolderKind::System),
            2 => Some(HolderKind::User),
            3 => Some(HolderKind::Total),
            _ => None,
        }
    }
}

/// A concrete holder: kind plus entity id. The total holder has id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Holder {
    pub kind: HolderKind,
    pub holder_id: i64,
}

impl Holder {
    pub fn system(holder_id: i64) -> Self {
        Self {
            kind: HolderKind::System,
            holder_id,
        }
    }

    pub fn user(holder_id: i64) -> Self {
        Self {
            kind: HolderKind::User,
            holder_id,
        }
    }

    pub fn total() -> Self {
        Self {
            kind: HolderKind::Total,
            holder_id: 0,
        }
    }
}

/// What the balance measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum BalanceType {
    Trading = 1,
    /// Signed open position; always fully available, sync-only
    Position = 2,
    Deposit = 3,
    Exchange = 4,
}

impl BalanceType {
    pub const ALL: [BalanceType; 4] = [
        BalanceType::Trading,
        BalanceType::Position,
        BalanceType::Deposit,
        BalanceType::Exchange,
    ];

    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(BalanceType::Trading),
            2 => Some(BalanceType::Position),
            3 => Some(BalanceType::Deposit),
            4 => Some(BalanceType::Exchange),
            _ => None,
        }
    }
}

/// Sync lifecycle: new -> syncing -> synced | failed, special out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum BalanceStatus {
    New = 1,
    Syncing = 2,
    Synced = 3,
    Failed = 4,
    Special = 9,
}

impl BalanceStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(BalanceStatus::New),
            2 => Some(BalanceStatus::Syncing),
            3 => Some(BalanceStatus::Synced),
            4 => Some(BalanceStatus::Failed),
            9 => Some(BalanceStatus::Special),
            _ => None,
        }
    }
}

/// Refinement of `Synced` on the aggregate row: clean, or downgraded
/// because some composing balances are failed or still new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum BalanceStatusCode {
    None = 0,
    SyncedClean = 30,
    SyncedSomeFailed = 31,
    SyncedSomeNew = 32,
}

impl BalanceStatusCode {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(BalanceStatusCode::None),
            30 => Some(BalanceStatusCode::SyncedClean),
            31 => Some(BalanceStatusCode::SyncedSomeFailed),
            32 => Some(BalanceStatusCode::SyncedSomeNew),
            _ => None,
        }
    }
}

/// Operation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum BalanceOp {
    Sync = 1,
    FundsIn = 2,
    FundsOut = 3,
    Aggregate = 4,
}

impl BalanceOp {
    pub fn id(&self) -> i16 {
        *self as i16
    }
}

/// One balance row.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRow {
    pub id: BalanceId,
    pub holder: Holder,
    pub currency_id: CurrencyId,
    pub balance_type: BalanceType,
    pub amount: Decimal,
    pub amount_in_usd: Decimal,
    pub available: Decimal,
    pub available_in_usd: Decimal,
    pub hold: Decimal,
    pub hold_in_usd: Decimal,
    pub status: BalanceStatus,
    pub status_code: BalanceStatusCode,
    pub enabled: bool,
}

impl BalanceRow {
    /// Component-wise invariant check. Runs before every persisted write of
    /// a balance row; a failure aborts the transaction.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.amount != Decimal::ZERO && self.amount_in_usd == Decimal::ZERO {
            return Err(CoreError::consistency(format!(
                "balance {}: amount {} with zero USD equivalent",
                self.id, self.amount
            )));
        }

        match self.balance_type {
            BalanceType::Position => {
                // A position is always fully available and carries no hold.
                if self.amount != self.available {
                    return Err(CoreError::consistency(format!(
                        "position balance {}: amount {} != available {}",
                        self.id, self.amount, self.available
                    )));
                }
                if self.hold != Decimal::ZERO {
                    return Err(CoreError::consistency(format!(
                        "position balance {}: nonzero hold {}",
                        self.id, self.hold
                    )));
                }
                if self.amount.is_sign_negative() != self.amount_in_usd.is_sign_negative()
                    && self.amount != Decimal::ZERO
                    && self.amount_in_usd != Decimal::ZERO
                {
                    return Err(CoreError::consistency(format!(
                        "position balance {}: USD sign does not mirror amount",
                        self.id
                    )));
                }
            }
            _ => {
                if self.available > self.amount {
                    return Err(CoreError::consistency(format!(
                        "balance {}: available {} > amount {}",
                        self.id, self.available, self.amount
                    )));
                }
                if self.hold > self.amount {
                    return Err(CoreError::consistency(format!(
                        "balance {}: hold {} > amount {}",
                        self.id, self.hold, self.amount
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    pub(crate) fn row(balance_type: BalanceType) -> BalanceRow {
        BalanceRow {
            id: 1,
            holder: Holder::system(10),
            currency_id: 2,
            balance_type,
            amount: dec("5"),
            amount_in_usd: dec("500"),
            available: dec("5"),
            available_in_usd: dec("500"),
            hold: Decimal::ZERO,
            hold_in_usd: Decimal::ZERO,
            status: BalanceStatus::Synced,
            status_code: BalanceStatusCode::None,
            enabled: true,
        }
    }

    #[test]
    fn check_accepts_valid_rows() {
        assert!(row(BalanceType::Trading).check().is_ok());
        assert!(row(BalanceType::Position).check().is_ok());
    }

    #[test]
    fn check_rejects_available_above_amount() {
        let mut r = row(BalanceType::Trading);
        r.available = dec("6");
        assert!(matches!(r.check(), Err(CoreError::Consistency(_))));
    }

    #[test]
    fn check_rejects_hold_above_amount() {
        let mut r = row(BalanceType::Trading);
        r.hold = dec("6");
        assert!(r.check().is_err());
    }

    #[test]
    fn check_rejects_zero_usd_for_nonzero_amount() {
        let mut r = row(BalanceType::Trading);
        r.amount_in_usd = Decimal::ZERO;
        assert!(r.check().is_err());
    }

    #[test]
    fn check_position_requires_fully_available() {
        let mut r = row(BalanceType::Position);
        r.available = dec("4");
        assert!(r.check().is_err());
    }

    #[test]
    fn check_position_rejects_hold() {
        let mut r = row(BalanceType::Position);
        r.hold = dec("1");
        assert!(r.check().is_err());
    }

    #[test]
    fn check_position_usd_mirrors_sign() {
        let mut r = row(BalanceType::Position);
        r.amount = dec("-2");
        r.available = dec("-2");
        r.amount_in_usd = dec("200");
        assert!(r.check().is_err());

        r.amount_in_usd = dec("-200");
        r.available_in_usd = dec("-200");
        assert!(r.check().is_ok());
    }

    #[test]
    fn holder_constructors() {
        assert_eq!(Holder::total().holder_id, 0);
        assert_eq!(Holder::system(7).kind, HolderKind::System);
        assert_eq!(Holder::user(7).kind, HolderKind::User);
    }
}
