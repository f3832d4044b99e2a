//! Ledger row store contract
//!
//! Shared building blocks for every table repository: field validation that
//! runs before any value is bound into SQL, and paging for list queries.
//!
//! Two rules hold for every table in the system:
//! - `created` / `updated` / `synced_at` timestamps are set by the database
//!   (`NOW()`), never by callers.
//! - rows are never physically deleted; `enabled = FALSE` is the only delete.

pub mod fields;

pub use fields::{bounded_text, fraction, in_range, known_id, name, non_negative, positive};

/// Paging for list queries. Limits are clamped so a caller can never ask the
/// store for an unbounded scan.
#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub limit: i64,
    pub offset: i64,
}

impl Paging {
    pub const MAX_LIMIT: i64 = 1000;

    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset: offset.max(0),
        }
    }

    pub fn first(limit: i64) -> Self {
        Self::new(limit, 0)
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self::new(100, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_clamps_limit() {
        assert_eq!(Paging::new(0, 0).limit, 1);
        assert_eq!(Paging::new(5000, 0).limit, Paging::MAX_LIMIT);
        assert_eq!(Paging::new(50, -3).offset, 0);
    }
}
