//! Request Outbox
//!
//! Durable, idempotent, ordered dispatch queue for calls to external
//! exchange APIs. Entries are keyed by credential so per-credential nonce
//! ordering (required by exchange-side replay protection) is preserved.
//!
//! Write path: business code pushes descriptors into a caller-owned
//! [`RequestBatch`] and flushes it inside the same transaction as the state
//! transition that produced them. Read path: an external dispatcher drains
//! waiting rows in (nonce, id) order, performs the HTTP call, and reports
//! back through [`OutboxDb`]. Completion is at-most-once via the
//! `processed_by_requester` guard.

pub mod batch;
pub mod db;
pub mod fingerprint;
pub mod types;

pub use batch::RequestBatch;
pub use db::OutboxDb;
pub use fingerprint::{make_str_id, unique_tick};
pub use types::{
    CredentialRef, ExchangeRequest, RequestDescriptor, RequestStatus, RequestStatusCode,
    RequesterType,
};
