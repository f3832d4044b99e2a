//! Request batching
//!
//! A [`RequestBatch`] is a caller-owned, in-memory accumulator of outbox
//! entries. It is NOT durable: its only purpose is to collect the requests
//! produced by one unit of business work so they land in one bulk insert
//! inside the caller's transaction, atomically with the state change that
//! produced them. A crash before `flush` loses the batch together with the
//! uncommitted state change, which is exactly the contract.

use rustc_hash::FxHashMap;
use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::core_types::ApiKeyId;
use crate::error::CoreError;
use crate::store;

use super::types::{RequestDescriptor, RequestStatus, RequestStatusCode};

const MAX_URL_LEN: usize = 2048;
const MAX_HEADERS_LEN: usize = 8192;
const MAX_BODY_LEN: usize = 65536;

#[derive(Debug, Clone)]
struct PendingRequest {
    descriptor: RequestDescriptor,
    nonce: i64,
}

/// Caller-owned outbox write batch.
#[derive(Debug, Default)]
pub struct RequestBatch {
    pending: Vec<PendingRequest>,
    // highest nonce handed out per credential in this batch
    last_nonce: FxHashMap<ApiKeyId, i64>,
}

impl RequestBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Validate and buffer one descriptor, assigning its nonce.
    ///
    /// The nonce is the current wall-clock millisecond, bumped past the last
    /// nonce assigned to the same credential in this batch so repeated keys
    /// get strictly increasing nonces even within one millisecond.
    pub fn push(&mut self, descriptor: RequestDescriptor) -> Result<(), CoreError> {
        store::known_id("exchangeId", descriptor.exchange_id as i64)?;
        store::name("strId", &descriptor.str_id, 64)?;
        store::name("groupStrId", &descriptor.group_str_id, 64)?;
        store::name("method", &descriptor.method, 16)?;
        store::bounded_text("url", &descriptor.url, MAX_URL_LEN)?;
        store::bounded_text("headers", &descriptor.headers, MAX_HEADERS_LEN)?;
        store::bounded_text("body", &descriptor.body, MAX_BODY_LEN)?;
        store::known_id("apiKeyId", descriptor.credential.key_id())?;

        let key_id = descriptor.credential.key_id();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let nonce = match self.last_nonce.get(&key_id) {
            Some(&last) => now_ms.max(last + 1),
            None => now_ms,
        };
        self.last_nonce.insert(key_id, nonce);

        self.pending.push(PendingRequest { descriptor, nonce });
        Ok(())
    }

    /// Persist the whole batch in one bulk insert on the caller's
    /// transaction, then clear it. Fails on an empty batch: flushing
    /// nothing means the producing step forgot to buffer, which is a bug
    /// worth surfacing. Rows whose fingerprint already exists are skipped,
    /// so a replayed producing step does not duplicate requests; the
    /// returned count covers newly inserted rows only.
    pub async fn flush(&mut self, conn: &mut PgConnection) -> Result<u64, CoreError> {
        if self.pending.is_empty() {
            return Err(CoreError::precondition("request batch is empty"));
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO exchange_requests_tb \
             (str_id, group_str_id, system_key_id, user_key_id, exchange_id, \
              requester_type, nonce, method, url, headers, body, status, status_code) ",
        );

        qb.push_values(self.pending.iter(), |mut b, p| {
            let (system_key_id, user_key_id) = p.descriptor.credential.columns();
            b.push_bind(&p.descriptor.str_id)
                .push_bind(&p.descriptor.group_str_id)
                .push_bind(system_key_id)
                .push_bind(user_key_id)
                .push_bind(p.descriptor.exchange_id)
                .push_bind(p.descriptor.requester_type.id())
                .push_bind(p.nonce)
                .push_bind(&p.descriptor.method)
                .push_bind(&p.descriptor.url)
                .push_bind(&p.descriptor.headers)
                .push_bind(&p.descriptor.body)
                .push_bind(RequestStatus::Waiting.id())
                .push_bind(RequestStatusCode::None.id());
        });
        qb.push(" ON CONFLICT (str_id) DO NOTHING");

        let inserted = qb.build().execute(conn).await?.rows_affected();

        tracing::debug!(inserted, "Outbox batch flushed");
        self.pending.clear();
        self.last_nonce.clear();
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::types::{CredentialRef, RequesterType};

    fn descriptor(key: CredentialRef, str_id: &str) -> RequestDescriptor {
        RequestDescriptor {
            str_id: str_id.into(),
            group_str_id: "group-1".into(),
            credential: key,
            exchange_id: 1,
            requester_type: RequesterType::Order,
            method: "POST".into(),
            url: "/v1/order".into(),
            headers: "{}".into(),
            body: "{}".into(),
        }
    }

    #[test]
    fn push_assigns_strictly_increasing_nonces_per_credential() {
        let mut batch = RequestBatch::new();
        let key = CredentialRef::SystemKey(5);
        for i in 0..5 {
            batch.push(descriptor(key, &format!("fp-{i}"))).unwrap();
        }
        let nonces: Vec<i64> = batch.pending.iter().map(|p| p.nonce).collect();
        for pair in nonces.windows(2) {
            assert!(pair[1] > pair[0], "nonces must strictly increase per key");
        }
    }

    #[test]
    fn push_tracks_credentials_independently() {
        let mut batch = RequestBatch::new();
        batch
            .push(descriptor(CredentialRef::SystemKey(5), "fp-a"))
            .unwrap();
        batch
            .push(descriptor(CredentialRef::UserKey(6), "fp-b"))
            .unwrap();
        // Different keys may share a millisecond; no bump required.
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn push_rejects_bad_descriptor() {
        let mut batch = RequestBatch::new();
        let mut bad = descriptor(CredentialRef::SystemKey(5), "fp");
        bad.method = "".into();
        assert!(batch.push(bad).is_err());
        assert!(batch.is_empty());

        let mut bad = descriptor(CredentialRef::SystemKey(0), "fp");
        bad.str_id = "fp2".into();
        assert!(batch.push(bad).is_err());
    }

    #[test]
    fn push_rejects_oversized_body() {
        let mut batch = RequestBatch::new();
        let mut bad = descriptor(CredentialRef::SystemKey(5), "fp");
        bad.body = "x".repeat(MAX_BODY_LEN + 1);
        assert!(batch.push(bad).is_err());
    }
}
