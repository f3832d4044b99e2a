//! Outbox types
//!
//! Status vocabularies, the credential reference and the request row.

use crate::core_types::{ApiKeyId, ExchangeId, RequestId};
use crate::error::CoreError;

/// Who asked for this outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum RequesterType {
    SystemBalance = 1,
    UserBalance = 2,
    Order = 3,
    AdminDirect = 4,
}

impl RequesterType {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(RequesterType::SystemBalance),
            2 => Some(RequesterType::UserBalance),
            3 => Some(RequesterType::Order),
            4 => Some(RequesterType::AdminDirect),
            _ => None,
        }
    }
}

/// Dispatch lifecycle: waiting -> requesting -> success | failed, with
/// special as the out-of-band escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum RequestStatus {
    Waiting = 1,
    Requesting = 2,
    Success = 3,
    Failed = 4,
    Special = 9,
}

impl RequestStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(RequestStatus::Waiting),
            2 => Some(RequestStatus::Requesting),
            3 => Some(RequestStatus::Success),
            4 => Some(RequestStatus::Failed),
            9 => Some(RequestStatus::Special),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Success | RequestStatus::Failed | RequestStatus::Special
        )
    }
}

/// Refinement of a failed dispatch. Remote failures are data, not
/// exceptions: the dispatcher records one of these and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum RequestStatusCode {
    None = 0,
    BadCredential = 41,
    CredentialRevoked = 42,
    RemoteRejected = 43,
    RemoteUnreachable = 44,
    Timeout = 45,
}

impl RequestStatusCode {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(RequestStatusCode::None),
            41 => Some(RequestStatusCode::BadCredential),
            42 => Some(RequestStatusCode::CredentialRevoked),
            43 => Some(RequestStatusCode::RemoteRejected),
            44 => Some(RequestStatusCode::RemoteUnreachable),
            45 => Some(RequestStatusCode::Timeout),
            _ => None,
        }
    }
}

/// Exactly one credential per request: a system-owned or user-owned API key.
/// The closed enum makes the mutual-exclusivity invariant unrepresentable
/// to violate at the API surface; the table keeps two nullable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRef {
    SystemKey(ApiKeyId),
    UserKey(ApiKeyId),
}

impl CredentialRef {
    pub fn key_id(&self) -> ApiKeyId {
        match self {
            CredentialRef::SystemKey(id) | CredentialRef::UserKey(id) => *id,
        }
    }

    /// (system_key_id, user_key_id) column pair for persistence.
    pub fn columns(&self) -> (Option<ApiKeyId>, Option<ApiKeyId>) {
        match self {
            CredentialRef::SystemKey(id) => (Some(*id), None),
            CredentialRef::UserKey(id) => (None, Some(*id)),
        }
    }

    /// Rebuild from the column pair, enforcing exactly-one on read.
    pub fn from_columns(
        system_key_id: Option<ApiKeyId>,
        user_key_id: Option<ApiKeyId>,
    ) -> Result<Self, CoreError> {
        match (system_key_id, user_key_id) {
            (Some(id), None) => Ok(CredentialRef::SystemKey(id)),
            (None, Some(id)) => Ok(CredentialRef::UserKey(id)),
            (None, None) => Err(CoreError::consistency(
                "request row carries no credential id",
            )),
            (Some(_), Some(_)) => Err(CoreError::consistency(
                "request row carries both system and user credential ids",
            )),
        }
    }
}

/// What a producer hands to the outbox: everything except the nonce, which
/// the batch assigns.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub str_id: String,
    pub group_str_id: String,
    pub credential: CredentialRef,
    pub exchange_id: ExchangeId,
    pub requester_type: RequesterType,
    pub method: String,
    pub url: String,
    pub headers: String,
    pub body: String,
}

/// Persisted outbox row.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub id: RequestId,
    pub str_id: String,
    pub group_str_id: String,
    pub system_key_id: Option<ApiKeyId>,
    pub user_key_id: Option<ApiKeyId>,
    pub exchange_id: ExchangeId,
    pub requester_type: RequesterType,
    pub nonce: i64,
    pub method: String,
    pub url: String,
    pub headers: String,
    pub body: String,
    pub response_code: Option<i32>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
    pub status: RequestStatus,
    pub status_code: RequestStatusCode,
    pub processed_by_requester: bool,
    pub enabled: bool,
}

impl ExchangeRequest {
    pub fn credential(&self) -> Result<CredentialRef, CoreError> {
        CredentialRef::from_columns(self.system_key_id, self.user_key_id)
    }

    /// Precondition checks every consumer must apply before acting on a
    /// fetched row. A row failing this must be skipped (it was disabled or
    /// already claimed), not dispatched.
    pub fn validate_unprocessed(&self) -> Result<(), CoreError> {
        if !self.enabled {
            return Err(CoreError::precondition(format!(
                "request {} is disabled",
                self.id
            )));
        }
        if self.processed_by_requester {
            return Err(CoreError::precondition(format!(
                "request {} already processed by requester",
                self.id
            )));
        }
        if self.exchange_id <= 0 {
            return Err(CoreError::consistency(format!(
                "request {} has invalid exchange id {}",
                self.id, self.exchange_id
            )));
        }
        self.credential()?;
        if self.status.is_terminal() {
            return Err(CoreError::precondition(format!(
                "request {} is already terminal ({:?})",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_request() -> ExchangeRequest {
        ExchangeRequest {
            id: 7,
            str_id: "abc".into(),
            group_str_id: "grp".into(),
            system_key_id: Some(11),
            user_key_id: None,
            exchange_id: 1,
            requester_type: RequesterType::Order,
            nonce: 1_000,
            method: "POST".into(),
            url: "/v1/order".into(),
            headers: "{}".into(),
            body: "{}".into(),
            response_code: None,
            response_headers: None,
            response_body: None,
            status: RequestStatus::Waiting,
            status_code: RequestStatusCode::None,
            processed_by_requester: false,
            enabled: true,
        }
    }

    #[test]
    fn credential_exactly_one() {
        assert!(CredentialRef::from_columns(Some(1), None).is_ok());
        assert!(CredentialRef::from_columns(None, Some(2)).is_ok());
        assert!(CredentialRef::from_columns(None, None).is_err());
        assert!(CredentialRef::from_columns(Some(1), Some(2)).is_err());
    }

    #[test]
    fn validate_unprocessed_accepts_clean_row() {
        assert!(sample_request().validate_unprocessed().is_ok());
    }

    #[test]
    fn validate_unprocessed_rejects_disabled() {
        let mut req = sample_request();
        req.enabled = false;
        assert!(req.validate_unprocessed().is_err());
    }

    #[test]
    fn validate_unprocessed_rejects_processed() {
        let mut req = sample_request();
        req.processed_by_requester = true;
        assert!(req.validate_unprocessed().is_err());
    }

    #[test]
    fn validate_unprocessed_rejects_both_keys() {
        let mut req = sample_request();
        req.user_key_id = Some(3);
        assert!(matches!(
            req.validate_unprocessed(),
            Err(CoreError::Consistency(_))
        ));
    }

    #[test]
    fn validate_unprocessed_rejects_terminal() {
        let mut req = sample_request();
        req.status = RequestStatus::Success;
        assert!(req.validate_unprocessed().is_err());
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            RequestStatus::Waiting,
            RequestStatus::Requesting,
            RequestStatus::Success,
            RequestStatus::Failed,
            RequestStatus::Special,
        ] {
            assert_eq!(RequestStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(RequestStatus::from_id(5), None);
    }
}
