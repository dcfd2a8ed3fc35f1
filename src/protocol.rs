//! Wire messages for the GeoQuest RPC protocol.
//!
//! The protocol batches typed sub-requests inside an envelope and answers
//! with positionally aligned raw payloads. Message schemas are fixed by
//! the server; this module mirrors them as serde types and encodes them
//! with the binary codec the backend speaks.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, StatusError};

/// Constant request identifier stamped on every envelope.
pub const REQUEST_ID: u64 = 8145806132888207460;

/// Fixed envelope status code for outgoing requests.
pub const ENVELOPE_STATUS: i32 = 2;

/// Hash identifying the settings bundle revision the client understands.
pub const DOWNLOAD_SETTINGS_HASH: &str = "05daf51635c82611d1aac95c0b051d3ec088a930";

/// Response envelope status codes defined by the server.
pub mod status {
    pub const OK: i32 = 1;
    pub const OK_RPC_URL_IN_RESPONSE: i32 = 2;
    pub const BAD_REQUEST: i32 = 3;
    pub const INVALID_REQUEST: i32 = 51;
    pub const INVALID_PLATFORM_REQUEST: i32 = 52;
    pub const REDIRECT: i32 = 53;
    pub const SESSION_INVALIDATED: i32 = 100;
    pub const INVALID_AUTH_TOKEN: i32 = 102;
}

/// Maps a response status code to its error, or `None` for success.
///
/// Total over all inputs: defined codes map to their named error and
/// anything unrecognized maps to the generic [`StatusError::Request`].
/// [`StatusError::NewRpcEndpoint`] is a signal callers may treat as
/// success after switching to the endpoint embedded in the response.
pub fn status_error(code: i32) -> Option<StatusError> {
    match code {
        status::OK => None,
        status::OK_RPC_URL_IN_RESPONSE => Some(StatusError::NewRpcEndpoint),
        status::BAD_REQUEST => Some(StatusError::BadRequest),
        status::INVALID_REQUEST => Some(StatusError::InvalidRequest),
        status::INVALID_PLATFORM_REQUEST => Some(StatusError::InvalidPlatformRequest),
        status::REDIRECT => Some(StatusError::Redirect),
        status::SESSION_INVALIDATED => Some(StatusError::SessionInvalidated),
        status::INVALID_AUTH_TOKEN => Some(StatusError::InvalidAuthToken),
        _ => Some(StatusError::Request),
    }
}

/// Encodes a message for the wire. Failures are formatting errors and
/// abort the call before any network I/O.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, Error> {
    bincode::serialize(message).map_err(|_| Error::Formatting)
}

/// Decodes a raw response payload into its expected message type.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, Error> {
    bincode::deserialize(payload).map_err(Error::Response)
}

/// Typed sub-request kinds the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    GetPlayer,
    GetHatchedEggs,
    GetInventory,
    CheckAwardedBadges,
    DownloadSettings,
    GetMapObjects,
    CheckChallenge,
}

/// One typed sub-request, optionally carrying a serialized sub-message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_type: RequestType,
    pub request_message: Vec<u8>,
}

impl Request {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            request_message: Vec::new(),
        }
    }

    pub fn with_message(request_type: RequestType, request_message: Vec<u8>) -> Self {
        Self {
            request_type,
            request_message,
        }
    }
}

/// Pre-ticket authentication material: provider name plus access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub provider: String,
    pub token: String,
}

/// Opaque signed credential issued by the server after the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthTicket {
    pub start: Vec<u8>,
    pub expire_timestamp_ms: u64,
    pub end: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformRequestType {
    SendEncryptedSignature,
}

/// Side-channel request attached to the envelope; carries the encrypted
/// signature when signing is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformRequest {
    pub request_type: PlatformRequestType,
    pub request_message: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEncryptedSignatureRequest {
    pub encrypted_signature: Vec<u8>,
}

/// Signature bound to the request set, location and session entropy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub request_hash: Vec<u64>,
    pub location_hash1: u32,
    pub location_hash2: u32,
    pub session_hash: Vec<u8>,
    pub timestamp_ms: u64,
    pub timestamp_since_start_ms: u64,
}

/// Outer request message wrapping a batch of sub-requests plus session
/// metadata. Exactly one of `auth_info`/`auth_ticket` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: u64,
    pub status_code: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub auth_info: Option<AuthInfo>,
    pub auth_ticket: Option<AuthTicket>,
    pub requests: Vec<Request>,
    pub platform_requests: Vec<PlatformRequest>,
}

/// Outer response message: a status code, raw payloads positionally
/// aligned with the sub-requests, and optionally a migrated endpoint
/// token and a fresh auth ticket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status_code: i32,
    pub request_id: u64,
    pub api_url: String,
    pub returns: Vec<Vec<u8>>,
    pub auth_ticket: Option<AuthTicket>,
}

// --- Sub-messages carried inside requests ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSettingsMessage {
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMapObjectsMessage {
    /// Ascending level-15 cell ids scoping the query.
    pub cell_id: Vec<u64>,
    /// Last-seen timestamp per cell, aligned with `cell_id`.
    pub since_timestamp_ms: Vec<i64>,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetInventoryMessage {
    pub last_timestamp_ms: i64,
}

// --- Decoded response payloads ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerData {
    pub username: String,
    pub team: i32,
    pub creation_timestamp_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetPlayerResponse {
    pub success: bool,
    pub player: PlayerData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item_id: i32,
    pub count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetInventoryResponse {
    pub success: bool,
    pub items: Vec<InventoryItem>,
}

/// A creature sighted in the wild inside one map cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WildCreature {
    pub encounter_id: u64,
    pub spawn_point_id: String,
    pub creature_id: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub time_till_hidden_ms: i64,
}

/// A fixed point-of-interest structure inside one map cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fort {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapCell {
    pub s2_cell_id: u64,
    pub current_timestamp_ms: i64,
    pub wild_creatures: Vec<WildCreature>,
    pub forts: Vec<Fort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetMapObjectsResponse {
    pub map_cells: Vec<MapCell>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_total() {
        assert_eq!(status_error(status::OK), None);
        assert_eq!(
            status_error(status::OK_RPC_URL_IN_RESPONSE),
            Some(StatusError::NewRpcEndpoint)
        );
        assert_eq!(status_error(status::BAD_REQUEST), Some(StatusError::BadRequest));
        assert_eq!(
            status_error(status::INVALID_REQUEST),
            Some(StatusError::InvalidRequest)
        );
        assert_eq!(
            status_error(status::INVALID_PLATFORM_REQUEST),
            Some(StatusError::InvalidPlatformRequest)
        );
        assert_eq!(status_error(status::REDIRECT), Some(StatusError::Redirect));
        assert_eq!(
            status_error(status::SESSION_INVALIDATED),
            Some(StatusError::SessionInvalidated)
        );
        assert_eq!(
            status_error(status::INVALID_AUTH_TOKEN),
            Some(StatusError::InvalidAuthToken)
        );
        // Unrecognized codes fall back to the generic request error.
        assert_eq!(status_error(0), Some(StatusError::Request));
        assert_eq!(status_error(-7), Some(StatusError::Request));
        assert_eq!(status_error(9999), Some(StatusError::Request));
    }

    #[test]
    fn envelope_round_trips_through_the_codec() {
        let envelope = RequestEnvelope {
            request_id: REQUEST_ID,
            status_code: ENVELOPE_STATUS,
            latitude: 59.3293,
            longitude: 18.0686,
            altitude: 8.0,
            auth_info: Some(AuthInfo {
                provider: "ptc".into(),
                token: "T1".into(),
            }),
            auth_ticket: None,
            requests: vec![Request::new(RequestType::GetPlayer)],
            platform_requests: Vec::new(),
        };

        let bytes = encode(&envelope).unwrap();
        let decoded: RequestEnvelope = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_failure_is_a_distinct_error() {
        let err = decode::<GetPlayerResponse>(&[0xFF]).unwrap_err();
        assert!(matches!(err, Error::Response(_)));
    }
}
