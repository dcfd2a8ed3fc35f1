//! Protocol state machine.
//!
//! A session starts unauthenticated, becomes authenticated inside
//! [`Session::init`] (which logs in through the identity provider, runs
//! the bootstrap call and commits the server-assigned endpoint and auth
//! ticket), and from then on issues domain calls against the migrated
//! endpoint. The session does not synchronize internal state; concurrent
//! callers must serialize access or use one session per logical actor.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::auth::Provider;
use crate::cell;
use crate::error::{Error, StatusError};
use crate::feed::{Feed, FeedEntry};
use crate::location::Location;
use crate::protocol::{
    self, AuthInfo, AuthTicket, DownloadSettingsMessage, GetInventoryMessage,
    GetInventoryResponse, GetMapObjectsMessage, GetMapObjectsResponse, GetPlayerResponse,
    Request, RequestEnvelope, RequestType, ResponseEnvelope,
};
use crate::rpc::{Rpc, Transport};
use crate::sign::{SignatureCrypto, SigningPipeline};

/// Endpoint used until the server assigns a session-specific one.
pub const DEFAULT_URL: &str = "https://release.geoquest-game.com/rpc";

/// Response slot of the map-objects payload in the announce call.
const MAP_OBJECTS_SLOT: usize = 5;

/// A value decoded from a response, paired with the error derived from
/// the envelope's status code. `Some(StatusError::NewRpcEndpoint)` may be
/// treated as success after switching endpoints.
pub type CallOutcome<T> = (T, Option<StatusError>);

/// Client session against the GeoQuest RPC backend.
pub struct Session {
    provider: Box<dyn Provider>,
    location: Location,
    feed: Box<dyn Feed>,
    signer: SigningPipeline,
    transport: Box<dyn Transport>,
    endpoint: Option<String>,
    ticket: Option<AuthTicket>,
    started: DateTime<Utc>,
    cell_radius: usize,
}

impl Session {
    /// Session over the default HTTP transport.
    pub fn new(
        provider: Box<dyn Provider>,
        location: Location,
        feed: Box<dyn Feed>,
        crypto: Box<dyn SignatureCrypto>,
    ) -> Self {
        Self::with_transport(provider, location, feed, crypto, Box::new(Rpc::new()))
    }

    /// Session with an injected transport.
    pub fn with_transport(
        provider: Box<dyn Provider>,
        location: Location,
        feed: Box<dyn Feed>,
        crypto: Box<dyn SignatureCrypto>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            provider,
            location,
            feed,
            signer: SigningPipeline::new(crypto),
            transport,
            endpoint: None,
            ticket: None,
            started: Utc::now(),
            cell_radius: cell::DEFAULT_NEIGHBORHOOD_RADIUS,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Replaces the current location. Has no other side effect; the auth
    /// ticket stays valid.
    pub fn move_to(&mut self, location: Location) {
        self.location = location;
    }

    /// Number of predecessor/successor cells on each side of the origin
    /// in map queries.
    pub fn set_cell_radius(&mut self, radius: usize) {
        self.cell_radius = radius;
    }

    /// Points the session at a server-assigned endpoint token. Callers do
    /// this after a [`StatusError::NewRpcEndpoint`] signal, then repeat
    /// the call.
    pub fn set_endpoint(&mut self, token: &str) {
        self.endpoint = Some(format!("https://{token}/rpc"));
    }

    fn url(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_URL)
    }

    /// Builds a request envelope for the pending requests and performs
    /// one exchange. A held ticket gates signing: pre-ticket envelopes
    /// carry the provider's auth info and are never signed, ticketed
    /// envelopes are signed when the crypto backend is enabled. Signing
    /// failures abort before any network I/O.
    pub async fn call(&self, requests: &[Request]) -> Result<ResponseEnvelope, Error> {
        let mut envelope = RequestEnvelope {
            request_id: protocol::REQUEST_ID,
            status_code: protocol::ENVELOPE_STATUS,
            latitude: self.location.latitude,
            longitude: self.location.longitude,
            altitude: self.location.altitude,
            auth_info: None,
            auth_ticket: None,
            requests: requests.to_vec(),
            platform_requests: Vec::new(),
        };

        match &self.ticket {
            Some(ticket) => {
                envelope.auth_ticket = Some(ticket.clone());
                if self.signer.enabled() {
                    let platform =
                        self.signer
                            .sign(ticket, &self.location, requests, self.started)?;
                    envelope.platform_requests.push(platform);
                }
            }
            None => {
                envelope.auth_info = Some(AuthInfo {
                    provider: self.provider.provider_string().to_string(),
                    token: self.provider.access_token().to_string(),
                });
            }
        }

        debug!(
            endpoint = self.url(),
            requests = requests.len(),
            signed = !envelope.platform_requests.is_empty(),
            "issuing rpc call"
        );

        Ok(self.transport.exchange(self.url(), &envelope).await?)
    }

    /// Authenticates the session: logs in through the provider (only if
    /// no token is held yet), runs the bootstrap call set, and commits
    /// the server-assigned endpoint and auth ticket. An empty endpoint
    /// token is a terminal error even when the status was otherwise OK.
    pub async fn init(&mut self) -> Result<(), Error> {
        if self.provider.access_token().is_empty() {
            self.provider.login().await?;
        }

        let settings = protocol::encode(&DownloadSettingsMessage {
            hash: protocol::DOWNLOAD_SETTINGS_HASH.to_string(),
        })?;

        let requests = [
            Request::new(RequestType::GetPlayer),
            Request::new(RequestType::GetHatchedEggs),
            Request::new(RequestType::GetInventory),
            Request::new(RequestType::CheckAwardedBadges),
            Request::with_message(RequestType::DownloadSettings, settings),
        ];

        let response = self.call(&requests).await?;

        if response.api_url.is_empty() {
            return Err(Error::NoEndpoint);
        }
        self.set_endpoint(&response.api_url);

        if let Some(ticket) = response.auth_ticket {
            debug!(
                ticket_start = %hex::encode(&ticket.start),
                expires_ms = ticket.expire_timestamp_ms,
                "auth ticket granted"
            );
            self.ticket = Some(ticket);
        }

        info!(endpoint = self.url(), "session established");
        Ok(())
    }

    /// Fetches the player profile.
    pub async fn get_player(&self) -> Result<CallOutcome<GetPlayerResponse>, Error> {
        let requests = [Request::new(RequestType::GetPlayer)];
        let response = self.call(&requests).await?;

        let player: GetPlayerResponse = decode_return(&response, 0)?;
        self.feed.push(FeedEntry::Player(player.clone()));

        Ok((player, protocol::status_error(response.status_code)))
    }

    /// Fetches the player inventory.
    pub async fn get_inventory(&self) -> Result<CallOutcome<GetInventoryResponse>, Error> {
        let requests = [Request::new(RequestType::GetInventory)];
        let response = self.call(&requests).await?;

        let inventory: GetInventoryResponse = decode_return(&response, 0)?;
        self.feed.push(FeedEntry::Inventory(inventory.clone()));

        Ok((inventory, protocol::status_error(response.status_code)))
    }

    /// Publishes the player's presence and returns the surrounding map:
    /// the full heartbeat request set scoped to the cell neighborhood of
    /// the current location.
    pub async fn announce(&self) -> Result<CallOutcome<GetMapObjectsResponse>, Error> {
        let cell_ids = cell::neighborhood(&self.location, self.cell_radius);
        let last_timestamp_ms = Utc::now().timestamp_millis();

        let settings = protocol::encode(&DownloadSettingsMessage {
            hash: protocol::DOWNLOAD_SETTINGS_HASH.to_string(),
        })?;
        let map_query = protocol::encode(&GetMapObjectsMessage {
            since_timestamp_ms: vec![0; cell_ids.len()],
            cell_id: cell_ids,
            latitude: self.location.latitude,
            longitude: self.location.longitude,
        })?;
        let inventory_query = protocol::encode(&GetInventoryMessage {
            last_timestamp_ms,
        })?;

        let requests = [
            Request::new(RequestType::GetPlayer),
            Request::new(RequestType::GetHatchedEggs),
            Request::with_message(RequestType::GetInventory, inventory_query),
            Request::new(RequestType::CheckAwardedBadges),
            Request::with_message(RequestType::DownloadSettings, settings),
            Request::with_message(RequestType::GetMapObjects, map_query),
            Request::new(RequestType::CheckChallenge),
        ];

        let response = self.call(&requests).await?;

        let map: GetMapObjectsResponse = decode_return(&response, MAP_OBJECTS_SLOT)?;
        self.feed.push(FeedEntry::MapObjects(map.clone()));

        Ok((map, protocol::status_error(response.status_code)))
    }

    /// Alias for [`Session::announce`].
    pub async fn get_player_map(&self) -> Result<CallOutcome<GetMapObjectsResponse>, Error> {
        self.announce().await
    }
}

/// Bounds-checks and decodes one response slot. A decode error takes
/// precedence over any status-derived error, and nothing reaches the
/// feed when either fails.
fn decode_return<T: serde::de::DeserializeOwned>(
    response: &ResponseEnvelope,
    index: usize,
) -> Result<T, Error> {
    let payload = response.returns.get(index).ok_or(Error::ShortResponse {
        want: index + 1,
        got: response.returns.len(),
    })?;
    protocol::decode(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::status;
    use crate::sign::NullCrypto;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockTransport {
        responses: Mutex<VecDeque<ResponseEnvelope>>,
        calls: Mutex<Vec<(String, RequestEnvelope)>>,
    }

    impl MockTransport {
        fn queue(&self, response: ResponseEnvelope) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn calls(&self) -> Vec<(String, RequestEnvelope)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn exchange(
            &self,
            endpoint: &str,
            envelope: &RequestEnvelope,
        ) -> Result<ResponseEnvelope, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), envelope.clone()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(TransportError::HttpStatus(500))
        }
    }

    struct MockProvider {
        token: String,
        granted: &'static str,
    }

    impl MockProvider {
        fn granting(token: &'static str) -> Self {
            Self {
                token: String::new(),
                granted: token,
            }
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn login(&mut self) -> Result<String, Error> {
            self.token = self.granted.to_string();
            Ok(self.token.clone())
        }

        fn provider_string(&self) -> &'static str {
            "mock"
        }

        fn access_token(&self) -> &str {
            &self.token
        }
    }

    #[derive(Default)]
    struct CollectingFeed {
        entries: Mutex<Vec<FeedEntry>>,
    }

    impl Feed for CollectingFeed {
        fn push(&self, entry: FeedEntry) {
            self.entries.lock().unwrap().push(entry);
        }
    }

    /// Enabled backend whose encryption always fails.
    struct BrokenCrypto;

    impl SignatureCrypto for BrokenCrypto {
        fn create_iv(&self) -> Vec<u8> {
            vec![0x00]
        }

        fn encrypt(&self, _plaintext: &[u8], _iv: &[u8]) -> Result<Vec<u8>, Error> {
            Err(Error::Formatting)
        }

        fn enabled(&self) -> bool {
            true
        }
    }

    /// Trivially reversible cipher so tests can assert on attachment.
    struct XorCrypto;

    impl SignatureCrypto for XorCrypto {
        fn create_iv(&self) -> Vec<u8> {
            vec![0x5A]
        }

        fn encrypt(&self, plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>, Error> {
            Ok(plaintext.iter().map(|b| b ^ iv[0]).collect())
        }

        fn enabled(&self) -> bool {
            true
        }
    }

    fn ticket(label: &str) -> AuthTicket {
        AuthTicket {
            start: label.as_bytes().to_vec(),
            expire_timestamp_ms: 9_999,
            end: vec![0xFF],
        }
    }

    fn handshake_response(api_url: &str, auth_ticket: Option<AuthTicket>) -> ResponseEnvelope {
        ResponseEnvelope {
            status_code: status::OK,
            api_url: api_url.to_string(),
            auth_ticket,
            ..Default::default()
        }
    }

    fn player_response(status_code: i32, api_url: &str) -> ResponseEnvelope {
        ResponseEnvelope {
            status_code,
            api_url: api_url.to_string(),
            returns: vec![protocol::encode(&GetPlayerResponse {
                success: true,
                ..Default::default()
            })
            .unwrap()],
            ..Default::default()
        }
    }

    fn session(
        transport: Arc<MockTransport>,
        feed: Arc<CollectingFeed>,
        crypto: Box<dyn SignatureCrypto>,
    ) -> Session {
        Session::with_transport(
            Box::new(MockProvider::granting("T1")),
            Location::new(59.3293, 18.0686, 8.0),
            Box::new(feed),
            crypto,
            Box::new(transport),
        )
    }

    #[tokio::test]
    async fn init_commits_endpoint_and_ticket() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(handshake_response("host1", Some(ticket("AT1"))));
        transport.queue(player_response(status::OK, ""));

        let mut session = session(transport.clone(), feed.clone(), Box::new(NullCrypto));
        session.init().await.unwrap();

        let (player, status_err) = session.get_player().await.unwrap();
        assert!(player.success);
        assert_eq!(status_err, None);

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);

        // Bootstrap call: default endpoint, provider auth, no ticket.
        let (endpoint, envelope) = &calls[0];
        assert_eq!(endpoint, DEFAULT_URL);
        assert_eq!(envelope.requests.len(), 5);
        assert_eq!(
            envelope.auth_info,
            Some(AuthInfo {
                provider: "mock".into(),
                token: "T1".into(),
            })
        );
        assert_eq!(envelope.auth_ticket, None);

        // Follow-up call: migrated endpoint, ticket instead of auth info.
        let (endpoint, envelope) = &calls[1];
        assert_eq!(endpoint, "https://host1/rpc");
        assert_eq!(envelope.auth_ticket, Some(ticket("AT1")));
        assert_eq!(envelope.auth_info, None);

        let entries = feed.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0], FeedEntry::Player(_)));
    }

    #[tokio::test]
    async fn init_fails_without_an_endpoint_token() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(handshake_response("", Some(ticket("AT1"))));

        let mut session = session(transport.clone(), feed, Box::new(NullCrypto));
        let err = session.init().await.unwrap_err();
        assert!(matches!(err, Error::NoEndpoint));

        // The session stays unauthenticated on the default endpoint.
        transport.queue(player_response(status::OK, ""));
        session.get_player().await.unwrap();
        let calls = transport.calls();
        assert_eq!(calls[1].0, DEFAULT_URL);
        assert_eq!(calls[1].1.auth_ticket, None);
    }

    #[tokio::test]
    async fn new_endpoint_signal_is_surfaced_not_fatal() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(handshake_response("host1", Some(ticket("AT1"))));

        let mut session = session(transport.clone(), feed, Box::new(NullCrypto));
        session.init().await.unwrap();

        transport.queue(player_response(status::OK_RPC_URL_IN_RESPONSE, "host2"));
        let (player, status_err) = session.get_player().await.unwrap();
        assert!(player.success);
        assert_eq!(status_err, Some(StatusError::NewRpcEndpoint));

        session.set_endpoint("host2");
        transport.queue(player_response(status::OK, ""));
        session.get_player().await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls[2].0, "https://host2/rpc");
    }

    #[tokio::test]
    async fn short_response_is_malformed_and_feeds_nothing() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(ResponseEnvelope {
            status_code: status::OK,
            ..Default::default()
        });

        let session = session(transport, feed.clone(), Box::new(NullCrypto));
        let err = session.get_player().await.unwrap_err();
        assert!(matches!(err, Error::ShortResponse { want: 1, got: 0 }));
        assert!(feed.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn decode_error_takes_precedence_over_status_error() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(ResponseEnvelope {
            status_code: status::SESSION_INVALIDATED,
            returns: vec![vec![0xDE, 0xAD]],
            ..Default::default()
        });

        let session = session(transport, feed.clone(), Box::new(NullCrypto));
        let err = session.get_player().await.unwrap_err();
        assert!(matches!(err, Error::Response(_)));
        assert!(feed.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_crypto_attaches_no_platform_request() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(handshake_response("host1", Some(ticket("AT1"))));
        transport.queue(player_response(status::OK, ""));

        let mut session = session(transport.clone(), feed, Box::new(NullCrypto));
        session.init().await.unwrap();
        session.get_player().await.unwrap();

        for (_, envelope) in transport.calls() {
            assert!(envelope.platform_requests.is_empty());
        }
    }

    #[tokio::test]
    async fn enabled_crypto_signs_only_ticketed_calls() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(handshake_response("host1", Some(ticket("AT1"))));
        transport.queue(player_response(status::OK, ""));

        let mut session = session(transport.clone(), feed, Box::new(XorCrypto));
        session.init().await.unwrap();
        session.get_player().await.unwrap();

        let calls = transport.calls();
        // Pre-ticket bootstrap is never signed, even with crypto enabled.
        assert!(calls[0].1.platform_requests.is_empty());
        assert_eq!(calls[1].1.platform_requests.len(), 1);
    }

    #[tokio::test]
    async fn signing_failure_aborts_before_the_exchange() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(handshake_response("host1", Some(ticket("AT1"))));

        let mut session = session(transport.clone(), feed.clone(), Box::new(BrokenCrypto));
        // The unsigned bootstrap is unaffected by the broken backend.
        session.init().await.unwrap();
        assert_eq!(transport.calls().len(), 1);

        let err = session.get_player().await.unwrap_err();
        assert!(matches!(err, Error::Formatting));

        // The failed call never reached the transport or the feed.
        assert_eq!(transport.calls().len(), 1);
        assert!(feed.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn announce_scopes_the_query_to_the_cell_neighborhood() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());

        let map = GetMapObjectsResponse::default();
        let mut returns = vec![Vec::new(); MAP_OBJECTS_SLOT];
        returns.push(protocol::encode(&map).unwrap());
        transport.queue(ResponseEnvelope {
            status_code: status::OK,
            returns,
            ..Default::default()
        });

        let mut session = session(transport.clone(), feed.clone(), Box::new(NullCrypto));
        session.set_cell_radius(3);
        let (_, status_err) = session.announce().await.unwrap();
        assert_eq!(status_err, None);

        let calls = transport.calls();
        let envelope = &calls[0].1;
        assert_eq!(envelope.requests.len(), 7);
        assert_eq!(envelope.requests[5].request_type, RequestType::GetMapObjects);

        let query: GetMapObjectsMessage =
            bincode::deserialize(&envelope.requests[5].request_message).unwrap();
        assert_eq!(query.cell_id.len(), 7);
        assert!(query.cell_id.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(query.since_timestamp_ms, vec![0; query.cell_id.len()]);

        let entries = feed.entries.lock().unwrap();
        assert!(matches!(entries[0], FeedEntry::MapObjects(_)));
    }

    #[tokio::test]
    async fn announce_with_short_returns_is_malformed() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(ResponseEnvelope {
            status_code: status::OK,
            returns: vec![Vec::new(); 3],
            ..Default::default()
        });

        let session = session(transport, feed.clone(), Box::new(NullCrypto));
        let err = session.announce().await.unwrap_err();
        assert!(matches!(err, Error::ShortResponse { want: 6, got: 3 }));
        assert!(feed.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn move_to_replaces_location_and_keeps_the_ticket() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());
        transport.queue(handshake_response("host1", Some(ticket("AT1"))));
        transport.queue(player_response(status::OK, ""));

        let mut session = session(transport.clone(), feed, Box::new(NullCrypto));
        session.init().await.unwrap();

        session.move_to(Location::new(35.6762, 139.6503, 40.0));
        session.get_player().await.unwrap();

        let calls = transport.calls();
        let envelope = &calls[1].1;
        assert_eq!(envelope.latitude, 35.6762);
        assert_eq!(envelope.longitude, 139.6503);
        assert_eq!(envelope.auth_ticket, Some(ticket("AT1")));
    }

    #[tokio::test]
    async fn transport_errors_pass_through_unchanged() {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(CollectingFeed::default());

        // Nothing queued: the mock answers with a 500.
        let session = session(transport, feed, Box::new(NullCrypto));
        let err = session.get_player().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::HttpStatus(500))
        ));
    }
}
