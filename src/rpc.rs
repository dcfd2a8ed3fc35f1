//! RPC transport: one POST per call, no redirects, binary envelopes.

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;
use crate::protocol::{RequestEnvelope, ResponseEnvelope};

/// Fixed client identifier sent with every exchange.
pub const USER_AGENT: &str = "GeoQuest App";

/// One request/response exchange with the game backend.
///
/// The default implementation is [`Rpc`]; tests inject their own. Dropping
/// the returned future cancels the exchange, and callers wanting a
/// deadline wrap the call in `tokio::time::timeout`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(
        &self,
        endpoint: &str,
        envelope: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn exchange(
        &self,
        endpoint: &str,
        envelope: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, TransportError> {
        (**self).exchange(endpoint, envelope).await
    }
}

/// reqwest-backed transport with a cookie jar and redirects refused.
pub struct Rpc {
    http: reqwest::Client,
}

impl Rpc {
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// Transport with a per-exchange deadline applied by the client.
    pub fn with_timeout(timeout: Option<std::time::Duration>) -> Self {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().expect("failed to build reqwest client");
        Self { http }
    }
}

impl Default for Rpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for Rpc {
    async fn exchange(
        &self,
        endpoint: &str,
        envelope: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, TransportError> {
        let body = bincode::serialize(envelope).map_err(|_| TransportError::Encode)?;
        debug!(endpoint, bytes = body.len(), "posting request envelope");

        let response = self
            .http
            .post(endpoint)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .body(body)
            .send()
            .await
            .map_err(TransportError::Request)?;

        let status = response.status();
        if status.is_redirection() {
            return Err(TransportError::Redirect);
        }
        if status != reqwest::StatusCode::OK {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(TransportError::Body)?;
        bincode::deserialize(&bytes).map_err(|_| TransportError::Decode)
    }
}
