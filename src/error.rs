//! Error taxonomy for the GeoQuest client.
//!
//! Errors fall into four families: formatting errors raised while building
//! a request (before any network I/O), transport errors from the HTTP
//! exchange, malformed-response errors when the server answered but the
//! payload cannot be used, and protocol status errors decoded from the
//! response envelope's status code. Nothing is retried internally; callers
//! own all retry policy.

/// Top-level error for all session and provider operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serialization, hashing or encryption failed while preparing a
    /// request. Always raised before the request reaches the network.
    #[error("could not format the outgoing request")]
    Formatting,

    /// The handshake response did not carry an RPC endpoint token, even
    /// though the exchange itself succeeded.
    #[error("no rpc endpoint was assigned in the handshake response")]
    NoEndpoint,

    /// The network exchange failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response payload list is shorter than the slot the operation
    /// expected.
    #[error("response carried {got} payloads, expected at least {want}")]
    ShortResponse { want: usize, got: usize },

    /// A response payload could not be decoded into its expected message.
    #[error("could not decode response payload")]
    Response(#[source] bincode::Error),

    /// The identity provider rejected the login.
    #[error("login failed: {0}")]
    Login(String),
}

/// Errors produced by the RPC transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request envelope could not be encoded into a request body.
    #[error("could not encode the request body")]
    Encode,

    /// The HTTP exchange itself failed (connectivity, TLS, timeout).
    #[error("there was an error requesting the api: {0}")]
    Request(#[source] reqwest::Error),

    /// The server answered with a redirect. Endpoint migration is signaled
    /// through response-body fields, so a redirect is always a failure.
    #[error("did not follow redirect")]
    Redirect,

    /// The server answered with a non-200 status.
    #[error("status code was {0}, expected 200")]
    HttpStatus(u16),

    /// Reading the response body failed mid-stream.
    #[error("could not read the response body")]
    Body(#[source] reqwest::Error),

    /// The response body could not be decoded into a response envelope.
    #[error("could not decode the response envelope")]
    Decode,
}

/// Errors decoded from a response envelope's status code.
///
/// [`StatusError::NewRpcEndpoint`] is informational: the call succeeded and
/// the response carries a new endpoint token. Callers are expected to
/// update the session endpoint and repeat the call rather than fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("the server assigned a new rpc endpoint")]
    NewRpcEndpoint,
    #[error("the request was malformed")]
    BadRequest,
    #[error("the request was invalid")]
    InvalidRequest,
    #[error("the platform request was invalid")]
    InvalidPlatformRequest,
    #[error("the request was redirected")]
    Redirect,
    #[error("the session has been invalidated")]
    SessionInvalidated,
    #[error("the auth token is invalid")]
    InvalidAuthToken,
    #[error("the request could not be completed")]
    Request,
}
