//! Third-party identity providers.
//!
//! A session authenticates against an external identity provider exactly
//! once, during `init`, and afterwards presents the provider's access
//! token until the server issues an auth ticket.

pub mod ptc;

use async_trait::async_trait;

use crate::error::Error;

/// Capability for managing auth tokens with a third-party authenticator.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Performs the provider's login flow and returns the access token.
    /// Login failures are passed through unchanged.
    async fn login(&mut self) -> Result<String, Error>;

    /// Identifying string sent to the game server alongside the token.
    fn provider_string(&self) -> &'static str;

    /// The current access token, or an empty string before login.
    fn access_token(&self) -> &str;
}

/// Creates a provider from its identifying name.
pub fn new_provider(
    provider: &str,
    username: &str,
    password: &str,
) -> Result<Box<dyn Provider>, Error> {
    match provider {
        "ptc" => Ok(Box::new(ptc::PtcProvider::new(username, password))),
        other => Err(Error::Login(format!(
            "provider \"{other}\" is not supported"
        ))),
    }
}
