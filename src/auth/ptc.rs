//! Player Trainer Club login.
//!
//! Three-step form flow against the PTC single-sign-on host:
//! 1. GET the login page; the form state (`lt`, `execution`) comes back
//!    as JSON.
//! 2. POST the credentials; a successful login answers with a redirect
//!    whose query string carries a one-time ticket. Redirects are never
//!    followed, the ticket is read from the refused redirect.
//! 3. Exchange the ticket for an OAuth access token.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::Provider;
use crate::error::Error;

const LOGIN_URL: &str =
    "https://sso.geoquest-game.com/sso/login?service=https://sso.geoquest-game.com/sso/oauth2.0/callbackAuthorize";
const AUTHORIZE_URL: &str = "https://sso.geoquest-game.com/sso/oauth2.0/accessToken";

const REDIRECT_URI: &str = "https://www.geoquest-game.com/error";
const CLIENT_ID: &str = "mobile-app_geoquest";
const CLIENT_SECRET: &str = "p7GbSw2XQc4kKXw8FhOhd3FixzhtV8Dq3PEVkUCQ5ZPxtgyWsbTv";

const LOGIN_USER_AGENT: &str = "geoquest";

const PROVIDER_STRING: &str = "ptc";

#[derive(Debug, Default, Deserialize)]
struct LoginState {
    #[serde(default)]
    lt: String,
    #[serde(default)]
    execution: String,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Auth provider for Player Trainer Club accounts.
pub struct PtcProvider {
    username: String,
    password: String,
    token: String,
    http: reqwest::Client,
}

impl PtcProvider {
    pub fn new(username: &str, password: &str) -> Self {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build reqwest client");

        Self {
            username: username.to_string(),
            password: password.to_string(),
            token: String::new(),
            http,
        }
    }

    async fn fetch_login_state(&self) -> Result<LoginState, Error> {
        let response = self
            .http
            .get(LOGIN_URL)
            .header(reqwest::header::USER_AGENT, LOGIN_USER_AGENT)
            .send()
            .await
            .map_err(|_| login_error("could not start login process, the website might be down"))?;

        response
            .json::<LoginState>()
            .await
            .map_err(|_| login_error("could not read the login form state"))
    }

    async fn submit_credentials(&self, state: &LoginState) -> Result<String, Error> {
        let form = [
            ("lt", state.lt.as_str()),
            ("execution", state.execution.as_str()),
            ("_eventId", "submit"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];

        let response = self
            .http
            .post(LOGIN_URL)
            .header(reqwest::header::USER_AGENT, LOGIN_USER_AGENT)
            .form(&form)
            .send()
            .await
            .map_err(|_| login_error("could not request authorization"))?;

        // Success is a refused redirect whose location carries the ticket;
        // anything else is a form response with server-reported errors.
        if !response.status().is_redirection() {
            let body = response
                .json::<LoginState>()
                .await
                .unwrap_or_default();
            if let Some(message) = body.errors.into_iter().next() {
                return Err(login_error(&message));
            }
            return Err(login_error("could not request authorization"));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        ticket_from_location(location)
            .ok_or_else(|| login_error("login redirect did not carry a ticket"))
    }

    async fn exchange_ticket(&self, ticket: &str) -> Result<String, Error> {
        let form = [
            ("client_id", CLIENT_ID),
            ("redirect_uri", REDIRECT_URI),
            ("client_secret", CLIENT_SECRET),
            ("grant_type", "refresh_token"),
            ("code", ticket),
        ];

        let response = self
            .http
            .post(AUTHORIZE_URL)
            .header(reqwest::header::USER_AGENT, LOGIN_USER_AGENT)
            .form(&form)
            .send()
            .await
            .map_err(|_| login_error("could not authorize code"))?;

        response
            .json::<TokenResponse>()
            .await
            .map(|body| body.access_token)
            .map_err(|_| login_error("could not read the access token"))
    }
}

#[async_trait]
impl Provider for PtcProvider {
    async fn login(&mut self) -> Result<String, Error> {
        let state = self.fetch_login_state().await?;
        if let Some(message) = state.errors.first() {
            return Err(login_error(message));
        }

        let ticket = self.submit_credentials(&state).await?;
        debug!("ptc ticket granted");

        self.token = self.exchange_ticket(&ticket).await?;
        Ok(self.token.clone())
    }

    fn provider_string(&self) -> &'static str {
        PROVIDER_STRING
    }

    fn access_token(&self) -> &str {
        &self.token
    }
}

fn login_error(message: &str) -> Error {
    Error::Login(format!("ptc: {message}"))
}

/// Pulls the `ticket` query parameter out of a redirect location.
fn ticket_from_location(location: &str) -> Option<String> {
    let url = reqwest::Url::parse(location).ok()?;
    url.query_pairs()
        .find(|(name, _)| name == "ticket")
        .map(|(_, ticket)| ticket.into_owned())
        .filter(|ticket| !ticket.is_empty())
}
