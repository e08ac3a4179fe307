//! Third-party identity providers (authorization-code flow).
//!
//! [`OAuthClient`] is the seam the handlers talk to. [`HttpOAuthClient`] builds the
//! authorization redirect, exchanges the code at the token endpoint and maps the
//! provider's profile document onto an [`OAuthProfile`].

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    auth::{dto::OAuthProfile, repo_types::AuthProvider},
    config::{AppConfig, OAuthClientConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Microsoft,
}

impl OAuthProvider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "google" => Some(OAuthProvider::Google),
            "microsoft" => Some(OAuthProvider::Microsoft),
            _ => None,
        }
    }

    pub fn auth_provider(self) -> AuthProvider {
        match self {
            OAuthProvider::Google => AuthProvider::Google,
            OAuthProvider::Microsoft => AuthProvider::Microsoft,
        }
    }

    fn scopes(self) -> &'static [&'static str] {
        match self {
            OAuthProvider::Google => &["profile", "email"],
            OAuthProvider::Microsoft => &["user.read"],
        }
    }
}

impl std::fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.auth_provider().as_str())
    }
}

#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Provider URL the browser is sent to; `state` comes back on the callback.
    fn authorization_url(&self, state: &str) -> String;

    /// Trades an authorization code for the user's profile.
    async fn exchange(&self, code: &str) -> anyhow::Result<OAuthProfile>;
}

type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

pub struct HttpOAuthClient {
    provider: OAuthProvider,
    oauth: ConfiguredClient,
    http: reqwest::Client,
    profile_url: String,
}

impl HttpOAuthClient {
    pub fn new(provider: OAuthProvider, cfg: &OAuthClientConfig) -> anyhow::Result<Self> {
        let oauth = BasicClient::new(ClientId::new(cfg.client_id.clone()))
            .set_client_secret(ClientSecret::new(cfg.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(cfg.auth_url.clone()).context("invalid auth url")?)
            .set_token_uri(TokenUrl::new(cfg.token_url.clone()).context("invalid token url")?)
            .set_redirect_uri(
                RedirectUrl::new(cfg.callback_url.clone()).context("invalid callback url")?,
            );
        // token endpoints must not redirect
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build oauth http client")?;

        Ok(Self {
            provider,
            oauth,
            http,
            profile_url: cfg.profile_url.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    mail: Option<String>,
    user_principal_name: Option<String>,
    display_name: Option<String>,
    given_name: Option<String>,
    surname: Option<String>,
}

fn google_profile(raw: GoogleUserInfo) -> anyhow::Result<OAuthProfile> {
    Ok(OAuthProfile {
        email: raw.email.context("google profile has no email")?,
        display_name: raw.name,
        first_name: raw.given_name,
        last_name: raw.family_name,
        provider: AuthProvider::Google,
        photo: raw.picture,
    })
}

// Graph's /me carries no photo URL.
fn microsoft_profile(raw: GraphUser) -> anyhow::Result<OAuthProfile> {
    Ok(OAuthProfile {
        email: raw
            .mail
            .or(raw.user_principal_name)
            .context("microsoft profile has no email")?,
        display_name: raw.display_name,
        first_name: raw.given_name,
        last_name: raw.surname,
        provider: AuthProvider::Microsoft,
        photo: None,
    })
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    fn authorization_url(&self, state: &str) -> String {
        let state = state.to_string();
        let mut req = self.oauth.authorize_url(move || CsrfToken::new(state));
        for scope in self.provider.scopes() {
            req = req.add_scope(Scope::new(scope.to_string()));
        }
        let (url, _) = req.url();
        url.to_string()
    }

    async fn exchange(&self, code: &str) -> anyhow::Result<OAuthProfile> {
        let token = self
            .oauth
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| anyhow::anyhow!("{} token exchange failed: {e}", self.provider))?;
        debug!(provider = %self.provider, "authorization code exchanged");

        let res = self
            .http
            .get(&self.profile_url)
            .bearer_auth(token.access_token().secret())
            .send()
            .await
            .with_context(|| format!("{} profile request", self.provider))?
            .error_for_status()
            .with_context(|| format!("{} profile request", self.provider))?;

        match self.provider {
            OAuthProvider::Google => google_profile(res.json().await.context("decode google profile")?),
            OAuthProvider::Microsoft => {
                microsoft_profile(res.json().await.context("decode graph profile")?)
            }
        }
    }
}

/// Configured providers. A provider without credentials is `None`.
#[derive(Clone, Default)]
pub struct OAuthProviders {
    pub google: Option<Arc<dyn OAuthClient>>,
    pub microsoft: Option<Arc<dyn OAuthClient>>,
}

impl OAuthProviders {
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let build = |provider, c: &Option<OAuthClientConfig>| -> anyhow::Result<_> {
            c.as_ref()
                .map(|c| {
                    HttpOAuthClient::new(provider, c).map(|client| Arc::new(client) as Arc<dyn OAuthClient>)
                })
                .transpose()
        };
        Ok(Self {
            google: build(OAuthProvider::Google, &cfg.google)?,
            microsoft: build(OAuthProvider::Microsoft, &cfg.microsoft)?,
        })
    }

    pub fn get(&self, provider: OAuthProvider) -> Option<&Arc<dyn OAuthClient>> {
        match provider {
            OAuthProvider::Google => self.google.as_ref(),
            OAuthProvider::Microsoft => self.microsoft.as_ref(),
        }
    }
}
