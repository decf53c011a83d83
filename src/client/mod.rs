//! The narrow OIDC client surface the lifecycle driver talks to.
//!
//! [`OidcClient`] is implemented by [`KeycloakClient`] for real deployments and
//! by [`MockClient`] in tests. Protocol details (PKCE, code exchange, refresh
//! grants) stay behind it.

#[cfg(feature = "keycloak")]
mod keycloak;
#[cfg(any(test, feature = "testing"))]
mod mock;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::{KeycloakConfig, OnLoad, PkceMethod};
use crate::error::Error;
use crate::token::TokenClaims;

#[cfg(feature = "keycloak")]
pub use keycloak::{KeycloakClient, LogNavigator, Navigator};
#[cfg(any(test, feature = "testing"))]
pub use mock::MockClient;

/// Signals a client raises outside of direct calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    AuthSuccess,
    AuthError(String),
    AuthLogout,
    TokenExpired,
}

/// Options handed to [`OidcClient::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct InitOptions {
    pub on_load: OnLoad,
    pub pkce_method: PkceMethod,
    pub check_login_iframe: bool,
}

impl From<&KeycloakConfig> for InitOptions {
    fn from(config: &KeycloakConfig) -> Self {
        Self {
            on_load: config.on_load(),
            pkce_method: config.pkce_method(),
            check_login_iframe: config.check_login_iframe(),
        }
    }
}

/// Account profile as returned by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Profile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

/// OIDC client capability.
///
/// Every network-facing call is async. Events are delivered through
/// [`subscribe`](OidcClient::subscribe) rather than assignable callbacks.
pub trait OidcClient: Send + Sync + 'static {
    /// Establishes whether a session exists. `Ok(true)` means authenticated.
    fn init(&self, options: &InitOptions) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Starts an interactive login (typically a redirect).
    fn login(&self) -> impl Future<Output = Result<(), Error>> + Send;

    fn logout(&self) -> impl Future<Output = Result<(), Error>> + Send;

    fn load_user_profile(&self) -> impl Future<Output = Result<Profile, Error>> + Send;

    /// Refreshes the token if it expires within `min_validity` seconds.
    ///
    /// Returns `Ok(true)` if a new token was obtained.
    fn update_token(&self, min_validity: u64) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Current raw access token.
    fn token(&self) -> Option<String>;

    /// Claims of the current access token.
    fn token_parsed(&self) -> Option<TokenClaims>;

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent>;
}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe subset of [`OidcClient`] used by the published context.
pub(crate) trait OidcClientDyn: Send + Sync {
    fn login_dyn(&self) -> BoxFuture<'_, Result<(), Error>>;

    fn logout_dyn(&self) -> BoxFuture<'_, Result<(), Error>>;

    fn update_token_dyn(&self, min_validity: u64) -> BoxFuture<'_, Result<bool, Error>>;

    fn token_dyn(&self) -> Option<String>;
}

impl<T: OidcClient> OidcClientDyn for T {
    fn login_dyn(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(self.login())
    }

    fn logout_dyn(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(self.logout())
    }

    fn update_token_dyn(&self, min_validity: u64) -> BoxFuture<'_, Result<bool, Error>> {
        Box::pin(self.update_token(min_validity))
    }

    fn token_dyn(&self) -> Option<String> {
        self.token()
    }
}
