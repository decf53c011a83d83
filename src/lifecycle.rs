//! Drives the OIDC client from startup to a published [`AuthContext`].
//!
//! Phases move `Initializing → Authenticated | Unauthenticated | Errored`
//! (or straight to `Unconfigured` without settings). Client events keep
//! moving the phase afterwards:
//!
//! | Event          | Effect                                          |
//! |----------------|-------------------------------------------------|
//! | `AuthSuccess`  | `Authenticated`, token republished              |
//! | `AuthError`    | `Errored` with the message                      |
//! | `AuthLogout`   | `Unauthenticated`, user and token cleared       |
//! | `TokenExpired` | refresh; interactive login if the refresh fails |
//!
//! Nothing here returns an error to the caller. Failures end up in
//! [`AuthContext::error`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::app::HostApp;
#[cfg(feature = "keycloak")]
use crate::client::KeycloakClient;
use crate::client::{ClientEvent, InitOptions, OidcClient};
use crate::config::KeycloakConfig;
use crate::context::AuthContext;
use crate::error::Error;
use crate::refresh::{self, RefreshSettings};
use crate::state::{Transition, UserProfile};

/// Initialize Keycloak authentication for `app` with the bundled client.
///
/// The [`KeycloakClient`] is provided on `app` as `Arc<KeycloakClient>` so the
/// host can hand it login callbacks.
#[cfg(feature = "keycloak")]
pub async fn initialize(app: &HostApp, config: Option<KeycloakConfig>) -> AuthContext {
    Authenticator::new()
        .initialize(app, config, KeycloakClient::new)
        .await
}

/// Lifecycle driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticator {
    settings: RefreshSettings,
}

struct Connected<C> {
    client: Arc<C>,
    options: InitOptions,
}

impl Authenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_refresh_settings(mut self, settings: RefreshSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Publish an [`AuthContext`] on `app` and run the client's `init` to completion.
    ///
    /// `connect` builds the client and is only called when `config` is present.
    /// The context is provided before `init` starts, so consumers can watch it
    /// move out of `Initializing`.
    pub async fn initialize<C, F>(
        &self,
        app: &HostApp,
        config: Option<KeycloakConfig>,
        connect: F,
    ) -> AuthContext
    where
        C: OidcClient,
        F: FnOnce(&KeycloakConfig) -> Result<C, Error>,
    {
        let (ctx, connected) = self.publish(app, config.as_ref(), connect);
        if let Some(Connected { client, options }) = connected {
            run(client, ctx.clone(), options, self.settings).await;
        }
        ctx
    }

    /// Like [`initialize`](Self::initialize), but returns as soon as the
    /// context is published and drives `init` on a background task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime and `config` is present.
    pub fn spawn_initialize<C, F>(
        &self,
        app: &HostApp,
        config: Option<KeycloakConfig>,
        connect: F,
    ) -> AuthContext
    where
        C: OidcClient,
        F: FnOnce(&KeycloakConfig) -> Result<C, Error>,
    {
        let (ctx, connected) = self.publish(app, config.as_ref(), connect);
        if let Some(Connected { client, options }) = connected {
            tokio::spawn(run(client, ctx.clone(), options, self.settings));
        }
        ctx
    }

    fn publish<C, F>(
        &self,
        app: &HostApp,
        config: Option<&KeycloakConfig>,
        connect: F,
    ) -> (AuthContext, Option<Connected<C>>)
    where
        C: OidcClient,
        F: FnOnce(&KeycloakConfig) -> Result<C, Error>,
    {
        let Some(config) = config else {
            tracing::info!("Keycloak not configured; authentication disabled");
            let ctx = AuthContext::detached();
            ctx.apply(Transition::Skipped);
            app.provide(ctx.clone());
            return (ctx, None);
        };

        let client = match connect(config) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(error = %e, "Keycloak client setup failed");
                let ctx = AuthContext::detached();
                ctx.apply(Transition::Failed(e.to_string()));
                app.provide(ctx.clone());
                return (ctx, None);
            }
        };

        let ctx = AuthContext::with_client(client.clone(), self.settings.min_validity);
        app.provide(ctx.clone());
        app.provide(client.clone());
        tracing::debug!(
            url = config.url(),
            realm = config.realm(),
            client_id = config.client_id(),
            on_load = config.on_load().as_str(),
            "Initializing Keycloak"
        );

        (
            ctx,
            Some(Connected {
                client,
                options: InitOptions::from(config),
            }),
        )
    }
}

async fn run<C: OidcClient>(
    client: Arc<C>,
    ctx: AuthContext,
    options: InitOptions,
    settings: RefreshSettings,
) {
    let refreshing = Arc::new(AtomicBool::new(false));
    // Subscribe first: events raised during `init` or the profile load must not be lost.
    let events = client.subscribe();

    match client.init(&options).await {
        Ok(true) => {
            let user = load_user(client.as_ref()).await;
            ctx.apply(Transition::Authenticated {
                token: client.token(),
                user,
            });
            tracing::info!("Keycloak session established");
            start_refresh(&client, &ctx, settings, &refreshing);
            spawn_event_handlers(client, ctx, settings, refreshing, events);
        }
        Ok(false) => {
            ctx.apply(Transition::LoginRequired);
            spawn_event_handlers(client.clone(), ctx.clone(), settings, refreshing, events);
            tracing::info!("No Keycloak session; starting login");
            if let Err(e) = client.login().await {
                tracing::error!(error = %e, "Keycloak login could not be started");
                ctx.apply(Transition::Failed(e.to_string()));
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Keycloak initialization failed");
            ctx.apply(Transition::Failed(e.to_string()));
        }
    }
}

/// Profile from the identity provider, falling back to token claims.
async fn load_user<C: OidcClient>(client: &C) -> Option<UserProfile> {
    let claims = client.token_parsed();
    match client.load_user_profile().await {
        Ok(profile) => UserProfile::derive(Some(&profile), claims.as_ref()),
        Err(e) => {
            tracing::debug!(error = %e, "Profile unavailable; using token claims");
            UserProfile::derive(None, claims.as_ref())
        }
    }
}

fn start_refresh<C: OidcClient>(
    client: &Arc<C>,
    ctx: &AuthContext,
    settings: RefreshSettings,
    refreshing: &AtomicBool,
) {
    if !refreshing.swap(true, Ordering::SeqCst) {
        refresh::spawn_refresh_timer(client.clone(), ctx.clone(), settings);
    }
}

fn spawn_event_handlers<C: OidcClient>(
    client: Arc<C>,
    ctx: AuthContext,
    settings: RefreshSettings,
    refreshing: Arc<AtomicBool>,
    mut events: broadcast::Receiver<ClientEvent>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => handle_event(&client, &ctx, settings, &refreshing, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped Keycloak events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn handle_event<C: OidcClient>(
    client: &Arc<C>,
    ctx: &AuthContext,
    settings: RefreshSettings,
    refreshing: &AtomicBool,
    event: ClientEvent,
) {
    match event {
        ClientEvent::AuthSuccess => {
            ctx.apply(Transition::SignedIn(client.token()));
            if ctx.user().is_none() {
                let user = load_user(client.as_ref()).await;
                ctx.apply(Transition::UserLoaded(user));
            }
            start_refresh(client, ctx, settings, refreshing);
        }
        ClientEvent::AuthError(message) => {
            tracing::warn!(error = %message, "Keycloak authentication error");
            ctx.apply(Transition::Failed(message));
        }
        ClientEvent::AuthLogout => ctx.apply(Transition::LoggedOut),
        ClientEvent::TokenExpired => match client.update_token(settings.min_validity).await {
            Ok(refreshed) => {
                if let (true, Some(token)) = (refreshed, client.token()) {
                    ctx.apply(Transition::TokenRefreshed(token));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Expired token could not be refreshed; logging in again");
                if let Err(e) = client.login().await {
                    tracing::error!(error = %e, "Keycloak login could not be started");
                }
            }
        },
    }
}
