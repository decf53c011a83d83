use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use super::{ClientEvent, InitOptions, OidcClient, Profile};
use crate::config::{KeycloakConfig, PkceMethod};
use crate::error::Error;
use crate::pkce;
use crate::token::{self, TokenClaims};

/// Sends the user agent somewhere, typically the Keycloak login page.
pub trait Navigator: Send + Sync + 'static {
    fn navigate(&self, url: &Url);
}

/// Navigator that only logs the target URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, url: &Url) {
        tracing::info!(url = %url, "Keycloak login required");
    }
}

/// Realm endpoints derived from the Keycloak base URL.
#[derive(Debug, Clone)]
struct Endpoints {
    auth: Url,
    token: Url,
    logout: Url,
    account: Url,
}

impl Endpoints {
    fn new(base: &str, realm: &str) -> Result<Self, Error> {
        let base: Url = base
            .parse()
            .map_err(|e| Error::Config(format!("keycloak url: {e}")))?;

        let realm_url = |segments: &[&str]| -> Result<Url, Error> {
            let mut url = base.clone();
            url.path_segments_mut()
                .map_err(|()| Error::Config("keycloak url cannot be a base".into()))?
                .pop_if_empty()
                .push("realms")
                .push(realm)
                .extend(segments);
            Ok(url)
        };

        Ok(Self {
            auth: realm_url(&["protocol", "openid-connect", "auth"])?,
            token: realm_url(&["protocol", "openid-connect", "token"])?,
            logout: realm_url(&["protocol", "openid-connect", "logout"])?,
            account: realm_url(&["account"])?,
        })
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

struct Tokens {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    claims: TokenClaims,
}

struct PendingLogin {
    state: String,
    code_verifier: String,
}

#[derive(Default)]
struct Session {
    tokens: Option<Tokens>,
    pending: Option<PendingLogin>,
    /// Refresh token restored by the host before `init`.
    restored_refresh_token: Option<String>,
    pkce_method: PkceMethod,
    expiry_task: Option<JoinHandle<()>>,
}

/// Keycloak public-client adapter over `reqwest`.
///
/// `login` hands a PKCE authorization URL to the [`Navigator`]; the host
/// passes the redirect back through [`handle_callback`](Self::handle_callback).
pub struct KeycloakClient {
    client_id: String,
    redirect_uri: Url,
    endpoints: Endpoints,
    http: reqwest::Client,
    navigator: Arc<dyn Navigator>,
    session: Mutex<Session>,
    /// Held across a refresh grant so concurrent callers share one.
    refreshing: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ClientEvent>,
}

impl KeycloakClient {
    /// Create a client for the realm described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL or redirect URI is not a valid URL.
    pub fn new(config: &KeycloakConfig) -> Result<Self, Error> {
        let endpoints = Endpoints::new(config.url(), config.realm())?;
        let redirect_uri: Url = config
            .redirect_uri()
            .parse()
            .map_err(|e| Error::Config(format!("redirect uri: {e}")))?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            client_id: config.client_id().to_owned(),
            redirect_uri,
            endpoints,
            http: reqwest::Client::new(),
            navigator: Arc::new(LogNavigator),
            session: Mutex::new(Session {
                pkce_method: config.pkce_method(),
                ..Session::default()
            }),
            refreshing: tokio::sync::Mutex::new(()),
            events,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn with_navigator(mut self, navigator: impl Navigator) -> Self {
        self.navigator = Arc::new(navigator);
        self
    }

    /// Restore a session from a previously persisted refresh token.
    #[must_use]
    pub fn with_refresh_token(self, refresh_token: impl Into<String>) -> Self {
        self.session().restored_refresh_token = Some(refresh_token.into());
        self
    }

    /// Current refresh token, for hosts that persist sessions.
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        let session = self.session();
        session
            .tokens
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .or_else(|| session.restored_refresh_token.clone())
    }

    /// Current ID token, if the realm issued one.
    #[must_use]
    pub fn id_token(&self) -> Option<String> {
        self.session()
            .tokens
            .as_ref()
            .and_then(|t| t.id_token.clone())
    }

    /// Build an authorization URL with fresh PKCE parameters and remember them.
    #[must_use]
    pub fn authorization_url(&self) -> Url {
        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();

        let mut session = self.session();
        let method = session.pkce_method;
        let code_challenge = pkce::generate_code_challenge(&code_verifier, method);

        let mut url = self.endpoints.auth.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("state", &state)
            .append_pair("scope", "openid")
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", method.as_str());

        session.pending = Some(PendingLogin {
            state,
            code_verifier,
        });
        url
    }

    /// Complete a login from the URL Keycloak redirected back to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Oidc`] if Keycloak reported an error, the `state`
    /// does not match the pending login, or the code exchange is rejected;
    /// [`Error::Http`] on network failure.
    pub async fn handle_callback(&self, callback: &Url) -> Result<(), Error> {
        let params: HashMap<String, String> = callback.query_pairs().into_owned().collect();

        if let Some(error) = params.get("error") {
            let detail = params
                .get("error_description")
                .cloned()
                .unwrap_or_else(|| error.clone());
            tracing::warn!(error = %error, description = %detail, "OAuth2 error from Keycloak");
            let _ = self.events.send(ClientEvent::AuthError(detail.clone()));
            return Err(authorization_error(detail));
        }

        let code = params
            .get("code")
            .ok_or_else(|| authorization_error("missing_code"))?;
        let pending = {
            let mut session = self.session();
            let matches = session
                .pending
                .as_ref()
                .is_some_and(|p| params.get("state") == Some(&p.state));
            if matches {
                session.pending.take()
            } else {
                None
            }
        };
        let Some(pending) = pending else {
            tracing::warn!("OAuth state mismatch");
            return Err(authorization_error("state_mismatch"));
        };

        let tokens = self.exchange_code(code, &pending.code_verifier).await?;
        self.store_tokens(tokens)?;
        let _ = self.events.send(ClientEvent::AuthSuccess);
        tracing::info!("Keycloak login successful");
        Ok(())
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(self.endpoints.token.clone())
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token exchange").await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<(), Error> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(self.endpoints.token.clone())
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token refresh").await?;
        let tokens = response.json::<TokenResponse>().await?;
        self.store_tokens(tokens)
    }

    /// Replace the session tokens and re-arm the expiry notifier.
    fn store_tokens(&self, response: TokenResponse) -> Result<(), Error> {
        let claims = token::parse_claims(&response.access_token)?;
        let until_expiry = claims
            .seconds_until_expiry(token::now_unix())
            .map(Duration::from_secs);

        let mut session = self.session();
        let refresh_token = response
            .refresh_token
            .or_else(|| session.tokens.as_ref().and_then(|t| t.refresh_token.clone()))
            .or_else(|| session.restored_refresh_token.take());
        session.restored_refresh_token = None;
        session.tokens = Some(Tokens {
            access_token: response.access_token,
            refresh_token,
            id_token: response.id_token,
            claims,
        });

        if let Some(previous) = session.expiry_task.take() {
            previous.abort();
        }
        session.expiry_task = until_expiry.map(|delay| {
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(ClientEvent::TokenExpired);
            })
        });
        Ok(())
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Oidc {
            operation,
            status: Some(status),
            detail: body,
        })
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn authorization_error(detail: impl Into<String>) -> Error {
    Error::Oidc {
        operation: "authorization",
        status: None,
        detail: detail.into(),
    }
}

impl OidcClient for KeycloakClient {
    async fn init(&self, options: &InitOptions) -> Result<bool, Error> {
        if options.check_login_iframe {
            tracing::debug!("checkLoginIframe needs a browser; ignoring");
        }

        let refresh_token = {
            let mut session = self.session();
            session.pkce_method = options.pkce_method;
            if let Some(tokens) = &session.tokens {
                if !tokens.claims.expires_within(0, token::now_unix()) {
                    return Ok(true);
                }
            }
            session
                .tokens
                .as_ref()
                .and_then(|t| t.refresh_token.clone())
                .or_else(|| session.restored_refresh_token.clone())
        };

        match refresh_token {
            Some(refresh_token) => {
                let _refreshing = self.refreshing.lock().await;
                self.refresh(&refresh_token).await?;
                Ok(true)
            }
            None => {
                tracing::debug!(on_load = options.on_load.as_str(), "No Keycloak session");
                Ok(false)
            }
        }
    }

    async fn login(&self) -> Result<(), Error> {
        let url = self.authorization_url();
        self.navigator.navigate(&url);
        Ok(())
    }

    async fn logout(&self) -> Result<(), Error> {
        let refresh_token = {
            let mut session = self.session();
            if let Some(task) = session.expiry_task.take() {
                task.abort();
            }
            session.pending = None;
            let restored = session.restored_refresh_token.take();
            session
                .tokens
                .take()
                .and_then(|t| t.refresh_token)
                .or(restored)
        };
        let _ = self.events.send(ClientEvent::AuthLogout);

        if let Some(refresh_token) = refresh_token {
            let params = [
                ("client_id", self.client_id.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ];
            let response = self
                .http
                .post(self.endpoints.logout.clone())
                .form(&params)
                .send()
                .await?;
            Self::ensure_success(response, "logout").await?;
        }
        Ok(())
    }

    async fn load_user_profile(&self) -> Result<Profile, Error> {
        let access_token = self.token().ok_or(Error::NotAuthenticated)?;
        let response = self
            .http
            .get(self.endpoints.account.clone())
            .bearer_auth(&access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let response = Self::ensure_success(response, "profile request").await?;
        response.json::<Profile>().await.map_err(Into::into)
    }

    async fn update_token(&self, min_validity: u64) -> Result<bool, Error> {
        let _refreshing = self.refreshing.lock().await;
        let refresh_token = {
            let session = self.session();
            let tokens = session.tokens.as_ref().ok_or(Error::NotAuthenticated)?;
            if !tokens.claims.expires_within(min_validity, token::now_unix()) {
                return Ok(false);
            }
            tokens
                .refresh_token
                .clone()
                .ok_or_else(|| Error::Token("no refresh token".into()))?
        };

        self.refresh(&refresh_token).await?;
        Ok(true)
    }

    fn token(&self) -> Option<String> {
        self.session()
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    fn token_parsed(&self) -> Option<TokenClaims> {
        self.session().tokens.as_ref().map(|t| t.claims.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::OnLoad;
    use crate::token::encode_test_token;

    const TOKEN_PATH: &str = "/realms/talks/protocol/openid-connect/token";

    #[derive(Clone, Default)]
    struct RecordingNavigator(Arc<Mutex<Vec<Url>>>);

    impl Navigator for RecordingNavigator {
        fn navigate(&self, url: &Url) {
            self.0.lock().unwrap().push(url.clone());
        }
    }

    fn can_bind_localhost() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn access_token(expires_in: i64, username: &str) -> String {
        let now = token::now_unix();
        encode_test_token(&json!({
            "sub": "user-1",
            "iat": now,
            "exp": now + expires_in,
            "preferred_username": username,
        }))
    }

    fn token_body(access_token: &str, refresh_token: &str) -> serde_json::Value {
        json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 300,
            "refresh_token": refresh_token,
            "id_token": "id.token.value",
        })
    }

    fn client_for(base: &str) -> KeycloakClient {
        let config = KeycloakConfig::new(base, "talks", "deck")
            .with_redirect_uri("https://talks.example.com/deck/");
        KeycloakClient::new(&config).unwrap()
    }

    fn options() -> InitOptions {
        InitOptions {
            on_load: OnLoad::LoginRequired,
            pkce_method: PkceMethod::S256,
            check_login_iframe: false,
        }
    }

    fn query_param(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_endpoints_from_base_url() {
        let endpoints = Endpoints::new("https://sso.example.com", "talks").unwrap();
        assert_eq!(
            endpoints.token.as_str(),
            "https://sso.example.com/realms/talks/protocol/openid-connect/token"
        );
        assert_eq!(
            endpoints.account.as_str(),
            "https://sso.example.com/realms/talks/account"
        );

        let legacy = Endpoints::new("https://sso.example.com/auth/", "my realm").unwrap();
        assert_eq!(
            legacy.auth.as_str(),
            "https://sso.example.com/auth/realms/my%20realm/protocol/openid-connect/auth"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let config = KeycloakConfig::new("not a url", "talks", "deck");
        assert!(matches!(KeycloakClient::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_authorization_url_contains_pkce() {
        let client = client_for("https://sso.example.com");
        let url = client.authorization_url();

        assert_eq!(url.path(), "/realms/talks/protocol/openid-connect/auth");
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("deck"));
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some("https://talks.example.com/deck/")
        );
        assert_eq!(
            query_param(&url, "code_challenge_method").as_deref(),
            Some("S256")
        );
        assert!(query_param(&url, "code_challenge").is_some());
        assert!(query_param(&url, "state").is_some());
    }

    #[tokio::test]
    async fn test_init_without_session_returns_false() {
        let client = client_for("https://sso.example.com");
        assert!(!client.init(&options()).await.unwrap());
        assert!(client.token().is_none());
    }

    #[tokio::test]
    async fn test_login_navigates_to_authorization_url() {
        let navigator = RecordingNavigator::default();
        let client = client_for("https://sso.example.com").with_navigator(navigator.clone());

        client.login().await.unwrap();

        let visited = navigator.0.lock().unwrap();
        assert_eq!(visited.len(), 1);
        assert_eq!(visited[0].host_str(), Some("sso.example.com"));
    }

    #[tokio::test]
    async fn test_callback_exchanges_code() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        let access = access_token(300, "ada");
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc123"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&access, "r1")))
            .expect(1)
            .mount(&server)
            .await;

        let navigator = RecordingNavigator::default();
        let client = client_for(&server.uri()).with_navigator(navigator.clone());
        let mut events = client.subscribe();

        client.login().await.unwrap();
        let state = query_param(&navigator.0.lock().unwrap()[0], "state").unwrap();
        let callback: Url = format!("https://talks.example.com/deck/?code=abc123&state={state}")
            .parse()
            .unwrap();

        client.handle_callback(&callback).await.unwrap();

        assert_eq!(client.token().as_deref(), Some(access.as_str()));
        assert_eq!(client.refresh_token().as_deref(), Some("r1"));
        assert_eq!(client.id_token().as_deref(), Some("id.token.value"));
        assert_eq!(
            client.token_parsed().unwrap().preferred_username.as_deref(),
            Some("ada")
        );
        assert_eq!(events.recv().await.unwrap(), ClientEvent::AuthSuccess);
    }

    #[tokio::test]
    async fn test_callback_state_mismatch() {
        let client = client_for("https://sso.example.com");
        let _ = client.authorization_url();
        let callback: Url = "https://talks.example.com/deck/?code=abc&state=forged"
            .parse()
            .unwrap();

        let err = client.handle_callback(&callback).await.unwrap_err();
        assert!(matches!(err, Error::Oidc { operation: "authorization", .. }));
        assert!(client.token().is_none());
    }

    #[tokio::test]
    async fn test_forged_callback_keeps_pending_login() {
        let client = client_for("https://sso.example.com");
        let url = client.authorization_url();
        let state = query_param(&url, "state").unwrap();
        let forged: Url = "https://talks.example.com/deck/?code=abc&state=forged"
            .parse()
            .unwrap();

        assert!(client.handle_callback(&forged).await.is_err());

        let session = client.session();
        let pending = session.pending.as_ref().unwrap();
        assert_eq!(pending.state, state);
    }

    #[tokio::test]
    async fn test_callback_error_emits_auth_error() {
        let client = client_for("https://sso.example.com");
        let mut events = client.subscribe();
        let callback: Url =
            "https://talks.example.com/deck/?error=access_denied&error_description=User%20cancelled"
                .parse()
                .unwrap();

        assert!(client.handle_callback(&callback).await.is_err());
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::AuthError("User cancelled".into())
        );
    }

    #[tokio::test]
    async fn test_init_restores_session_from_refresh_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        let access = access_token(300, "ada");
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=stored"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&access, "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri()).with_refresh_token("stored");

        assert!(client.init(&options()).await.unwrap());
        assert_eq!(client.token().as_deref(), Some(access.as_str()));
        assert_eq!(client.refresh_token().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_update_token_only_refreshes_near_expiry() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        let short_lived = access_token(30, "ada");
        let renewed = access_token(300, "ada");
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("refresh_token=stored"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&short_lived, "r1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&renewed, "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri()).with_refresh_token("stored");
        assert!(client.init(&options()).await.unwrap());

        assert!(!client.update_token(5).await.unwrap());
        assert!(client.update_token(70).await.unwrap());
        assert_eq!(client.token().as_deref(), Some(renewed.as_str()));
        assert!(!client.update_token(70).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_updates_share_one_grant() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        let short_lived = access_token(30, "ada");
        let renewed = access_token(300, "ada");
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("refresh_token=stored"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&short_lived, "r1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&renewed, "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri()).with_refresh_token("stored");
        assert!(client.init(&options()).await.unwrap());

        let (first, second) = tokio::join!(client.update_token(70), client.update_token(70));

        assert!(first.unwrap() ^ second.unwrap());
        assert_eq!(client.token().as_deref(), Some(renewed.as_str()));
        assert_eq!(client.refresh_token().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_update_token_without_session() {
        let client = client_for("https://sso.example.com");
        assert!(matches!(
            client.update_token(70).await,
            Err(Error::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rejection_maps_status() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let client = client_for(&server.uri()).with_refresh_token("revoked");
        let err = client.init(&options()).await.unwrap_err();

        match err {
            Error::Oidc {
                operation,
                status,
                detail,
            } => {
                assert_eq!(operation, "token refresh");
                assert_eq!(status, Some(400));
                assert_eq!(detail, "invalid_grant");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_load_user_profile() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        let access = access_token(300, "ada");
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&access, "r1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/realms/talks/account"))
            .and(header("authorization", format!("Bearer {access}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-1",
                "username": "ada",
                "email": "ada@example.com",
                "firstName": "Ada",
                "lastName": "Lovelace",
                "emailVerified": true,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri()).with_refresh_token("stored");
        assert!(matches!(
            client.load_user_profile().await,
            Err(Error::NotAuthenticated)
        ));

        client.init(&options()).await.unwrap();
        let profile = client.load_user_profile().await.unwrap();

        assert_eq!(profile.username.as_deref(), Some("ada"));
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(profile.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(profile.email_verified, Some(true));
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        let access = access_token(300, "ada");
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&access, "r1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/realms/talks/protocol/openid-connect/logout"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri()).with_refresh_token("stored");
        client.init(&options()).await.unwrap();
        let mut events = client.subscribe();

        client.logout().await.unwrap();

        assert!(client.token().is_none());
        assert!(client.refresh_token().is_none());
        assert_eq!(events.recv().await.unwrap(), ClientEvent::AuthLogout);
    }

    #[tokio::test]
    async fn test_expired_token_emits_token_expired() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        let already_expired = access_token(-5, "ada");
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body(&already_expired, "r1")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri()).with_refresh_token("stored");
        let mut events = client.subscribe();
        client.init(&options()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ClientEvent::TokenExpired);
    }
}
