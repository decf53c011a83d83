use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use super::{ClientEvent, InitOptions, OidcClient, Profile};
use crate::error::Error;
use crate::token::{self, TokenClaims};

/// Scripted [`OidcClient`] for tests.
///
/// `init` resolves `true` unless told otherwise. Each `update_token` call
/// consumes one scripted outcome; with none left it reports "still valid".
///
/// ```rust,ignore
/// let client = MockClient::new()
///     .with_token("header.payload.sig")
///     .refresh_to("header.payload2.sig")
///     .refresh_fails("offline");
/// ```
pub struct MockClient {
    init: Mutex<Result<bool, String>>,
    login_error: Mutex<Option<String>>,
    token: Mutex<Option<String>>,
    profile: Mutex<Result<Profile, String>>,
    profile_events: Mutex<Vec<ClientEvent>>,
    refreshes: Mutex<VecDeque<Result<Option<String>, String>>>,
    events: broadcast::Sender<ClientEvent>,
    init_calls: AtomicUsize,
    login_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    update_token_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            init: Mutex::new(Ok(true)),
            login_error: Mutex::new(None),
            token: Mutex::new(None),
            profile: Mutex::new(Err("profile unavailable".into())),
            profile_events: Mutex::new(Vec::new()),
            refreshes: Mutex::new(VecDeque::new()),
            events,
            init_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            update_token_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn init_returns(self, authenticated: bool) -> Self {
        *lock(&self.init) = Ok(authenticated);
        self
    }

    #[must_use]
    pub fn init_fails(self, message: impl Into<String>) -> Self {
        *lock(&self.init) = Err(message.into());
        self
    }

    #[must_use]
    pub fn login_fails(self, message: impl Into<String>) -> Self {
        *lock(&self.login_error) = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *lock(&self.token) = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_profile(self, profile: Profile) -> Self {
        *lock(&self.profile) = Ok(profile);
        self
    }

    /// Raises `event` while `load_user_profile` is in flight.
    #[must_use]
    pub fn emits_during_profile_load(self, event: ClientEvent) -> Self {
        lock(&self.profile_events).push(event);
        self
    }

    /// Next `update_token` obtains `token`.
    #[must_use]
    pub fn refresh_to(self, token: impl Into<String>) -> Self {
        lock(&self.refreshes).push_back(Ok(Some(token.into())));
        self
    }

    /// Next `update_token` finds the token still valid.
    #[must_use]
    pub fn refresh_not_needed(self) -> Self {
        lock(&self.refreshes).push_back(Ok(None));
        self
    }

    /// Next `update_token` fails with `message`.
    #[must_use]
    pub fn refresh_fails(self, message: impl Into<String>) -> Self {
        lock(&self.refreshes).push_back(Err(message.into()));
        self
    }

    /// Raises `event` to every subscriber.
    pub fn emit(&self, event: ClientEvent) {
        // No subscribers yet is fine.
        let _ = self.events.send(event);
    }

    #[must_use]
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn update_token_calls(&self) -> usize {
        self.update_token_calls.load(Ordering::SeqCst)
    }
}

impl OidcClient for MockClient {
    async fn init(&self, _options: &InitOptions) -> Result<bool, Error> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.init).clone().map_err(Error::Client)
    }

    async fn login(&self) -> Result<(), Error> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.login_error).clone() {
            Some(message) => Err(Error::Client(message)),
            None => Ok(()),
        }
    }

    async fn logout(&self) -> Result<(), Error> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.token) = None;
        Ok(())
    }

    async fn load_user_profile(&self) -> Result<Profile, Error> {
        let events = std::mem::take(&mut *lock(&self.profile_events));
        for event in events {
            self.emit(event);
        }
        lock(&self.profile).clone().map_err(Error::Client)
    }

    async fn update_token(&self, _min_validity: u64) -> Result<bool, Error> {
        self.update_token_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = lock(&self.refreshes).pop_front();
        match outcome {
            Some(Ok(Some(token))) => {
                *lock(&self.token) = Some(token);
                Ok(true)
            }
            Some(Ok(None)) | None => Ok(false),
            Some(Err(message)) => Err(Error::Client(message)),
        }
    }

    fn token(&self) -> Option<String> {
        lock(&self.token).clone()
    }

    fn token_parsed(&self) -> Option<TokenClaims> {
        lock(&self.token)
            .as_deref()
            .and_then(|t| token::parse_claims(t).ok())
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}
